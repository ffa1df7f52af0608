//! Validation report formatting.

use std::fmt::Write;

use super::{ValidationIssue, ValidationResult, ValidationSeverity};

/// Renders a validation result for the `config-validate` command.
pub fn format_report(result: &ValidationResult) -> String {
    let errors: Vec<_> = result.errors().collect();
    let warnings: Vec<_> = result.warnings().collect();

    if errors.is_empty() && warnings.is_empty() {
        return "Configuration is valid.\n".to_string();
    }

    let mut report = String::new();
    write_section(&mut report, "Errors", &errors);
    write_section(&mut report, "Warnings", &warnings);
    let _ = writeln!(report, "{}", summary(result));
    report
}

fn write_section(report: &mut String, title: &str, issues: &[&ValidationIssue]) {
    if issues.is_empty() {
        return;
    }
    let _ = writeln!(report, "{} ({}):", title, issues.len());
    for issue in issues {
        report.push_str(&format_issue(issue));
    }
    report.push('\n');
}

fn format_issue(issue: &ValidationIssue) -> String {
    let marker = match issue.severity {
        ValidationSeverity::Error => "x",
        ValidationSeverity::Warning => "!",
    };

    let mut line = format!("  [{}] {}: {}\n", marker, issue.path, issue.message);
    if let Some(suggestion) = &issue.suggestion {
        let _ = writeln!(line, "      hint: {}", suggestion);
    }
    line
}

/// One-line summary used in startup logs.
pub fn summary(result: &ValidationResult) -> String {
    let errors = result.error_count();
    let warnings = result.warnings().count();

    match (errors, warnings) {
        (0, 0) => "Configuration valid".to_string(),
        (0, w) => format!("Configuration valid with {} warning(s)", w),
        (e, w) => format!("Configuration rejected: {} error(s), {} warning(s)", e, w),
    }
}
