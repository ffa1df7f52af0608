//! Configuration validation system.

pub mod report;
pub mod semantic;

use std::collections::HashSet;
use std::path::Path;

use crate::config::model::AppConfig;

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Blocks configuration loading.
    Error,
    /// Logged but allows loading.
    Warning,
}

/// A validation issue found during configuration checking.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue.
    pub severity: ValidationSeverity,
    /// Path to the problematic config field (e.g., "presets[2].height").
    pub path: String,
    /// Description of the issue.
    pub message: String,
    /// Optional suggestion for fixing the issue.
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Creates a new error-level validation issue.
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Error,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Creates a new warning-level validation issue.
    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: ValidationSeverity::Warning,
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Adds a suggestion to this validation issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// Result of validating a configuration.
#[derive(Debug, Default)]
pub struct ValidationResult {
    issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Creates an empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Adds an issue to the result.
    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Extends the result with issues from another result.
    pub fn extend(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }

    /// Returns true if there are no errors (warnings are allowed).
    pub fn is_valid(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == ValidationSeverity::Error)
    }

    /// Returns an iterator over error-level issues.
    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Error)
    }

    /// Returns an iterator over warning-level issues.
    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == ValidationSeverity::Warning)
    }

    /// Returns the number of errors.
    pub fn error_count(&self) -> usize {
        self.errors().count()
    }
}

/// Host facts the configuration is checked against.
#[derive(Debug, Clone)]
pub struct SystemCapabilities {
    /// Logical CPUs available to this process.
    pub cpu_count: usize,
    /// FFmpeg encoders, or `None` when ffmpeg could not be queried.
    pub ffmpeg_encoders: Option<HashSet<String>>,
}

impl SystemCapabilities {
    /// Detects capabilities by querying the host and `ffmpeg -encoders`.
    pub fn detect(ffmpeg: &Path) -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let ffmpeg_encoders = std::process::Command::new(ffmpeg)
            .args(["-encoders", "-hide_banner"])
            .output()
            .ok()
            .filter(|output| output.status.success())
            .map(|output| parse_ffmpeg_codec_list(&String::from_utf8_lossy(&output.stdout)));

        Self {
            cpu_count,
            ffmpeg_encoders,
        }
    }
}

/// Parses FFmpeg encoder list output into a set of codec names.
fn parse_ffmpeg_codec_list(output: &str) -> HashSet<String> {
    let mut codecs = HashSet::new();

    // The legend above the "------" rule uses the same flag layout as the entries
    let entries = output
        .lines()
        .skip_while(|line| !line.trim().starts_with("---"))
        .skip(1);

    for line in entries {
        // Lines look like: " V....D libx264              libx264 H.264 / AVC ..."
        let mut parts = line.split_whitespace();
        if let (Some(flags), Some(name)) = (parts.next(), parts.next()) {
            if flags.len() == 6 && matches!(flags.chars().next(), Some('V' | 'A' | 'S')) {
                codecs.insert(name.to_string());
            }
        }
    }

    codecs
}

/// Encoders the default job options rely on.
const DEFAULT_ENCODERS: [&str; 2] = ["libx264", "aac"];

/// Validates the configuration against host capabilities.
pub fn validate_config(config: &AppConfig, capabilities: &SystemCapabilities) -> ValidationResult {
    let mut result = semantic::validate(config);

    let worker = &config.global.worker;
    let transcodes = worker.max_concurrent_jobs * worker.max_parallel_presets.max(1);
    if transcodes > capabilities.cpu_count {
        result.add(
            ValidationIssue::warning(
                "global.worker",
                format!(
                    "{} concurrent jobs x {} parallel presets = {} transcodes on {} CPU(s)",
                    worker.max_concurrent_jobs,
                    worker.max_parallel_presets,
                    transcodes,
                    capabilities.cpu_count
                ),
            )
            .with_suggestion("Each transcode is CPU-bound; lower max_concurrent_jobs or max_parallel_presets"),
        );
    }

    match &capabilities.ffmpeg_encoders {
        None => result.add(
            ValidationIssue::warning(
                "engine.ffmpeg_path",
                format!("Could not run '{}'", config.engine.ffmpeg_path.display()),
            )
            .with_suggestion("Install ffmpeg or set engine.ffmpeg_path"),
        ),
        Some(encoders) => {
            for name in DEFAULT_ENCODERS {
                if !encoders.contains(name) {
                    result.add(ValidationIssue::warning(
                        "engine.ffmpeg_path",
                        format!("FFmpeg build lacks the '{}' encoder used by default", name),
                    ));
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoder_list_is_parsed() {
        let output = "Encoders:\n V..... = Video\n ------\n V....D libx264              libx264 H.264\n A....D aac                  AAC (Advanced Audio Coding)\n";
        let codecs = parse_ffmpeg_codec_list(output);

        assert!(codecs.contains("libx264"));
        assert!(codecs.contains("aac"));
        assert_eq!(codecs.len(), 2);
    }

    #[test]
    fn encoder_legend_is_not_mistaken_for_entries() {
        let output = concat!(
            "Encoders:\n",
            " V..... = Video\n",
            " A..... = Audio\n",
            " S..... = Subtitle\n",
            " .F.... = Frame-level multithreading\n",
            " ------\n",
            " V....D libx265              libx265 H.265 / HEVC\n",
        );
        let codecs = parse_ffmpeg_codec_list(output);

        assert!(!codecs.contains("="));
        assert_eq!(codecs.into_iter().collect::<Vec<_>>(), ["libx265"]);
    }

    #[test]
    fn listing_without_a_rule_yields_nothing() {
        assert!(parse_ffmpeg_codec_list("ffmpeg: command not found\n").is_empty());
    }
}
