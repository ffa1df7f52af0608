//! Semantic validation for configuration values.

use std::collections::HashSet;

use crate::config::model::{AppConfig, GlobalConfig};
use crate::queue::job::QualityPreset;

use super::{ValidationIssue, ValidationResult};

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Speed presets understood by libx264 and libx265.
const VALID_SPEED_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower",
    "veryslow", "placebo",
];

/// Validates semantic correctness of configuration values.
pub fn validate(config: &AppConfig) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_global(&config.global, &mut result);
    validate_presets(&config.presets, &mut result);

    if !VALID_SPEED_PRESETS.contains(&config.engine.speed_preset.as_str()) {
        result.add(
            ValidationIssue::error(
                "engine.speed_preset",
                format!("Unknown speed preset: '{}'", config.engine.speed_preset),
            )
            .with_suggestion(format!(
                "Did you mean '{}'?",
                closest(&config.engine.speed_preset, VALID_SPEED_PRESETS)
            )),
        );
    }

    validate_url("storage.base_url", &config.storage.base_url, &mut result);
    validate_url("reporter.base_url", &config.reporter.base_url, &mut result);

    if config.reporter.timeout_seconds == 0 {
        result.add(ValidationIssue::error(
            "reporter.timeout_seconds",
            "Reporter timeout must be at least 1 second",
        ));
    }

    result
}

/// Validates global configuration settings.
fn validate_global(global: &GlobalConfig, result: &mut ValidationResult) {
    if !VALID_LOG_LEVELS.contains(&global.log_level.as_str()) {
        result.add(
            ValidationIssue::error("global.log_level", format!("Invalid log level: '{}'", global.log_level))
                .with_suggestion(format!("Valid levels: {}", VALID_LOG_LEVELS.join(", "))),
        );
    }

    if global.redis.port == 0 {
        result.add(ValidationIssue::error(
            "global.redis.port",
            "Redis port cannot be 0",
        ));
    }

    let worker = &global.worker;
    if worker.max_concurrent_jobs == 0 {
        result.add(ValidationIssue::error(
            "global.worker.max_concurrent_jobs",
            "At least one job must be allowed to run",
        ));
    }

    if worker.max_parallel_presets == 0 {
        result.add(ValidationIssue::error(
            "global.worker.max_parallel_presets",
            "At least one preset must be allowed to transcode",
        ));
    }

    if worker.dequeue_timeout_seconds == 0 {
        result.add(
            ValidationIssue::error(
                "global.worker.dequeue_timeout_seconds",
                "Dequeue timeout must be at least 1 second",
            )
            .with_suggestion("A zero timeout makes Redis block forever"),
        );
    }

    if worker.stage_timeout_seconds == 0 {
        result.add(ValidationIssue::error(
            "global.worker.stage_timeout_seconds",
            "Stage timeout must be at least 1 second",
        ));
    }

    if worker.max_thumbnails == 0 {
        result.add(ValidationIssue::warning(
            "global.worker.max_thumbnails",
            "No thumbnails will be extracted for any job",
        ));
    }

    if worker.consumer_name.trim().is_empty() {
        result.add(ValidationIssue::error(
            "global.worker.consumer_name",
            "Consumer name cannot be empty",
        ));
    }

    if worker.drain_timeout_seconds == Some(0) {
        result.add(
            ValidationIssue::warning(
                "global.worker.drain_timeout_seconds",
                "A zero drain timeout aborts in-flight jobs immediately on shutdown",
            )
            .with_suggestion("Omit the field to wait for in-flight jobs"),
        );
    }

    if global.retry.report_attempts == 0 {
        result.add(ValidationIssue::error(
            "global.retry.report_attempts",
            "Results must be reported at least once",
        ));
    }

    if global.prometheus.enabled {
        if global.prometheus.port == 0 {
            result.add(ValidationIssue::error(
                "global.prometheus.port",
                "Prometheus port cannot be 0 when enabled",
            ));
        }
        if global.prometheus.sample_interval_seconds == 0 {
            result.add(ValidationIssue::error(
                "global.prometheus.sample_interval_seconds",
                "Sample interval must be at least 1 second",
            ));
        }
    }

    if let Some(discord) = &global.notifications.discord {
        if !discord.webhook_url.starts_with("https://") {
            result.add(ValidationIssue::error(
                "global.notifications.discord.webhook_url",
                format!("Webhook URL must use https: '{}'", discord.webhook_url),
            ));
        }
    }
}

/// Validates the quality preset catalog.
fn validate_presets(presets: &[QualityPreset], result: &mut ValidationResult) {
    if presets.is_empty() {
        result.add(ValidationIssue::error(
            "presets",
            "Preset catalog cannot be empty",
        ));
        return;
    }

    let mut seen_names = HashSet::new();

    for (i, preset) in presets.iter().enumerate() {
        let prefix = format!("presets[{}]", i);

        if preset.name.trim().is_empty() {
            result.add(ValidationIssue::error(
                format!("{}.name", prefix),
                "Preset name cannot be empty",
            ));
        } else if !seen_names.insert(preset.name.as_str()) {
            result.add(ValidationIssue::error(
                format!("{}.name", prefix),
                format!("Duplicate preset name: '{}'", preset.name),
            ));
        }

        if preset.name.contains(['/', '\\']) {
            result.add(ValidationIssue::error(
                format!("{}.name", prefix),
                format!("Preset name '{}' is used in artifact paths and cannot contain a separator", preset.name),
            ));
        }

        for (field, value) in [("width", preset.width), ("height", preset.height)] {
            if value == 0 || value % 2 != 0 {
                result.add(
                    ValidationIssue::error(
                        format!("{}.{}", prefix, field),
                        format!("{} {} is not a positive even number", field, value),
                    )
                    .with_suggestion("H.264 and HEVC require even frame dimensions"),
                );
            }
        }

        if preset.video_bitrate_kbps == 0 {
            result.add(ValidationIssue::error(
                format!("{}.video_bitrate_kbps", prefix),
                "Video bitrate must be positive",
            ));
        }

        if preset.audio_bitrate_kbps == 0 {
            result.add(ValidationIssue::error(
                format!("{}.audio_bitrate_kbps", prefix),
                "Audio bitrate must be positive",
            ));
        }
    }

    if presets.windows(2).any(|w| w[0].height < w[1].height) {
        result.add(ValidationIssue::warning(
            "presets",
            "Presets are not ordered largest first; the manifest lists them in catalog order",
        ));
    }
}

fn validate_url(path: &str, url: &str, result: &mut ValidationResult) {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        result.add(ValidationIssue::error(
            path,
            format!("Expected an http(s) URL, got '{}'", url),
        ));
    }
}

/// Finds the most similar candidate using Levenshtein distance.
fn closest(input: &str, candidates: &[&'static str]) -> &'static str {
    let input_lower = input.to_lowercase();
    candidates
        .iter()
        .min_by_key(|candidate| strsim::levenshtein(&input_lower, candidate))
        .copied()
        .unwrap_or("veryfast")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AppConfig {
        serde_yaml::from_str(
            r#"
global:
  redis:
    host: localhost
storage:
  root: /srv/media
  base_url: https://cdn.example.com/media
reporter:
  base_url: http://records.internal/api
"#,
        )
        .unwrap()
    }

    fn paths(result: &ValidationResult) -> Vec<String> {
        result.errors().map(|i| i.path.clone()).collect()
    }

    #[test]
    fn defaults_are_valid() {
        let result = validate(&config());
        assert!(result.is_valid(), "{:?}", paths(&result));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = config();
        config.global.worker.max_concurrent_jobs = 0;
        config.global.worker.max_parallel_presets = 0;

        let result = validate(&config);
        assert_eq!(
            paths(&result),
            [
                "global.worker.max_concurrent_jobs",
                "global.worker.max_parallel_presets"
            ]
        );
    }

    #[test]
    fn disabling_thumbnails_only_warns() {
        let mut config = config();
        config.global.worker.max_thumbnails = 0;

        let result = validate(&config);
        assert!(result.is_valid());
        let warned: Vec<_> = result.warnings().map(|i| i.path.as_str()).collect();
        assert!(warned.contains(&"global.worker.max_thumbnails"));
    }

    #[test]
    fn odd_dimensions_and_duplicates_are_rejected() {
        let mut config = config();
        config.presets = vec![
            QualityPreset::new("720p", 1280, 720, 2800, 128),
            QualityPreset::new("720p", 1281, 720, 2800, 128),
        ];

        let result = validate(&config);
        assert_eq!(paths(&result), ["presets[1].name", "presets[1].width"]);
    }

    #[test]
    fn empty_catalog_is_rejected() {
        let mut config = config();
        config.presets.clear();
        assert_eq!(paths(&validate(&config)), ["presets"]);
    }

    #[test]
    fn misspelled_speed_preset_gets_a_suggestion() {
        let mut config = config();
        config.engine.speed_preset = "veryfsat".to_string();

        let result = validate(&config);
        let issue = result.errors().next().unwrap();
        assert_eq!(issue.path, "engine.speed_preset");
        assert_eq!(issue.suggestion.as_deref(), Some("Did you mean 'veryfast'?"));
    }

    #[test]
    fn non_http_urls_are_rejected() {
        let mut config = config();
        config.reporter.base_url = "records.internal".to_string();
        assert_eq!(paths(&validate(&config)), ["reporter.base_url"]);
    }

    #[test]
    fn unordered_catalog_only_warns() {
        let mut config = config();
        config.presets.reverse();

        let result = validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings().count(), 1);
    }
}
