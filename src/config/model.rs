//! Configuration data structures.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::job::QualityPreset;

/// Root configuration structure containing all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global application settings.
    pub global: GlobalConfig,

    /// Transcoding engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Artifact storage settings.
    pub storage: StorageConfig,

    /// Video record reporter settings.
    pub reporter: ReporterConfig,

    /// Ordered quality preset catalog, largest first.
    #[serde(default = "default_presets")]
    pub presets: Vec<QualityPreset>,
}

/// Global application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Scratch directory for per-job intermediate files.
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Redis connection settings.
    pub redis: RedisConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry settings for failed jobs and result reporting.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Notification settings.
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Redis connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis server hostname.
    #[serde(default = "default_redis_host")]
    pub host: String,

    /// Redis server port.
    #[serde(default = "default_redis_port")]
    pub port: u16,

    /// Redis database number.
    #[serde(default)]
    pub db: u8,

    /// Optional Redis password.
    #[serde(default)]
    pub password: Option<String>,
}

impl RedisConfig {
    /// Builds the connection URL for this configuration.
    pub fn url(&self) -> String {
        match &self.password {
            Some(pass) => format!("redis://:{}@{}:{}/{}", pass, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum number of jobs processed at once (N).
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Maximum number of presets transcoded at once within one job (M).
    #[serde(default = "default_max_parallel_presets")]
    pub max_parallel_presets: usize,

    /// Seconds to sleep after finding the queue empty.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,

    /// Seconds a dequeue may block waiting for a job.
    #[serde(default = "default_dequeue_timeout")]
    pub dequeue_timeout_seconds: u64,

    /// Seconds to back off after the queue store reports an error.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_seconds: u64,

    /// Upper bound in seconds for any single stage or external call.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: u64,

    /// Most thumbnails extracted per job. Larger requests are clamped.
    #[serde(default = "default_max_thumbnails")]
    pub max_thumbnails: u32,

    /// Seconds to wait for in-flight jobs on shutdown before aborting them.
    /// Unset means wait for as long as they take.
    #[serde(default)]
    pub drain_timeout_seconds: Option<u64>,

    /// Stable name of this worker instance, used to key its in-flight list.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
}

impl WorkerConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Dequeue timeout as a duration.
    pub fn dequeue_timeout(&self) -> Duration {
        Duration::from_secs(self.dequeue_timeout_seconds)
    }

    /// Error backoff as a duration.
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_seconds)
    }

    /// Stage timeout as a duration.
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_seconds)
    }

    /// Drain timeout as a duration, if bounded.
    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_seconds.map(Duration::from_secs)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries granted to jobs that do not carry their own limit.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Attempts made to deliver a result to the record store.
    #[serde(default = "default_report_attempts")]
    pub report_attempts: u32,

    /// Base backoff in milliseconds between report attempts (doubles each time).
    #[serde(default = "default_report_backoff_ms")]
    pub report_backoff_ms: u64,
}

/// Transcoding engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path or name of the ffmpeg binary.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: PathBuf,

    /// Path or name of the ffprobe binary.
    #[serde(default = "default_ffprobe")]
    pub ffprobe_path: PathBuf,

    /// x264/x265 speed preset passed to ffmpeg.
    #[serde(default = "default_speed_preset")]
    pub speed_preset: String,
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory artifacts are written under.
    pub root: PathBuf,

    /// Public URL prefix that maps onto `root`.
    pub base_url: String,
}

/// Video record reporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterConfig {
    /// Base URL of the video record service.
    pub base_url: String,

    /// Optional bearer token sent with every request.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_reporter_timeout")]
    pub timeout_seconds: u64,
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Whether to enable Prometheus metrics endpoint.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port for the Prometheus metrics HTTP server.
    #[serde(default = "default_prometheus_port")]
    pub port: u16,

    /// Seconds between queue depth samples.
    #[serde(default = "default_sample_interval")]
    pub sample_interval_seconds: u64,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    /// Discord webhook settings.
    #[serde(default)]
    pub discord: Option<DiscordConfig>,
}

/// Discord webhook configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    /// Discord webhook URL.
    pub webhook_url: String,

    /// Which events trigger notifications.
    #[serde(default)]
    pub events: DiscordEvents,

    /// Optional user ID to mention on failures.
    #[serde(default)]
    pub mention_on_failure: Option<String>,
}

/// Discord notification event toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordEvents {
    /// Notify when a job completes.
    #[serde(default)]
    pub on_completed: bool,

    /// Notify when a job exhausts its retries.
    #[serde(default = "default_true")]
    pub on_permanent_failure: bool,

    /// Notify when a result could not be written to the record store.
    #[serde(default = "default_true")]
    pub on_orphaned_success: bool,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/transcode_pipeline")
}

fn default_redis_host() -> String {
    "redis".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_max_parallel_presets() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    5
}

fn default_dequeue_timeout() -> u64 {
    5
}

fn default_error_backoff() -> u64 {
    10
}

fn default_stage_timeout() -> u64 {
    1800
}

fn default_max_thumbnails() -> u32 {
    20
}

fn default_consumer_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "worker-0".to_string())
}

fn default_max_retries() -> u32 {
    3
}

fn default_report_attempts() -> u32 {
    3
}

fn default_report_backoff_ms() -> u64 {
    500
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_speed_preset() -> String {
    "veryfast".to_string()
}

fn default_reporter_timeout() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

fn default_sample_interval() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

/// The stock 1080p/720p/480p/360p ladder.
pub fn default_presets() -> Vec<QualityPreset> {
    vec![
        QualityPreset::new("1080p", 1920, 1080, 5000, 192),
        QualityPreset::new("720p", 1280, 720, 2800, 128),
        QualityPreset::new("480p", 854, 480, 1400, 128),
        QualityPreset::new("360p", 640, 360, 800, 96),
    ]
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            max_parallel_presets: default_max_parallel_presets(),
            poll_interval_seconds: default_poll_interval(),
            dequeue_timeout_seconds: default_dequeue_timeout(),
            error_backoff_seconds: default_error_backoff(),
            stage_timeout_seconds: default_stage_timeout(),
            max_thumbnails: default_max_thumbnails(),
            drain_timeout_seconds: None,
            consumer_name: default_consumer_name(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            report_attempts: default_report_attempts(),
            report_backoff_ms: default_report_backoff_ms(),
        }
    }
}

impl RetryConfig {
    /// Base report backoff as a duration.
    pub fn report_backoff(&self) -> Duration {
        Duration::from_millis(self.report_backoff_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg(),
            ffprobe_path: default_ffprobe(),
            speed_preset: default_speed_preset(),
        }
    }
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_prometheus_port(),
            sample_interval_seconds: default_sample_interval(),
        }
    }
}

impl Default for DiscordEvents {
    fn default() -> Self {
        Self {
            on_completed: false,
            on_permanent_failure: true,
            on_orphaned_success: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
global:
  redis:
    host: localhost
storage:
  root: /srv/media
  base_url: https://cdn.example.com/media
reporter:
  base_url: http://records.internal/api
"#;

    #[test]
    fn minimal_config_fills_defaults() {
        let config: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();

        assert_eq!(config.global.worker.max_concurrent_jobs, 2);
        assert_eq!(config.global.worker.max_parallel_presets, 2);
        assert_eq!(config.global.worker.max_thumbnails, 20);
        assert_eq!(config.global.worker.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.global.worker.drain_timeout(), None);
        assert_eq!(config.global.retry.max_retries, 3);
        assert_eq!(config.global.redis.port, 6379);

        let names: Vec<_> = config.presets.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["1080p", "720p", "480p", "360p"]);
    }

    #[test]
    fn redis_url_includes_password_when_set() {
        let mut redis = RedisConfig {
            host: "cache".to_string(),
            port: 6380,
            db: 2,
            password: None,
        };
        assert_eq!(redis.url(), "redis://cache:6380/2");

        redis.password = Some("hunter2".to_string());
        assert_eq!(redis.url(), "redis://:hunter2@cache:6380/2");
    }
}
