//! Error types for the transcoding pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Message written to the video record when a job fails for good.
///
/// Internal error detail never leaves the worker.
pub const GENERIC_FAILURE_MESSAGE: &str = "Video processing failed";

/// Configuration loading and parsing errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {message}")]
    ParseFailed { path: PathBuf, message: String },

    #[error("Config validation failed with {error_count} error(s)")]
    ValidationFailed { error_count: usize },

    #[error("Failed to publish config fingerprint to Redis: {0}")]
    CacheFailed(String),
}

/// Job queue operation errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to Redis at '{url}': {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Queue backing store unavailable: {0}")]
    Unavailable(String),

    #[error("Job for video '{video_id}' is already queued")]
    Duplicate { video_id: String },

    #[error("Job not found: {video_id}")]
    JobNotFound { video_id: String },

    #[error("Job '{video_id}' has exhausted its retries ({retry_count}/{max_retries})")]
    RetriesExhausted {
        video_id: String,
        retry_count: u32,
        max_retries: u32,
    },

    #[error("Failed to serialize job: {0}")]
    SerializationFailed(String),
}

impl QueueError {
    /// Returns true if the error means the backing store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::ConnectionFailed { .. })
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(e: redis::RedisError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Transcoding engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("Source has no video stream")]
    MissingVideoStream,

    #[error("FFmpeg failed with exit code {code}: {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Output verification failed: {0}")]
    VerificationFailed(String),

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),
}

/// Storage adapter errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage path '{0}'")]
    InvalidPath(String),

    #[error("Failed to write '{path}': {message}")]
    WriteFailed { path: String, message: String },
}

/// Result reporter errors.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Record store rejected update with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    HttpFailed(#[from] reqwest::Error),

    #[error("Record store unreachable: {0}")]
    Unreachable(String),
}

/// Notification sending errors.
#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("Discord webhook failed: {0}")]
    DiscordFailed(String),

    #[error("Prometheus metrics export failed: {0}")]
    PrometheusFailed(String),

    #[error("HTTP request failed: {0}")]
    HttpFailed(#[from] reqwest::Error),
}

/// Outcome taxonomy for a single job run.
///
/// Stage functions return these to the orchestrator, which decides between
/// recording, skipping, retrying or terminally failing the job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(String),

    #[error("Metadata extraction failed: {0}")]
    MetadataExtractionFailed(String),

    #[error("Transcode failed for preset '{preset}': {message}")]
    VariantTranscodeFailed { preset: String, message: String },

    #[error("{stage} failed: {message}")]
    ThumbnailOrManifestFailed { stage: &'static str, message: String },

    #[error("No preset fits a source of height {source_height}")]
    NoEligiblePresets { source_height: u32 },

    #[error("All {attempted} variant(s) failed")]
    AllVariantsFailed { attempted: usize },

    #[error("Reporting failed after {attempts} attempt(s): {message}")]
    ReportingFailed { attempts: u32, message: String },

    #[error("Retries exhausted after {attempts} attempt(s): {last_error}")]
    PermanentFailure { attempts: u32, last_error: String },

    #[error("Scratch workspace unavailable: {0}")]
    WorkspaceUnavailable(String),

    #[error("Processing interrupted by shutdown")]
    Interrupted,

    #[error("Pipeline panicked: {0}")]
    Panicked(String),
}

impl ProcessingError {
    /// Returns true if the error ends the current attempt of the job.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::VariantTranscodeFailed { .. }
                | Self::ThumbnailOrManifestFailed { .. }
                | Self::ReportingFailed { .. }
        )
    }

    /// Returns true if another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueUnavailable(_)
                | Self::MetadataExtractionFailed(_)
                | Self::AllVariantsFailed { .. }
                | Self::WorkspaceUnavailable(_)
                | Self::Panicked(_)
        )
    }
}
