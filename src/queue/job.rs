//! Transcoding job definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Retries granted to a job when the producer does not say otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Represents a transcoding job in the queue.
///
/// The video id doubles as the job id: a video has at most one active job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Id of the video record this job processes.
    pub video_id: String,

    /// Owner of the video.
    pub user_id: String,

    /// Where the uploaded source can be read from.
    pub source_url: String,

    /// Filename as uploaded by the user.
    pub original_file_name: String,

    /// What the pipeline should produce.
    #[serde(default)]
    pub options: ProcessingOptions,

    /// Timestamp when the producer enqueued the job.
    #[serde(default = "Utc::now")]
    pub enqueued_at: DateTime<Utc>,

    /// Number of failed attempts that were retried.
    #[serde(default)]
    pub retry_count: u32,

    /// Maximum number of retries before the job is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Error from the most recent failed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl JobDescriptor {
    /// Creates a new job for a freshly uploaded video.
    pub fn new(
        video_id: impl Into<String>,
        user_id: impl Into<String>,
        source_url: impl Into<String>,
        original_file_name: impl Into<String>,
        options: ProcessingOptions,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            user_id: user_id.into(),
            source_url: source_url.into(),
            original_file_name: original_file_name.into(),
            options,
            enqueued_at: Utc::now(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
        }
    }

    /// Overrides the retry limit.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// One-based number of the attempt currently running.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Returns true once no further retry may be granted.
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Options controlling what the pipeline produces for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Transcode the source into quality variants.
    #[serde(default = "default_true")]
    pub generate_variants: bool,

    /// Produce an adaptive-streaming manifest over the variants.
    #[serde(default = "default_true")]
    pub generate_manifest: bool,

    /// Number of preview thumbnails to extract.
    #[serde(default = "default_thumbnail_count")]
    pub thumbnail_count: u32,

    /// Include the probed metadata in the reported result.
    #[serde(default = "default_true")]
    pub extract_metadata: bool,

    /// Video codec for the variants (e.g. "h264", "hevc").
    #[serde(default = "default_video_codec")]
    pub target_video_codec: String,

    /// Audio codec for the variants (e.g. "aac", "opus").
    #[serde(default = "default_audio_codec")]
    pub target_audio_codec: String,

    /// Presets to produce. Empty means the configured catalog.
    #[serde(default)]
    pub presets: Vec<QualityPreset>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            generate_variants: true,
            generate_manifest: true,
            thumbnail_count: default_thumbnail_count(),
            extract_metadata: true,
            target_video_codec: default_video_codec(),
            target_audio_codec: default_audio_codec(),
            presets: Vec::new(),
        }
    }
}

/// A named target quality profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityPreset {
    /// Preset name, e.g. "720p".
    pub name: String,
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
    /// Target video bitrate in kbps.
    pub video_bitrate_kbps: u32,
    /// Target audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,
}

impl QualityPreset {
    /// Creates a preset.
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        video_bitrate_kbps: u32,
        audio_bitrate_kbps: u32,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            video_bitrate_kbps,
            audio_bitrate_kbps,
        }
    }

    /// Returns true if producing this preset would not upscale the source.
    pub fn fits(&self, source_height: u32) -> bool {
        self.height <= source_height
    }

    /// Combined audio and video bitrate in bits per second.
    pub fn bandwidth_bps(&self) -> u64 {
        (self.video_bitrate_kbps as u64 + self.audio_bitrate_kbps as u64) * 1000
    }
}

fn default_true() -> bool {
    true
}

fn default_thumbnail_count() -> u32 {
    3
}

fn default_video_codec() -> String {
    "h264".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
