//! Processing result payloads.

use serde::{Deserialize, Serialize};

/// Technical metadata probed from a source video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    /// Duration in seconds.
    pub duration_seconds: f64,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Frames per second.
    pub frame_rate: f64,
    /// Video codec name.
    pub video_codec: String,
    /// Video bitrate in kbps, when the container reports it.
    pub video_bitrate_kbps: Option<u32>,
    /// Audio codec name, if the source has audio.
    pub audio_codec: Option<String>,
    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: Option<u32>,
    /// Number of audio channels.
    pub audio_channels: Option<u8>,
    /// File size in bytes.
    pub file_size: u64,
}

/// One produced quality variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantResult {
    /// Preset name the variant was produced for.
    pub quality: String,
    /// Public URL of the stored artifact.
    pub url: String,
    /// Artifact size in bytes.
    pub file_size: u64,
    /// Bitrate the encoder actually achieved.
    pub bitrate_kbps: u32,
    /// Codec of the produced video stream.
    pub codec: String,
}

/// Final outcome of a job, as written to the video record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VideoMetadata>,
    pub variants: Vec<VariantResult>,
    pub thumbnail_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    pub processing_duration_ms: u64,
}

impl ProcessingResult {
    /// A failed result carrying only a user-facing message.
    pub fn failure(message: impl Into<String>, processing_duration_ms: u64) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            metadata: None,
            variants: Vec::new(),
            thumbnail_urls: Vec::new(),
            manifest_url: None,
            processing_duration_ms,
        }
    }

    /// Record status implied by this result.
    pub fn record_status(&self) -> &'static str {
        if self.success {
            "ready"
        } else {
            "failed"
        }
    }
}
