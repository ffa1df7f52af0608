//! Media transcoding engine.

pub mod ffmpeg;
pub mod probe;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::pipeline::result::VideoMetadata;
use crate::queue::job::{ProcessingOptions, QualityPreset};

pub use ffmpeg::FfmpegEngine;

/// Target codecs for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecSelection {
    /// Video codec name, e.g. "h264".
    pub video: String,
    /// Audio codec name, e.g. "aac".
    pub audio: String,
}

impl CodecSelection {
    /// Takes the target codecs from job options.
    pub fn from_options(options: &ProcessingOptions) -> Self {
        Self {
            video: options.target_video_codec.clone(),
            audio: options.target_audio_codec.clone(),
        }
    }
}

/// A finished variant on local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOutput {
    /// Location of the produced file.
    pub path: PathBuf,
    /// Video bitrate measured on the output.
    pub achieved_bitrate_kbps: u32,
    /// Codec of the output video stream.
    pub codec: String,
    /// Output size in bytes.
    pub file_size: u64,
    /// Frame width of the output, as measured.
    pub width: u32,
    /// Frame height of the output, as measured.
    pub height: u32,
}

/// Probes, transcodes and extracts frames from source media.
///
/// Every operation observes `cancel` and stops its subprocess once the
/// token fires.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscodingEngine: Send + Sync {
    /// Reads technical metadata from the source.
    async fn probe(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<VideoMetadata, EngineError>;

    /// Produces one quality variant in `output_dir`.
    async fn transcode(
        &self,
        source: &str,
        preset: &QualityPreset,
        codecs: &CodecSelection,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutput, EngineError>;

    /// Writes a single frame at `at_seconds` to `output` as JPEG.
    async fn extract_frame(
        &self,
        source: &str,
        at_seconds: f64,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError>;
}
