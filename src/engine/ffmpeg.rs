//! FFmpeg subprocess engine.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::probe::{parse_probe_output, PROBE_ARGS};
use super::{CodecSelection, TranscodeOutput, TranscodingEngine};
use crate::config::model::EngineConfig;
use crate::error::EngineError;
use crate::pipeline::result::VideoMetadata;
use crate::queue::job::QualityPreset;

/// Longest stderr excerpt kept in an error.
const STDERR_TAIL_BYTES: usize = 2048;

/// Engine backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegEngine {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    speed_preset: String,
}

impl FfmpegEngine {
    /// Creates an engine from configuration.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
            ffprobe: config.ffprobe_path.clone(),
            speed_preset: config.speed_preset.clone(),
        }
    }

    async fn probe_path(
        &self,
        input: &str,
        cancel: &CancellationToken,
    ) -> Result<VideoMetadata, EngineError> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(PROBE_ARGS).arg(input);

        let output = run(cmd, cancel).await?;
        if !output.status.success() {
            return Err(EngineError::ProbeFailed(stderr_tail(&output.stderr)));
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::ProbeFailed(format!("Failed to parse ffprobe output: {}", e)))?;
        parse_probe_output(&json)
    }

    /// Builds the ffmpeg argument list for one variant.
    pub fn transcode_args(
        &self,
        input: &str,
        preset: &QualityPreset,
        codecs: &CodecSelection,
        output: &Path,
    ) -> Result<Vec<String>, EngineError> {
        let video_encoder = video_encoder(&codecs.video)?;
        let audio_encoder = audio_encoder(&codecs.audio)?;
        let vb = preset.video_bitrate_kbps;

        let mut args: Vec<String> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.to_string(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "0:a:0?".into(),
            "-vf".into(),
            format!("scale=-2:{}", preset.height),
            "-c:v".into(),
            video_encoder.to_string(),
        ];

        if matches!(video_encoder, "libx264" | "libx265") {
            args.push("-preset".into());
            args.push(self.speed_preset.clone());
        }

        args.extend([
            "-b:v".into(),
            format!("{}k", vb),
            "-maxrate".into(),
            format!("{}k", vb + vb / 14),
            "-bufsize".into(),
            format!("{}k", vb * 2),
            "-c:a".into(),
            audio_encoder.to_string(),
            "-b:a".into(),
            format!("{}k", preset.audio_bitrate_kbps),
            "-movflags".into(),
            "+faststart".into(),
            output.to_string_lossy().to_string(),
        ]);

        Ok(args)
    }
}

#[async_trait]
impl TranscodingEngine for FfmpegEngine {
    async fn probe(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<VideoMetadata, EngineError> {
        self.probe_path(input_arg(source), cancel).await
    }

    async fn transcode(
        &self,
        source: &str,
        preset: &QualityPreset,
        codecs: &CodecSelection,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutput, EngineError> {
        let output_path = output_dir.join(format!("{}.mp4", preset.name));
        let args = self.transcode_args(input_arg(source), preset, codecs, &output_path)?;

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(&args);
        debug!(preset = %preset.name, cmd = ?cmd, "Running FFmpeg");

        let output = run(cmd, cancel).await?;
        if !output.status.success() {
            return Err(EngineError::FfmpegFailed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr_tail(&output.stderr),
            });
        }

        let file_size = tokio::fs::metadata(&output_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if file_size == 0 {
            return Err(EngineError::VerificationFailed(format!(
                "{} is missing or empty",
                output_path.display()
            )));
        }

        let probed = self
            .probe_path(&output_path.to_string_lossy(), cancel)
            .await
            .map_err(|e| EngineError::VerificationFailed(e.to_string()))?;

        let achieved_bitrate_kbps = probed.video_bitrate_kbps.unwrap_or_else(|| {
            ((file_size as f64 * 8.0) / probed.duration_seconds / 1000.0).round() as u32
        });

        info!(
            preset = %preset.name,
            file_size,
            bitrate_kbps = achieved_bitrate_kbps,
            "Variant transcoded"
        );

        Ok(TranscodeOutput {
            path: output_path,
            achieved_bitrate_kbps,
            codec: probed.video_codec,
            file_size,
            width: probed.width,
            height: probed.height,
        })
    }

    async fn extract_frame(
        &self,
        source: &str,
        at_seconds: f64,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]);
        cmd.arg("-ss").arg(format!("{:.3}", at_seconds));
        cmd.arg("-i").arg(input_arg(source));
        cmd.args(["-frames:v", "1", "-q:v", "2"]);
        cmd.arg(output);

        let result = run(cmd, cancel).await?;
        if !result.status.success() {
            return Err(EngineError::FfmpegFailed {
                code: result.status.code().unwrap_or(-1),
                stderr: stderr_tail(&result.stderr),
            });
        }
        Ok(())
    }
}

/// Runs a command to completion unless `cancel` fires first.
///
/// The child is killed when its future is dropped, so a cancelled or
/// timed-out caller never leaves an orphaned process behind.
async fn run(mut cmd: Command, cancel: &CancellationToken) -> Result<Output, EngineError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| EngineError::SpawnFailed(e.to_string()))?;

    tokio::select! {
        output = child.wait_with_output() => {
            output.map_err(|e| EngineError::SpawnFailed(e.to_string()))
        }
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
    }
}

/// Local paths are passed without their `file://` scheme.
fn input_arg(source: &str) -> &str {
    source.strip_prefix("file://").unwrap_or(source)
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Maps a codec name to an FFmpeg video encoder.
fn video_encoder(codec: &str) -> Result<&'static str, EngineError> {
    match codec.to_lowercase().as_str() {
        "h264" | "avc" | "libx264" => Ok("libx264"),
        "h265" | "hevc" | "libx265" => Ok("libx265"),
        "vp9" | "libvpx-vp9" => Ok("libvpx-vp9"),
        "av1" | "libsvtav1" => Ok("libsvtav1"),
        other => Err(EngineError::UnsupportedCodec(other.to_string())),
    }
}

/// Maps a codec name to an FFmpeg audio encoder.
fn audio_encoder(codec: &str) -> Result<&'static str, EngineError> {
    match codec.to_lowercase().as_str() {
        "aac" => Ok("aac"),
        "opus" | "libopus" => Ok("libopus"),
        "mp3" | "libmp3lame" => Ok("libmp3lame"),
        other => Err(EngineError::UnsupportedCodec(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn engine() -> FfmpegEngine {
        FfmpegEngine::new(&EngineConfig::default())
    }

    fn codecs(video: &str, audio: &str) -> CodecSelection {
        CodecSelection {
            video: video.to_string(),
            audio: audio.to_string(),
        }
    }

    #[test]
    fn transcode_args_scale_to_preset_height() {
        let preset = QualityPreset::new("720p", 1280, 720, 2800, 128);
        let args = engine()
            .transcode_args("/in/a.mp4", &preset, &codecs("h264", "aac"), Path::new("/out/720p.mp4"))
            .unwrap();

        let joined = args.join(" ");
        assert!(joined.contains("-i /in/a.mp4"));
        assert!(joined.contains("-vf scale=-2:720"));
        assert!(joined.contains("-c:v libx264 -preset veryfast"));
        assert!(joined.contains("-b:v 2800k"));
        assert!(joined.contains("-b:a 128k"));
        assert_eq!(args.last().map(String::as_str), Some("/out/720p.mp4"));
    }

    #[test]
    fn speed_preset_only_applies_to_x26x() {
        let preset = QualityPreset::new("360p", 640, 360, 800, 96);
        let args = engine()
            .transcode_args("in.mp4", &preset, &codecs("vp9", "opus"), Path::new("o.webm"))
            .unwrap();

        assert!(args.contains(&"libvpx-vp9".to_string()));
        assert!(args.contains(&"libopus".to_string()));
        assert!(!args.contains(&"-preset".to_string()));
    }

    #[test]
    fn unknown_codec_is_rejected() {
        let preset = QualityPreset::new("360p", 640, 360, 800, 96);
        let err = engine()
            .transcode_args("in.mp4", &preset, &codecs("theora", "aac"), Path::new("o.mp4"))
            .unwrap_err();

        assert!(matches!(err, EngineError::UnsupportedCodec(c) if c == "theora"));
    }

    #[test]
    fn file_scheme_is_stripped() {
        assert_eq!(input_arg("file:///data/in.mp4"), "/data/in.mp4");
        assert_eq!(input_arg("https://cdn/in.mp4"), "https://cdn/in.mp4");
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES) + "final error";
        let tail = stderr_tail(long.as_bytes());

        assert_eq!(tail.len(), STDERR_TAIL_BYTES);
        assert!(tail.ends_with("final error"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_a_running_process() {
        let cancel = CancellationToken::new();
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = run(cmd, &cancel).await;

        assert!(matches!(result, Err(EngineError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
