//! FFprobe output parsing.

use serde_json::Value;

use crate::error::EngineError;
use crate::pipeline::result::VideoMetadata;

/// Arguments that make ffprobe print format and streams as JSON.
pub const PROBE_ARGS: [&str; 6] = [
    "-v",
    "quiet",
    "-print_format",
    "json",
    "-show_format",
    "-show_streams",
];

/// Parses ffprobe JSON output into metadata.
///
/// The first video stream and the first audio stream are used. A source
/// without a positive duration or frame size is rejected.
pub fn parse_probe_output(json: &Value) -> Result<VideoMetadata, EngineError> {
    let format = json
        .get("format")
        .ok_or_else(|| EngineError::ProbeFailed("Missing format in ffprobe output".to_string()))?;
    let streams = json
        .get("streams")
        .and_then(|s| s.as_array())
        .ok_or_else(|| EngineError::ProbeFailed("Missing streams in ffprobe output".to_string()))?;

    let video = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        .ok_or(EngineError::MissingVideoStream)?;
    let audio = streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("audio"));

    let duration_seconds = string_number::<f64>(format, "duration")
        .or_else(|| string_number(video, "duration"))
        .unwrap_or(0.0);
    let width = video.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let height = video.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    if duration_seconds <= 0.0 {
        return Err(EngineError::ProbeFailed("Source has no duration".to_string()));
    }
    if width == 0 || height == 0 {
        return Err(EngineError::ProbeFailed(format!(
            "Invalid frame size {}x{}",
            width, height
        )));
    }

    let frame_rate = video
        .get("avg_frame_rate")
        .and_then(|v| v.as_str())
        .and_then(parse_frame_rate)
        .or_else(|| {
            video
                .get("r_frame_rate")
                .and_then(|v| v.as_str())
                .and_then(parse_frame_rate)
        })
        .unwrap_or(0.0);

    Ok(VideoMetadata {
        duration_seconds,
        width,
        height,
        frame_rate,
        video_codec: video
            .get("codec_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        video_bitrate_kbps: string_number::<u64>(video, "bit_rate")
            .or_else(|| string_number(format, "bit_rate"))
            .map(to_kbps),
        audio_codec: audio
            .and_then(|a| a.get("codec_name"))
            .and_then(|v| v.as_str())
            .map(String::from),
        audio_bitrate_kbps: audio
            .and_then(|a| string_number::<u64>(a, "bit_rate"))
            .map(to_kbps),
        audio_channels: audio
            .and_then(|a| a.get("channels"))
            .and_then(|v| v.as_u64())
            .map(|c| c as u8),
        file_size: string_number(format, "size").unwrap_or(0),
    })
}

/// Parses a rational frame rate such as "30000/1001".
pub fn parse_frame_rate(value: &str) -> Option<f64> {
    let (num, den) = match value.split_once('/') {
        Some((n, d)) => (n.parse::<f64>().ok()?, d.parse::<f64>().ok()?),
        None => (value.parse::<f64>().ok()?, 1.0),
    };
    if den == 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

// ffprobe reports most numbers as JSON strings
fn string_number<T: std::str::FromStr>(value: &Value, key: &str) -> Option<T> {
    value.get(key).and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
}

fn to_kbps(bits_per_second: u64) -> u32 {
    (bits_per_second / 1000) as u32
}
