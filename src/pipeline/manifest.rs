//! HLS playlist generation.
//!
//! Each variant is a single progressive file, so every media playlist holds
//! one segment spanning the whole video. The master playlist lists the media
//! playlists by relative URI, which keeps it valid wherever the directory is
//! served from.

use std::fmt::Write;

/// One rendition listed in the master playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendition {
    /// Preset name, also used as the NAME attribute.
    pub name: String,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Peak bandwidth in bits per second.
    pub bandwidth_bps: u64,
    /// URI of the rendition's media playlist, relative to the master.
    pub uri: String,
}

/// Builds the master playlist over the given renditions.
pub fn master_playlist(renditions: &[Rendition]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-INDEPENDENT-SEGMENTS\n");

    for rendition in renditions {
        // Writing to a String cannot fail
        let _ = writeln!(
            out,
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{},NAME=\"{}\"",
            rendition.bandwidth_bps, rendition.width, rendition.height, rendition.name
        );
        let _ = writeln!(out, "{}", rendition.uri);
    }

    out
}

/// Builds a VOD media playlist with a single segment.
pub fn media_playlist(duration_seconds: f64, segment_url: &str) -> String {
    let target = duration_seconds.ceil().max(1.0) as u64;
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    let _ = writeln!(out, "#EXT-X-TARGETDURATION:{}", target);
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\n#EXT-X-PLAYLIST-TYPE:VOD\n");
    let _ = writeln!(out, "#EXTINF:{:.3},", duration_seconds);
    let _ = writeln!(out, "{}", segment_url);
    out.push_str("#EXT-X-ENDLIST\n");
    out
}
