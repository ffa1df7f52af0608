//! Artifact storage.

pub mod local;

use std::path::Path;

use async_trait::async_trait;

use crate::error::StorageError;

pub use local::LocalStorage;

/// Persists artifacts and returns their public URLs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Stores `data` at the relative `path` and returns its URL.
    async fn upload(&self, data: Vec<u8>, path: &str) -> Result<String, StorageError>;

    /// Stores the local file at the relative `path` and returns its URL.
    async fn upload_file(&self, local: &Path, path: &str) -> Result<String, StorageError> {
        let data = tokio::fs::read(local)
            .await
            .map_err(|e| StorageError::WriteFailed {
                path: local.display().to_string(),
                message: e.to_string(),
            })?;
        self.upload(data, path).await
    }
}

/// Storage path of a transcoded variant.
pub fn variant_path(video_id: &str, preset: &str) -> String {
    format!("{}/variants/{}.mp4", video_id, preset)
}

/// Storage path of the `index`-th thumbnail, counted from 1.
pub fn thumbnail_path(video_id: &str, index: usize) -> String {
    format!("{}/thumbnails/{}.jpg", video_id, index)
}

/// Storage path of a per-variant media playlist.
pub fn media_playlist_path(video_id: &str, preset: &str) -> String {
    format!("{}/hls/{}.m3u8", video_id, preset)
}

/// Storage path of the master playlist.
pub fn master_playlist_path(video_id: &str) -> String {
    format!("{}/hls/master.m3u8", video_id)
}
