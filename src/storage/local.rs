//! Filesystem storage served under a public base URL.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::StorageAdapter;
use crate::config::model::StorageConfig;
use crate::error::StorageError;

/// Writes artifacts under a root directory.
///
/// Files are written to a temporary sibling and renamed into place, so a
/// reader never sees a partial artifact at its final URL.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    base_url: String,
}

impl LocalStorage {
    /// Creates a storage rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Creates a storage from configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.root.clone(), config.base_url.clone())
    }

    /// Resolves a relative storage path under the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Public URL of a relative storage path.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn write_atomic(&self, target: &Path, data: &[u8]) -> Result<(), StorageError> {
        let write_failed = |e: std::io::Error| StorageError::WriteFailed {
            path: target.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }

        let staging = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, data).await.map_err(write_failed)?;
        if let Err(e) = tokio::fs::rename(&staging, target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(write_failed(e));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for LocalStorage {
    async fn upload(&self, data: Vec<u8>, path: &str) -> Result<String, StorageError> {
        let target = self.resolve(path)?;
        self.write_atomic(&target, &data).await?;
        debug!(path, bytes = data.len(), "Stored artifact");
        Ok(self.url_for(path))
    }

    async fn upload_file(&self, local: &Path, path: &str) -> Result<String, StorageError> {
        let target = self.resolve(path)?;
        let write_failed = |e: std::io::Error| StorageError::WriteFailed {
            path: target.display().to_string(),
            message: e.to_string(),
        };

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        let staging = target.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
        let bytes = tokio::fs::copy(local, &staging).await.map_err(write_failed)?;
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(write_failed(e));
        }

        debug!(path, bytes, "Stored artifact");
        Ok(self.url_for(path))
    }
}
