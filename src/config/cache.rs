//! Preset catalog fingerprint shared through Redis.
//!
//! Horizontally scaled workers should transcode with the same catalog. Each
//! instance publishes a hash of its catalog at startup and warns when it
//! replaces a different one.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::queue::job::QualityPreset;

const FINGERPRINT_KEY: &str = "transcode:config:fingerprint";
const FINGERPRINT_TIMESTAMP_KEY: &str = "transcode:config:published_at";

/// How this instance's catalog relates to the one previously published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintStatus {
    /// Nothing was published before.
    First,
    /// The published catalog is identical.
    Matched,
    /// Another instance published a different catalog.
    Drifted { previous: String },
}

/// SHA-256 of the catalog as canonical JSON.
pub fn fingerprint(presets: &[QualityPreset]) -> Result<String, ConfigError> {
    let json = serde_json::to_string(presets).map_err(|e| ConfigError::CacheFailed(e.to_string()))?;
    Ok(compute_hash(&json))
}

fn compare(previous: Option<String>, current: &str) -> FingerprintStatus {
    match previous {
        None => FingerprintStatus::First,
        Some(previous) if previous == current => FingerprintStatus::Matched,
        Some(previous) => FingerprintStatus::Drifted { previous },
    }
}

/// Publishes this instance's catalog fingerprint, overwriting any previous one.
pub async fn publish_fingerprint(
    mut redis: ConnectionManager,
    presets: &[QualityPreset],
) -> Result<FingerprintStatus, ConfigError> {
    let current = fingerprint(presets)?;

    let previous: Option<String> = redis
        .get(FINGERPRINT_KEY)
        .await
        .map_err(|e| ConfigError::CacheFailed(e.to_string()))?;

    let status = compare(previous, &current);
    match &status {
        FingerprintStatus::Drifted { previous } => warn!(
            previous = %previous,
            current = %current,
            "Preset catalog differs from the one published by another worker"
        ),
        _ => info!(fingerprint = %current, "Published preset catalog fingerprint"),
    }

    redis
        .set::<_, _, ()>(FINGERPRINT_KEY, &current)
        .await
        .map_err(|e| ConfigError::CacheFailed(e.to_string()))?;

    redis
        .set::<_, _, ()>(FINGERPRINT_TIMESTAMP_KEY, Utc::now().timestamp())
        .await
        .map_err(|e| ConfigError::CacheFailed(e.to_string()))?;

    Ok(status)
}

fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
