//! Discord webhook notifications.

use std::time::Duration;

use serde::Serialize;
use tracing::{error, info};

use crate::config::model::{DiscordConfig, DiscordEvents};
use crate::error::NotificationError;
use crate::pipeline::result::ProcessingResult;
use crate::queue::job::JobDescriptor;

/// Sends notifications to Discord via webhook.
pub struct DiscordNotifier {
    webhook_url: String,
    events: DiscordEvents,
    mention_on_failure: Option<String>,
    client: reqwest::Client,
}

impl DiscordNotifier {
    /// Creates a new Discord notifier from config.
    pub fn new(config: &DiscordConfig) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            webhook_url: config.webhook_url.clone(),
            events: config.events.clone(),
            mention_on_failure: config.mention_on_failure.clone(),
            client,
        })
    }

    /// Notifies about a completed job.
    pub async fn notify_completed(
        &self,
        job: &JobDescriptor,
        result: &ProcessingResult,
        degraded: bool,
    ) -> Result<(), NotificationError> {
        if !self.events.on_completed {
            return Ok(());
        }

        let variants = result
            .variants
            .iter()
            .map(|v| v.quality.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let embed = DiscordEmbed {
            title: if degraded {
                "Transcode Completed (degraded)".to_string()
            } else {
                "Transcode Completed".to_string()
            },
            color: if degraded { 0xFFA500 } else { 0x00FF00 },
            fields: vec![
                field("File", &job.original_file_name, false),
                field("Video ID", &job.video_id, true),
                field("Variants", if variants.is_empty() { "none" } else { &variants }, true),
                field(
                    "Duration",
                    &format_duration(result.processing_duration_ms as f64 / 1000.0),
                    true,
                ),
            ],
        };

        self.send_embed_with_content(embed, "").await
    }

    /// Notifies about a job that exhausted its retries.
    pub async fn notify_permanent_failure(
        &self,
        job: &JobDescriptor,
        reason: &str,
    ) -> Result<(), NotificationError> {
        if !self.events.on_permanent_failure {
            return Ok(());
        }

        let embed = DiscordEmbed {
            title: "Transcode Failed Permanently".to_string(),
            color: 0x800000,
            fields: vec![
                field("File", &job.original_file_name, false),
                field("Video ID", &job.video_id, true),
                field("Attempts", &job.attempt().to_string(), true),
                field("Reason", &truncate(reason, 1024), false),
            ],
        };

        self.send_embed_with_content(embed, self.mention()).await
    }

    /// Notifies that artifacts exist but the record was never updated.
    pub async fn notify_orphaned_success(
        &self,
        job: &JobDescriptor,
        error: &str,
    ) -> Result<(), NotificationError> {
        if !self.events.on_orphaned_success {
            return Ok(());
        }

        let embed = DiscordEmbed {
            title: "Orphaned Success".to_string(),
            color: 0xFF0000,
            fields: vec![
                field("Video ID", &job.video_id, true),
                field("User ID", &job.user_id, true),
                field("Error", &truncate(error, 1024), false),
            ],
        };

        self.send_embed_with_content(embed, self.mention()).await
    }

    fn mention(&self) -> &str {
        self.mention_on_failure.as_deref().unwrap_or("")
    }

    /// Sends an embed with optional content text.
    async fn send_embed_with_content(
        &self,
        embed: DiscordEmbed,
        content: &str,
    ) -> Result<(), NotificationError> {
        let payload = DiscordPayload {
            content: if content.is_empty() { None } else { Some(content.to_string()) },
            embeds: vec![embed],
        };

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(status = %status, body = %text, "Discord webhook failed");
            return Err(NotificationError::DiscordFailed(format!(
                "HTTP {}: {}",
                status, text
            )));
        }

        info!("Discord notification sent");
        Ok(())
    }
}

/// Discord webhook payload.
#[derive(Serialize)]
struct DiscordPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

/// Discord embed structure.
#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    color: u32,
    fields: Vec<EmbedField>,
}

/// Discord embed field.
#[derive(Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

fn field(name: &str, value: &str, inline: bool) -> EmbedField {
    EmbedField {
        name: name.to_string(),
        value: value.to_string(),
        inline,
    }
}

/// Formats a duration in seconds to a human-readable string.
fn format_duration(secs: f64) -> String {
    let hours = (secs / 3600.0) as u64;
    let minutes = ((secs % 3600.0) / 60.0) as u64;
    let seconds = (secs % 60.0) as u64;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Truncates a string to at most `max_len` bytes on a char boundary.
fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
