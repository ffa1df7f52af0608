//! Notification system for Discord webhooks and Prometheus metrics.

pub mod discord;
pub mod prometheus;
pub mod sampler;

use std::sync::Arc;

use tracing::warn;

use crate::pipeline::result::ProcessingResult;
use crate::queue::job::JobDescriptor;

pub use discord::DiscordNotifier;
pub use prometheus::{Metrics, MetricsServer};
pub use sampler::run_queue_sampler;

/// Optional observers of job outcomes.
///
/// Delivery is best effort: failures are logged and never reach the caller.
#[derive(Clone, Default)]
pub struct Notifiers {
    pub metrics: Option<Arc<Metrics>>,
    pub discord: Option<Arc<DiscordNotifier>>,
}

impl Notifiers {
    /// Records a finished attempt.
    pub fn record_job(&self, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_job(outcome);
        }
    }

    /// Records variant counts and duration of one pipeline run.
    pub fn record_run(&self, succeeded: usize, failed: usize, duration_ms: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_variants(succeeded, failed);
            metrics.observe_duration(duration_ms);
        }
    }

    /// Publishes the number of jobs in flight.
    pub fn set_in_flight(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_jobs_in_flight(count);
        }
    }

    /// A job completed and its result was recorded.
    pub async fn completed(&self, job: &JobDescriptor, result: &ProcessingResult, degraded: bool) {
        if let Some(discord) = &self.discord {
            if let Err(e) = discord.notify_completed(job, result, degraded).await {
                warn!(video_id = %job.video_id, error = %e, "Completion notification failed");
            }
        }
    }

    /// A job left rotation for good.
    pub async fn permanent_failure(&self, job: &JobDescriptor, reason: &str) {
        if let Some(discord) = &self.discord {
            if let Err(e) = discord.notify_permanent_failure(job, reason).await {
                warn!(video_id = %job.video_id, error = %e, "Failure notification failed");
            }
        }
    }

    /// A job succeeded but its result could not be recorded.
    pub async fn orphaned_success(&self, job: &JobDescriptor, error: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_orphaned_success();
        }
        if let Some(discord) = &self.discord {
            if let Err(e) = discord.notify_orphaned_success(job, error).await {
                warn!(video_id = %job.video_id, error = %e, "Orphaned success notification failed");
            }
        }
    }
}
