//! Periodic queue depth sampling.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::prometheus::Metrics;
use crate::queue::JobQueue;

/// Samples queue and dead-letter sizes into gauges until `shutdown` fires.
///
/// A failed sample is logged and skipped; the loop keeps running.
pub async fn run_queue_sampler(
    queue: Arc<dyn JobQueue>,
    metrics: Arc<Metrics>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(100)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Queue sampler stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match queue.size().await {
            Ok(depth) => metrics.set_queue_depth(depth),
            Err(e) => warn!(error = %e, "Failed to sample queue depth"),
        }
        match queue.dead_letter_size().await {
            Ok(count) => metrics.set_dead_letter_count(count),
            Err(e) => warn!(error = %e, "Failed to sample dead letter count"),
        }
    }
}
