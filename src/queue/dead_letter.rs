//! Retry decisions and dead letter handling.

use tracing::debug;

use super::job::JobDescriptor;
use super::JobQueue;
use crate::error::{ProcessingError, QueueError};

/// What should happen to a job whose attempt failed fatally.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Run again; the job already carries the incremented retry count.
    Retryable(JobDescriptor),
    /// Leave the active rotation for good.
    Terminal(JobDescriptor),
}

/// Decides between another attempt and permanent failure.
///
/// Pure: no queue is touched, so the transition can be tested on its own.
pub fn decide(mut job: JobDescriptor, error: &ProcessingError) -> RetryDecision {
    job.last_error = Some(error.to_string());

    if error.is_retryable() && !job.retries_exhausted() {
        job.retry_count += 1;
        RetryDecision::Retryable(job)
    } else {
        RetryDecision::Terminal(job)
    }
}

/// Applies retry decisions against a queue.
pub struct DeadLetterHandler<'a> {
    queue: &'a dyn JobQueue,
}

impl<'a> DeadLetterHandler<'a> {
    /// Creates a new dead letter handler.
    pub fn new(queue: &'a dyn JobQueue) -> Self {
        Self { queue }
    }

    /// Handles a failed job, either requeueing it or moving it to dead letter.
    pub async fn handle_failure(
        &self,
        job: JobDescriptor,
        error: &ProcessingError,
    ) -> Result<FailureAction, QueueError> {
        match decide(job, error) {
            RetryDecision::Retryable(job) => {
                self.queue.requeue(&job).await?;
                Ok(FailureAction::Retrying {
                    retry_count: job.retry_count,
                    max_retries: job.max_retries,
                })
            }
            RetryDecision::Terminal(job) => {
                let attempts = job.attempt();
                let reason = ProcessingError::PermanentFailure {
                    attempts,
                    last_error: error.to_string(),
                };
                debug!(video_id = %job.video_id, %reason, "Dead-lettering job");
                self.queue.dead_letter(&job, &reason.to_string()).await?;
                Ok(FailureAction::DeadLettered { job, reason })
            }
        }
    }
}

/// Result of handling a job failure.
#[derive(Debug)]
pub enum FailureAction {
    /// Job went back on the queue.
    Retrying { retry_count: u32, max_retries: u32 },
    /// Job was moved to the dead-letter list.
    DeadLettered {
        job: JobDescriptor,
        reason: ProcessingError,
    },
}
