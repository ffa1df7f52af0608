//! Executes a single dequeued job end to end.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ProcessingError, GENERIC_FAILURE_MESSAGE};
use crate::notify::Notifiers;
use crate::pipeline::{JobOutcome, JobProcessor, ProcessingResult};
use crate::queue::dead_letter::{DeadLetterHandler, FailureAction};
use crate::queue::{JobDescriptor, JobQueue};
use crate::report::{deliver, ResultReporter};

/// How a job attempt ended, from the queue's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum RunSummary {
    /// Artifacts produced. `orphaned` when the record could not be updated.
    Completed { degraded: bool, orphaned: bool },
    /// Requeued for another attempt.
    Retrying { retry_count: u32 },
    /// Moved to the dead-letter list and reported as failed.
    PermanentlyFailed { reason: ProcessingError },
    /// Handed back to the queue untouched because of shutdown.
    Released,
    /// The queue could not be updated; the job stays in flight until recovery.
    Stranded { error: ProcessingError },
}

/// Report delivery settings.
#[derive(Debug, Clone, Copy)]
pub struct ReportPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

/// Runs jobs through the pipeline and settles them with the queue.
pub struct JobRunner {
    queue: Arc<dyn JobQueue>,
    processor: Arc<JobProcessor>,
    reporter: Arc<dyn ResultReporter>,
    notifiers: Notifiers,
    report: ReportPolicy,
}

impl JobRunner {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        processor: Arc<JobProcessor>,
        reporter: Arc<dyn ResultReporter>,
        notifiers: Notifiers,
        report: ReportPolicy,
    ) -> Self {
        Self {
            queue,
            processor,
            reporter,
            notifiers,
            report,
        }
    }

    /// Processes `job` and records the outcome. Never panics outward.
    pub async fn execute(&self, job: JobDescriptor, abort: &CancellationToken) -> RunSummary {
        info!(
            video_id = %job.video_id,
            attempt = job.attempt(),
            max_retries = job.max_retries,
            "Processing job"
        );

        if let Err(e) = self.reporter.mark_processing(&job.video_id).await {
            warn!(video_id = %job.video_id, error = %e, "Failed to mark record as processing");
        }

        let run = AssertUnwindSafe(self.processor.process(&job, abort))
            .catch_unwind()
            .await;

        let outcome = match run {
            Ok(outcome) => outcome,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(video_id = %job.video_id, panic = %message, "Pipeline panicked");
                return self
                    .settle_failure(job, ProcessingError::Panicked(message), 0)
                    .await;
            }
        };

        self.notifiers.record_run(
            outcome.result.variants.len(),
            outcome.attempted_presets.saturating_sub(outcome.result.variants.len()),
            outcome.result.processing_duration_ms,
        );

        match outcome.error.clone() {
            None => self.settle_success(job, outcome).await,
            Some(ProcessingError::Interrupted) => self.release(job).await,
            Some(e) => {
                self.settle_failure(job, e, outcome.result.processing_duration_ms)
                    .await
            }
        }
    }

    async fn settle_success(&self, job: JobDescriptor, outcome: JobOutcome) -> RunSummary {
        let degraded = outcome.is_degraded();
        for issue in &outcome.issues {
            warn!(video_id = %job.video_id, issue = %issue, "Completed with issue");
        }

        let orphaned = match deliver(
            self.reporter.as_ref(),
            &job.video_id,
            &outcome.result,
            self.report.attempts,
            self.report.backoff,
        )
        .await
        {
            Ok(_) => false,
            Err(e) => {
                error!(
                    video_id = %job.video_id,
                    user_id = %job.user_id,
                    variants = outcome.result.variants.len(),
                    error = %e,
                    "Orphaned success: artifacts stored but record not updated"
                );
                self.notifiers.orphaned_success(&job, &e.to_string()).await;
                true
            }
        };

        if let Err(e) = self.queue.complete(&job).await {
            error!(video_id = %job.video_id, error = %e, "Failed to mark job complete");
        }

        self.notifiers.record_job(match (orphaned, degraded) {
            (true, _) => "orphaned",
            (false, true) => "degraded",
            (false, false) => "completed",
        });
        if !orphaned {
            self.notifiers.completed(&job, &outcome.result, degraded).await;
        }

        info!(
            video_id = %job.video_id,
            variants = outcome.result.variants.len(),
            degraded,
            orphaned,
            duration_ms = outcome.result.processing_duration_ms,
            "Job completed"
        );
        RunSummary::Completed { degraded, orphaned }
    }

    async fn settle_failure(
        &self,
        job: JobDescriptor,
        error: ProcessingError,
        duration_ms: u64,
    ) -> RunSummary {
        let video_id = job.video_id.clone();
        let handler = DeadLetterHandler::new(self.queue.as_ref());

        match handler.handle_failure(job, &error).await {
            Ok(FailureAction::Retrying {
                retry_count,
                max_retries,
            }) => {
                warn!(
                    video_id = %video_id,
                    error = %error,
                    retry_count,
                    max_retries,
                    "Job failed, requeued for retry"
                );
                self.notifiers.record_job("retrying");
                RunSummary::Retrying { retry_count }
            }
            Ok(FailureAction::DeadLettered { job, reason }) => {
                error!(video_id = %video_id, reason = %reason, "Job failed permanently");

                let result = ProcessingResult::failure(GENERIC_FAILURE_MESSAGE, duration_ms);
                if let Err(e) = deliver(
                    self.reporter.as_ref(),
                    &video_id,
                    &result,
                    self.report.attempts,
                    self.report.backoff,
                )
                .await
                {
                    error!(video_id = %video_id, error = %e, "Failed to record permanent failure");
                }

                self.notifiers.record_job("dead_letter");
                self.notifiers
                    .permanent_failure(&job, &reason.to_string())
                    .await;
                RunSummary::PermanentlyFailed { reason }
            }
            Err(e) => {
                error!(video_id = %video_id, error = %e, "Failed to settle failed job");
                self.notifiers.record_job("stranded");
                RunSummary::Stranded {
                    error: ProcessingError::QueueUnavailable(e.to_string()),
                }
            }
        }
    }

    async fn release(&self, job: JobDescriptor) -> RunSummary {
        match self.queue.release(&job).await {
            Ok(()) => {
                info!(video_id = %job.video_id, "Interrupted job released to queue");
                self.notifiers.record_job("released");
                RunSummary::Released
            }
            Err(e) => {
                error!(video_id = %job.video_id, error = %e, "Failed to release interrupted job");
                RunSummary::Stranded {
                    error: ProcessingError::QueueUnavailable(e.to_string()),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
