//! Persisting job outcomes to the video record.

pub mod http;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{ProcessingError, ReportError};
use crate::pipeline::result::ProcessingResult;

pub use http::HttpReporter;

/// Writes job status and results to the video record.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResultReporter: Send + Sync {
    /// Marks the record as being processed.
    async fn mark_processing(&self, video_id: &str) -> Result<(), ReportError>;

    /// Writes the terminal result of a job.
    async fn report(&self, video_id: &str, result: &ProcessingResult) -> Result<(), ReportError>;
}

/// Reports `result`, retrying with exponential backoff.
///
/// Makes at most `attempts` calls (minimum one). Waits `backoff`, then twice
/// that, and so on between calls. Returns the number of calls made.
pub async fn deliver(
    reporter: &dyn ResultReporter,
    video_id: &str,
    result: &ProcessingResult,
    attempts: u32,
    backoff: Duration,
) -> Result<u32, ProcessingError> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 1;

    loop {
        match reporter.report(video_id, result).await {
            Ok(()) => {
                debug!(video_id, attempt, "Result reported");
                return Ok(attempt);
            }
            Err(e) if attempt >= attempts => {
                return Err(ProcessingError::ReportingFailed {
                    attempts,
                    message: e.to_string(),
                });
            }
            Err(e) => {
                warn!(
                    video_id,
                    attempt,
                    error = %e,
                    retry_in_ms = delay.as_millis() as u64,
                    "Reporting result failed"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;

    fn result() -> ProcessingResult {
        ProcessingResult::failure("Video processing failed", 10)
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let mut reporter = MockResultReporter::new();
        let mut seq = Sequence::new();
        reporter
            .expect_report()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(ReportError::Unreachable("down".to_string())));
        reporter
            .expect_report()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let used = deliver(&reporter, "v1", &result(), 3, Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(used, 3);
    }

    #[tokio::test]
    async fn gives_up_after_the_configured_attempts() {
        let mut reporter = MockResultReporter::new();
        reporter
            .expect_report()
            .times(3)
            .returning(|_, _| Err(ReportError::Rejected { status: 503, body: String::new() }));

        let err = deliver(&reporter, "v1", &result(), 3, Duration::from_millis(1))
            .await
            .unwrap_err();

        assert!(matches!(err, ProcessingError::ReportingFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let mut reporter = MockResultReporter::new();
        reporter.expect_report().times(1).returning(|_, _| Ok(()));

        let used = deliver(&reporter, "v1", &result(), 0, Duration::ZERO).await.unwrap();
        assert_eq!(used, 1);
    }
}
