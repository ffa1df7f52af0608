//! Bounded pool of concurrently running jobs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::runner::JobRunner;
use crate::config::model::WorkerConfig;
use crate::notify::Notifiers;
use crate::queue::{JobDescriptor, JobQueue};

/// Pool timing and sizing.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum jobs processed at once.
    pub max_concurrent_jobs: usize,
    /// Longest blocking wait for a job.
    pub dequeue_timeout: Duration,
    /// Pause after an empty dequeue.
    pub poll_interval: Duration,
    /// Pause after the queue reports an error.
    pub error_backoff: Duration,
    /// Bound on the graceful drain; `None` waits for every job.
    pub drain_timeout: Option<Duration>,
}

impl PoolSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            dequeue_timeout: config.dequeue_timeout(),
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

/// Counts a job as in flight for as long as it lives.
struct InFlightGuard {
    count: Arc<AtomicUsize>,
    notifiers: Notifiers,
}

impl InFlightGuard {
    fn new(count: Arc<AtomicUsize>, notifiers: Notifiers) -> Self {
        let now = count.fetch_add(1, Ordering::SeqCst) + 1;
        notifiers.set_in_flight(now);
        Self { count, notifiers }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        self.notifiers.set_in_flight(now);
    }
}

/// Pulls jobs from the queue and runs at most N of them at a time.
///
/// Each job runs on its own tracked task holding a semaphore permit, so the
/// slot is freed on every exit path. Shutdown stops dequeuing, then waits
/// for in-flight jobs; the abort token is cancelled if the drain outlives
/// its bound.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
    settings: PoolSettings,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
    abort: CancellationToken,
    notifiers: Notifiers,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        runner: Arc<JobRunner>,
        settings: PoolSettings,
        notifiers: Notifiers,
    ) -> Self {
        let slots = settings.max_concurrent_jobs.max(1);
        Self {
            queue,
            runner,
            settings,
            permits: Arc::new(Semaphore::new(slots)),
            tracker: TaskTracker::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            abort: CancellationToken::new(),
            notifiers,
        }
    }

    /// Jobs currently being processed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Token that interrupts every running job when cancelled.
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Runs until `shutdown` fires, then drains. Returns after the drain.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            "Worker pool started"
        );

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Never raced against shutdown: a dropped dequeue can strand a job
            match self.queue.dequeue(self.settings.dequeue_timeout).await {
                Ok(Some(job)) => {
                    if shutdown.is_cancelled() {
                        self.give_back(&job).await;
                        break;
                    }
                    self.spawn_job(job, permit);
                }
                Ok(None) => {
                    drop(permit);
                    if !pause(self.settings.poll_interval, &shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, backoff_secs = self.settings.error_backoff.as_secs(), "Failed to dequeue job");
                    if !pause(self.settings.error_backoff, &shutdown).await {
                        break;
                    }
                }
            }
        }

        info!(in_flight = self.in_flight(), "Stopped dequeuing, draining in-flight jobs");
        self.drain().await;
        info!("Worker pool drained");
    }

    fn spawn_job(&self, job: JobDescriptor, permit: OwnedSemaphorePermit) {
        let guard = InFlightGuard::new(self.in_flight.clone(), self.notifiers.clone());
        let runner = self.runner.clone();
        let abort = self.abort.clone();

        debug!(video_id = %job.video_id, in_flight = self.in_flight(), "Dispatching job");
        self.tracker.spawn(async move {
            let _permit = permit;
            let _guard = guard;
            let summary = runner.execute(job, &abort).await;
            debug!(?summary, "Job slot released");
        });
    }

    async fn give_back(&self, job: &JobDescriptor) {
        match self.queue.release(job).await {
            Ok(()) => info!(video_id = %job.video_id, "Released job dequeued during shutdown"),
            Err(e) => error!(video_id = %job.video_id, error = %e, "Failed to release job during shutdown"),
        }
    }

    async fn drain(&self) {
        self.tracker.close();

        let Some(limit) = self.settings.drain_timeout else {
            self.tracker.wait().await;
            return;
        };

        if tokio::time::timeout(limit, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.in_flight(),
                timeout_secs = limit.as_secs(),
                "Drain timed out, aborting in-flight jobs"
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }
    }
}

/// Sleeps for `duration` unless `shutdown` fires first. Returns false on shutdown.
async fn pause(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
