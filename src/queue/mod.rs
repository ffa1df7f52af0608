//! Job queue for transcoding work.
//!
//! [`JobQueue`] is the contract the worker pool relies on. Two backing stores
//! implement it: Redis for shared, horizontally scaled deployments and an
//! in-process store for single-node runs and tests.

pub mod dead_letter;
pub mod job;
pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::QueueError;
pub use job::{JobDescriptor, ProcessingOptions, QualityPreset};
pub use memory::InMemoryJobQueue;
pub use self::redis::RedisJobQueue;

/// Durable FIFO of pending transcoding jobs.
///
/// Every operation reports an unreachable store as [`QueueError::Unavailable`];
/// "no job" is only ever reported as `Ok(None)` from [`JobQueue::dequeue`].
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Adds a new job to the back of the queue.
    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), QueueError>;

    /// Takes the next job, waiting at most `timeout` for one to arrive.
    ///
    /// The job moves to this consumer's in-flight list atomically, so no other
    /// consumer can receive it.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobDescriptor>, QueueError>;

    /// Number of jobs waiting to be dequeued.
    async fn size(&self) -> Result<usize, QueueError>;

    /// Puts an in-flight job back for another attempt.
    ///
    /// The caller has already incremented `retry_count`; a job past its limit
    /// is refused with [`QueueError::RetriesExhausted`].
    async fn requeue(&self, job: &JobDescriptor) -> Result<(), QueueError>;

    /// Drops a finished job from the in-flight list.
    async fn complete(&self, job: &JobDescriptor) -> Result<(), QueueError>;

    /// Moves an in-flight job out of rotation for good.
    async fn dead_letter(&self, job: &JobDescriptor, reason: &str) -> Result<(), QueueError>;

    /// Returns an in-flight job that was never started to the head of the queue.
    async fn release(&self, job: &JobDescriptor) -> Result<(), QueueError>;

    /// Moves jobs left in this consumer's in-flight list back to the queue.
    async fn recover_in_flight(&self) -> Result<usize, QueueError>;

    /// Number of jobs in the dead-letter list.
    async fn dead_letter_size(&self) -> Result<usize, QueueError>;
}

/// Rejects a requeue that would break `retry_count <= max_retries`.
pub(crate) fn check_requeue(job: &JobDescriptor) -> Result<(), QueueError> {
    if job.retry_count > job.max_retries {
        return Err(QueueError::RetriesExhausted {
            video_id: job.video_id.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
        });
    }
    Ok(())
}
