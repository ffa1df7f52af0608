//! Redis queue operations.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, error, info, warn};

use super::job::JobDescriptor;
use super::{check_requeue, JobQueue};
use crate::error::QueueError;

const QUEUE_KEY: &str = "transcode:queue";
const PROCESSING_PREFIX: &str = "transcode:processing:";
const DEAD_LETTER_KEY: &str = "transcode:dead_letter";
const JOB_PREFIX: &str = "transcode:job:";

/// Shortest blocking wait sent to BLMOVE. A zero timeout would block forever.
const MIN_BLOCK_SECS: f64 = 0.1;

/// Manages the transcoding queue in Redis.
///
/// Pending ids live in a list, job bodies under per-video keys, and each
/// consumer owns an in-flight list so a crashed worker's jobs can be recovered.
#[derive(Clone)]
pub struct RedisJobQueue {
    /// Connection for regular commands.
    connection: ConnectionManager,
    /// Dedicated connection for BLMOVE, so blocking waits never stall other commands.
    blocking: ConnectionManager,
    /// This consumer's in-flight list.
    processing_key: String,
}

impl RedisJobQueue {
    /// Creates a queue client connected to the specified Redis URL.
    pub async fn new(redis_url: &str, consumer_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(|e| QueueError::ConnectionFailed {
            url: redis_url.to_string(),
            message: e.to_string(),
        })?;

        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                url: redis_url.to_string(),
                message: e.to_string(),
            })?;

        let blocking = client
            .get_connection_manager()
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                url: redis_url.to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            connection,
            blocking,
            processing_key: processing_key(consumer_name),
        })
    }

    /// Handle to the shared, non-blocking connection.
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Gets a job by its video id.
    pub async fn get_job(&self, video_id: &str) -> Result<Option<JobDescriptor>, QueueError> {
        let mut conn = self.connection.clone();
        let job_json: Option<String> = conn.get(job_key(video_id)).await?;

        job_json
            .map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| QueueError::SerializationFailed(e.to_string()))
            })
            .transpose()
    }

    /// Lists all jobs waiting in the queue.
    pub async fn list_pending(&self) -> Result<Vec<JobDescriptor>, QueueError> {
        self.list_jobs(QUEUE_KEY).await
    }

    /// Lists all jobs in the dead-letter list.
    pub async fn list_dead_letter(&self) -> Result<Vec<JobDescriptor>, QueueError> {
        self.list_jobs(DEAD_LETTER_KEY).await
    }

    /// Clears all pending jobs (in-flight and dead-lettered jobs are untouched).
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.lrange(QUEUE_KEY, 0, -1).await?;

        let mut pipe = redis::pipe();
        pipe.atomic().del(QUEUE_KEY).ignore();
        for id in &ids {
            pipe.del(job_key(id)).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(ids.len())
    }

    /// Moves a job from the dead-letter list back to the queue with a fresh retry budget.
    pub async fn retry_dead_letter(&self, video_id: &str) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();
        let removed: usize = conn.lrem(DEAD_LETTER_KEY, 1, video_id).await?;

        let Some(mut job) = self.get_job(video_id).await? else {
            return Err(QueueError::JobNotFound {
                video_id: video_id.to_string(),
            });
        };

        if removed == 0 {
            warn!(video_id, "Job was not in the dead-letter list, requeueing anyway");
        }

        job.retry_count = 0;
        job.last_error = None;
        let job_json = encode(&job)?;

        let _: () = redis::pipe()
            .atomic()
            .set(job_key(video_id), &job_json)
            .ignore()
            .rpush(QUEUE_KEY, video_id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn list_jobs(&self, list_key: &str) -> Result<Vec<JobDescriptor>, QueueError> {
        let mut conn = self.connection.clone();
        let ids: Vec<String> = conn.lrange(list_key, 0, -1).await?;

        let mut jobs = Vec::new();
        for id in ids {
            if let Some(job) = self.get_job(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    /// Loads the body of a freshly dequeued id, parking ids that cannot be used.
    async fn load_dequeued(&self, video_id: &str) -> Result<Option<JobDescriptor>, QueueError> {
        let mut conn = self.connection.clone();
        let job_json: Option<String> = conn.get(job_key(video_id)).await?;

        let Some(json) = job_json else {
            warn!(video_id, "Dequeued id has no job body, dropping it");
            let _: () = conn.lrem(&self.processing_key, 1, video_id).await?;
            return Ok(None);
        };

        match serde_json::from_str(&json) {
            Ok(job) => Ok(Some(job)),
            Err(e) => {
                error!(video_id, error = %e, "Job body is corrupt, moving to dead letter");
                let _: () = redis::pipe()
                    .atomic()
                    .lrem(&self.processing_key, 1, video_id)
                    .ignore()
                    .rpush(DEAD_LETTER_KEY, video_id)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        let job_json = encode(job)?;
        let key = job_key(&job.video_id);
        let mut conn = self.connection.clone();

        // The body key doubles as the uniqueness guard for the video id
        let created: bool = conn.set_nx(&key, &job_json).await?;
        if !created {
            return Err(QueueError::Duplicate {
                video_id: job.video_id.clone(),
            });
        }

        if let Err(e) = conn.rpush::<_, _, ()>(QUEUE_KEY, &job.video_id).await {
            let _: Result<(), _> = conn.del(&key).await;
            return Err(e.into());
        }

        debug!(video_id = %job.video_id, "Job enqueued");
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobDescriptor>, QueueError> {
        let mut conn = self.blocking.clone();
        let block_secs = timeout.as_secs_f64().max(MIN_BLOCK_SECS);

        let video_id: Option<String> = redis::cmd("BLMOVE")
            .arg(QUEUE_KEY)
            .arg(&self.processing_key)
            .arg("LEFT")
            .arg("RIGHT")
            .arg(block_secs)
            .query_async(&mut conn)
            .await?;

        match video_id {
            Some(id) => self.load_dequeued(&id).await,
            None => Ok(None),
        }
    }

    async fn size(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection.clone();
        let len: usize = conn.llen(QUEUE_KEY).await?;
        Ok(len)
    }

    async fn requeue(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        check_requeue(job)?;
        let job_json = encode(job)?;
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .set(job_key(&job.video_id), &job_json)
            .ignore()
            .lrem(&self.processing_key, 1, &job.video_id)
            .ignore()
            .rpush(QUEUE_KEY, &job.video_id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn complete(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, &job.video_id)
            .ignore()
            .del(job_key(&job.video_id))
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn dead_letter(&self, job: &JobDescriptor, reason: &str) -> Result<(), QueueError> {
        let mut job = job.clone();
        job.last_error = Some(reason.to_string());
        let job_json = encode(&job)?;
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .set(job_key(&job.video_id), &job_json)
            .ignore()
            .lrem(&self.processing_key, 1, &job.video_id)
            .ignore()
            .rpush(DEAD_LETTER_KEY, &job.video_id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn release(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        let mut conn = self.connection.clone();

        let _: () = redis::pipe()
            .atomic()
            .lrem(&self.processing_key, 1, &job.video_id)
            .ignore()
            .lpush(QUEUE_KEY, &job.video_id)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection.clone();
        let mut recovered = 0;

        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing_key)
                .arg(QUEUE_KEY)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;

            match moved {
                Some(video_id) => {
                    debug!(video_id, "Recovered in-flight job");
                    recovered += 1;
                }
                None => break,
            }
        }

        if recovered > 0 {
            info!(recovered, "Returned stranded in-flight jobs to the queue");
        }
        Ok(recovered)
    }

    async fn dead_letter_size(&self) -> Result<usize, QueueError> {
        let mut conn = self.connection.clone();
        let len: usize = conn.llen(DEAD_LETTER_KEY).await?;
        Ok(len)
    }
}

fn job_key(video_id: &str) -> String {
    format!("{}{}", JOB_PREFIX, video_id)
}

fn processing_key(consumer_name: &str) -> String {
    format!("{}{}", PROCESSING_PREFIX, consumer_name)
}

fn encode(job: &JobDescriptor) -> Result<String, QueueError> {
    serde_json::to_string(job).map_err(|e| QueueError::SerializationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_video_and_consumer() {
        assert_eq!(job_key("v1"), "transcode:job:v1");
        assert_eq!(processing_key("node-a"), "transcode:processing:node-a");
        assert_ne!(processing_key("node-a"), processing_key("node-b"));
    }
}
