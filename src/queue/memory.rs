//! In-process job queue.
//!
//! Mirrors the Redis queue's semantics (exclusive dequeue, in-flight
//! tracking, dead-letter list) for single-node runs and tests. It can be
//! switched into an unavailable state to exercise store-failure paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::job::JobDescriptor;
use super::{check_requeue, JobQueue};
use crate::error::QueueError;

#[derive(Default)]
struct State {
    pending: VecDeque<String>,
    in_flight: HashSet<String>,
    dead_letter: Vec<String>,
    jobs: HashMap<String, JobDescriptor>,
}

/// Job queue held in process memory.
#[derive(Default)]
pub struct InMemoryJobQueue {
    state: Mutex<State>,
    arrivals: Notify,
    unavailable: AtomicBool,
    dequeue_calls: AtomicUsize,
    dequeued: AtomicUsize,
}

impl InMemoryJobQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing (or regaining) the backing store.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of times `dequeue` has been called.
    pub fn dequeue_calls(&self) -> usize {
        self.dequeue_calls.load(Ordering::SeqCst)
    }

    /// Number of jobs handed out by `dequeue`.
    pub fn dequeued(&self) -> usize {
        self.dequeued.load(Ordering::SeqCst)
    }

    /// Ids of pending jobs in queue order.
    pub async fn pending_ids(&self) -> Vec<String> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    /// Number of jobs dequeued but not yet completed, requeued or dead-lettered.
    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.len()
    }

    /// Ids in the dead-letter list.
    pub async fn dead_letter_ids(&self) -> Vec<String> {
        self.state.lock().await.dead_letter.clone()
    }

    /// Stored body of a job that is pending, in flight or dead-lettered.
    pub async fn job(&self, video_id: &str) -> Option<JobDescriptor> {
        self.state.lock().await.jobs.get(video_id).cloned()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("in-memory store offline".to_string()));
        }
        Ok(())
    }

    fn take_in_flight(state: &mut State, video_id: &str) -> Result<(), QueueError> {
        if !state.in_flight.remove(video_id) {
            return Err(QueueError::JobNotFound {
                video_id: video_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        self.check_available()?;
        {
            let mut state = self.state.lock().await;
            if state.jobs.contains_key(&job.video_id) {
                return Err(QueueError::Duplicate {
                    video_id: job.video_id.clone(),
                });
            }
            state.jobs.insert(job.video_id.clone(), job.clone());
            state.pending.push_back(job.video_id.clone());
        }
        self.arrivals.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<JobDescriptor>, QueueError> {
        self.dequeue_calls.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + timeout;

        loop {
            self.check_available()?;
            {
                let mut state = self.state.lock().await;
                if let Some(video_id) = state.pending.pop_front() {
                    state.in_flight.insert(video_id.clone());
                    let job = state.jobs.get(&video_id).cloned();
                    if job.is_some() {
                        self.dequeued.fetch_add(1, Ordering::SeqCst);
                    }
                    return Ok(job);
                }
            }

            if tokio::time::timeout_at(deadline, self.arrivals.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn size(&self) -> Result<usize, QueueError> {
        self.check_available()?;
        Ok(self.state.lock().await.pending.len())
    }

    async fn requeue(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        self.check_available()?;
        check_requeue(job)?;
        {
            let mut state = self.state.lock().await;
            Self::take_in_flight(&mut state, &job.video_id)?;
            state.jobs.insert(job.video_id.clone(), job.clone());
            state.pending.push_back(job.video_id.clone());
        }
        self.arrivals.notify_one();
        Ok(())
    }

    async fn complete(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Self::take_in_flight(&mut state, &job.video_id)?;
        state.jobs.remove(&job.video_id);
        Ok(())
    }

    async fn dead_letter(&self, job: &JobDescriptor, reason: &str) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Self::take_in_flight(&mut state, &job.video_id)?;

        let mut job = job.clone();
        job.last_error = Some(reason.to_string());
        state.dead_letter.push(job.video_id.clone());
        state.jobs.insert(job.video_id.clone(), job);
        Ok(())
    }

    async fn release(&self, job: &JobDescriptor) -> Result<(), QueueError> {
        self.check_available()?;
        {
            let mut state = self.state.lock().await;
            Self::take_in_flight(&mut state, &job.video_id)?;
            state.pending.push_front(job.video_id.clone());
        }
        self.arrivals.notify_one();
        Ok(())
    }

    async fn recover_in_flight(&self) -> Result<usize, QueueError> {
        self.check_available()?;
        let recovered = {
            let mut state = self.state.lock().await;
            let stranded: Vec<String> = state.in_flight.drain().collect();
            for video_id in &stranded {
                state.pending.push_front(video_id.clone());
            }
            stranded.len()
        };
        for _ in 0..recovered {
            self.arrivals.notify_one();
        }
        Ok(recovered)
    }

    async fn dead_letter_size(&self) -> Result<usize, QueueError> {
        self.check_available()?;
        Ok(self.state.lock().await.dead_letter.len())
    }
}
