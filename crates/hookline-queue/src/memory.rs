//! In-memory job store.
//!
//! Mirrors the Redis backend's semantics (FIFO ready queue, delayed
//! schedule, lease-based redelivery) using process-local state. Exists for
//! local development and tests; nothing survives a restart.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::DeliveryJob;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::{JobEnvelope, JobLease, JobStore, LeasedJob, Result};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
struct QueueState {
    ready: VecDeque<JobEnvelope>,
    scheduled: Vec<(DateTime<Utc>, JobEnvelope)>,
    processing: HashMap<Uuid, (JobEnvelope, DateTime<Utc>)>,
}

/// Process-local job store used by tests and development setups.
pub struct InMemoryJobStore {
    queues: Mutex<HashMap<String, QueueState>>,
    arrivals: Notify,
    visibility_timeout: Duration,
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryJobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            arrivals: Notify::new(),
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Overrides the lease visibility timeout.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> T {
        let mut queues = self.queues.lock().expect("queue lock poisoned");
        f(queues.entry(queue.to_string()).or_default())
    }

    /// Number of jobs currently visible in the ready queue.
    pub fn ready_len(&self, queue: &str) -> usize {
        self.with_queue(queue, |state| state.ready.len())
    }

    /// Number of jobs waiting in the delayed schedule.
    pub fn scheduled_len(&self, queue: &str) -> usize {
        self.with_queue(queue, |state| state.scheduled.len())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, queue: &str, job: &DeliveryJob) -> Result<Uuid> {
        let envelope = JobEnvelope::new(job.clone(), Utc::now());
        let id = envelope.id;
        self.with_queue(queue, |state| state.ready.push_back(envelope));
        self.arrivals.notify_waiters();
        Ok(id)
    }

    async fn enqueue_in(&self, queue: &str, delay: Duration, job: &DeliveryJob) -> Result<Uuid> {
        let envelope = JobEnvelope::new(job.clone(), Utc::now());
        let id = envelope.id;
        let due = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.with_queue(queue, |state| state.scheduled.push((due, envelope)));
        Ok(id)
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> Result<Option<LeasedJob>> {
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            // Register interest before checking so an enqueue racing with
            // the check cannot be missed.
            let notified = self.arrivals.notified();

            let leased = self.with_queue(queue, |state| {
                state.ready.pop_front().map(|envelope| {
                    let expiry = Utc::now()
                        + chrono::Duration::from_std(self.visibility_timeout)
                            .unwrap_or_else(|_| chrono::Duration::zero());
                    state.processing.insert(envelope.id, (envelope.clone(), expiry));
                    LeasedJob {
                        job: envelope.job.clone(),
                        lease: JobLease { id: envelope.id, token: String::new() },
                    }
                })
            });

            if let Some(leased) = leased {
                return Ok(Some(leased));
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn ack(&self, queue: &str, lease: &JobLease) -> Result<()> {
        self.with_queue(queue, |state| {
            state.processing.remove(&lease.id);
        });
        Ok(())
    }

    async fn promote_due(&self, queue: &str) -> Result<u64> {
        let now = Utc::now();
        let promoted = self.with_queue(queue, |state| {
            let mut promoted = 0_u64;
            let mut remaining = Vec::with_capacity(state.scheduled.len());
            for (due, envelope) in state.scheduled.drain(..) {
                if due <= now {
                    state.ready.push_back(envelope);
                    promoted += 1;
                } else {
                    remaining.push((due, envelope));
                }
            }
            state.scheduled = remaining;
            promoted
        });

        if promoted > 0 {
            self.arrivals.notify_waiters();
        }
        Ok(promoted)
    }

    async fn reclaim_expired(&self, queue: &str) -> Result<u64> {
        let now = Utc::now();
        let reclaimed = self.with_queue(queue, |state| {
            let expired: Vec<Uuid> = state
                .processing
                .iter()
                .filter(|(_, (_, expiry))| *expiry <= now)
                .map(|(id, _)| *id)
                .collect();

            for id in &expired {
                if let Some((envelope, _)) = state.processing.remove(id) {
                    state.ready.push_back(envelope);
                }
            }
            expired.len() as u64
        });

        if reclaimed > 0 {
            self.arrivals.notify_waiters();
        }
        Ok(reclaimed)
    }
}
