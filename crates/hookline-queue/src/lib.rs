//! Durable job queue for delivery work.
//!
//! Presents a persistent FIFO ready queue plus a delayed schedule, both
//! addressable by logical queue name. Jobs cross the queue boundary as typed
//! records serialized to JSON; consumers receive a lease that must be
//! acknowledged on completion, giving at-least-once semantics: a job whose
//! lease expires (worker crash, stalled process) returns to the ready queue
//! and is handed to another consumer.
//!
//! Two backends exist: Redis for production and an in-memory queue for local
//! development and tests.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookline_core::DeliveryJob;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod maintenance;
pub mod memory;
pub mod redis;

pub use maintenance::QueueMaintenance;
pub use memory::InMemoryJobStore;
pub use self::redis::RedisJobStore;

/// Logical queue name for delivery jobs.
pub const DELIVERIES_QUEUE: &str = "deliveries";

/// Result type alias for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors raised by the job store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue backend could not be reached.
    #[error("job store unavailable: {0}")]
    Unavailable(String),

    /// A job payload could not be encoded or decoded.
    #[error("job serialization failed: {0}")]
    Serialization(String),
}

/// Wire format for a queued job.
///
/// The envelope carries a unique ID so identical job payloads remain
/// distinguishable inside queue data structures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Unique identity of this queue entry.
    pub id: Uuid,

    /// When the entry was first enqueued.
    pub enqueued_at: DateTime<Utc>,

    /// The typed job payload.
    pub job: DeliveryJob,
}

impl JobEnvelope {
    /// Wraps a job for transport.
    pub fn new(job: DeliveryJob, enqueued_at: DateTime<Utc>) -> Self {
        Self { id: Uuid::new_v4(), enqueued_at, job }
    }
}

/// Receipt identifying a dequeued job until it is acknowledged.
#[derive(Debug, Clone)]
pub struct JobLease {
    /// Envelope identity of the leased entry.
    pub id: Uuid,

    /// Backend-specific token (the raw envelope for the Redis backend).
    pub(crate) token: String,
}

/// A job handed to a consumer together with its lease.
#[derive(Debug, Clone)]
pub struct LeasedJob {
    /// The job to process.
    pub job: DeliveryJob,

    /// Receipt to acknowledge once processing completes.
    pub lease: JobLease,
}

/// Persistent FIFO queue with delayed scheduling.
///
/// A consumer holding a leased job has exclusive processing rights until it
/// acknowledges the lease or the visibility timeout elapses.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueues a job for immediate consumption. Durable before return.
    async fn enqueue(&self, queue: &str, job: &DeliveryJob) -> Result<Uuid>;

    /// Schedules a job to become dequeuable after `delay` elapses.
    ///
    /// The delay is a lower bound: promotion may lag by up to the scheduler
    /// granularity, but a job is never visible early.
    async fn enqueue_in(&self, queue: &str, delay: Duration, job: &DeliveryJob) -> Result<Uuid>;

    /// Removes the oldest ready job, blocking up to `wait` when empty.
    ///
    /// Returns `None` when the wait elapses without a job arriving.
    async fn dequeue(&self, queue: &str, wait: Duration) -> Result<Option<LeasedJob>>;

    /// Completes a leased job, removing it permanently.
    async fn ack(&self, queue: &str, lease: &JobLease) -> Result<()>;

    /// Moves due scheduled jobs into the ready queue.
    ///
    /// Returns the number of jobs promoted.
    async fn promote_due(&self, queue: &str) -> Result<u64>;

    /// Returns jobs with expired leases to the ready queue.
    ///
    /// Returns the number of jobs reclaimed.
    async fn reclaim_expired(&self, queue: &str) -> Result<u64>;
}
