//! Redis-backed job store.
//!
//! Queue layout per logical queue name:
//!
//! - `hookline:queue:<name>`: ready list. `RPUSH` at the tail, consumers
//!   `BLMOVE` from the head, preserving FIFO order.
//! - `hookline:queue:<name>:scheduled`: sorted set of delayed entries
//!   scored by due time (epoch milliseconds).
//! - `hookline:queue:<name>:processing`: list of entries handed to a
//!   consumer but not yet acknowledged.
//! - `hookline:queue:<name>:leases`: sorted set scoring each processing
//!   entry by lease expiry.
//!
//! `promote_due` and `reclaim_expired` are driven by the maintenance loop
//! and are safe to run concurrently from multiple processes: each member is
//! claimed with a `ZREM` check before being re-queued.

use std::time::Duration;

use ::redis::{aio::ConnectionManager, AsyncCommands};
use async_trait::async_trait;
use chrono::Utc;
use hookline_core::DeliveryJob;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{JobEnvelope, JobLease, JobStore, LeasedJob, QueueError, Result};

const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Batch size for promotion and reclaim scans.
const MAINTENANCE_BATCH: isize = 100;

/// Durable job store over Redis.
#[derive(Clone)]
pub struct RedisJobStore {
    conn: ConnectionManager,
    visibility_timeout: Duration,
}

impl RedisJobStore {
    /// Creates a store over an established connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn, visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT }
    }

    /// Overrides the lease visibility timeout.
    ///
    /// Must exceed the outbound HTTP timeout so an in-flight attempt is
    /// never redelivered while still running.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Connects to Redis and builds a store.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::Unavailable` if the connection cannot be
    /// established.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            ::redis::Client::open(url).map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        Ok(Self::new(conn))
    }

    fn ready_key(queue: &str) -> String {
        format!("hookline:queue:{queue}")
    }

    fn scheduled_key(queue: &str) -> String {
        format!("hookline:queue:{queue}:scheduled")
    }

    fn processing_key(queue: &str) -> String {
        format!("hookline:queue:{queue}:processing")
    }

    fn leases_key(queue: &str) -> String {
        format!("hookline:queue:{queue}:leases")
    }

    fn encode(job: &DeliveryJob) -> Result<(Uuid, String)> {
        let envelope = JobEnvelope::new(job.clone(), Utc::now());
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        Ok((envelope.id, payload))
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn enqueue(&self, queue: &str, job: &DeliveryJob) -> Result<Uuid> {
        let (id, payload) = Self::encode(job)?;
        let mut conn = self.conn.clone();

        let _: i64 = conn
            .rpush(Self::ready_key(queue), &payload)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        Ok(id)
    }

    async fn enqueue_in(&self, queue: &str, delay: Duration, job: &DeliveryJob) -> Result<Uuid> {
        let (id, payload) = Self::encode(job)?;
        let due = Utc::now().timestamp_millis() + i64::try_from(delay.as_millis()).unwrap_or(0);
        let mut conn = self.conn.clone();

        let _: i64 = conn
            .zadd(Self::scheduled_key(queue), &payload, due)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        Ok(id)
    }

    async fn dequeue(&self, queue: &str, wait: Duration) -> Result<Option<LeasedJob>> {
        let ready = Self::ready_key(queue);
        let processing = Self::processing_key(queue);
        let mut conn = self.conn.clone();

        let raw: Option<String> = if wait.is_zero() {
            ::redis::cmd("LMOVE")
                .arg(&ready)
                .arg(&processing)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?
        } else {
            ::redis::cmd("BLMOVE")
                .arg(&ready)
                .arg(&processing)
                .arg("LEFT")
                .arg("RIGHT")
                .arg(wait.as_secs_f64())
                .query_async(&mut conn)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?
        };

        let Some(raw) = raw else {
            return Ok(None);
        };

        // Lease the entry before handing it out so a crashed consumer is
        // eventually reclaimed by the maintenance loop.
        let expiry = Utc::now().timestamp_millis()
            + i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
        let _: i64 = conn
            .zadd(Self::leases_key(queue), &raw, expiry)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        match serde_json::from_str::<JobEnvelope>(&raw) {
            Ok(envelope) => Ok(Some(LeasedJob {
                job: envelope.job,
                lease: JobLease { id: envelope.id, token: raw },
            })),
            Err(e) => {
                // Poison entry: drop it rather than wedging the consumer.
                error!(queue, error = %e, "discarding undecodable queue entry");
                let _: i64 = conn
                    .lrem(&processing, 1, &raw)
                    .await
                    .map_err(|e| QueueError::Unavailable(e.to_string()))?;
                let _: i64 = conn
                    .zrem(Self::leases_key(queue), &raw)
                    .await
                    .map_err(|e| QueueError::Unavailable(e.to_string()))?;
                Ok(None)
            },
        }
    }

    async fn ack(&self, queue: &str, lease: &JobLease) -> Result<()> {
        let mut conn = self.conn.clone();

        let _: i64 = conn
            .lrem(Self::processing_key(queue), 1, &lease.token)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;
        let _: i64 = conn
            .zrem(Self::leases_key(queue), &lease.token)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        Ok(())
    }

    async fn promote_due(&self, queue: &str) -> Result<u64> {
        let scheduled = Self::scheduled_key(queue);
        let ready = Self::ready_key(queue);
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let mut promoted = 0_u64;

        loop {
            let due: Vec<String> = conn
                .zrangebyscore_limit(&scheduled, "-inf", now, 0, MAINTENANCE_BATCH)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;

            if due.is_empty() {
                break;
            }

            for payload in &due {
                // ZREM doubles as the claim: only the process that removes
                // the member re-queues it.
                let removed: i64 = conn
                    .zrem(&scheduled, payload)
                    .await
                    .map_err(|e| QueueError::Unavailable(e.to_string()))?;
                if removed == 0 {
                    continue;
                }

                let _: i64 = conn
                    .rpush(&ready, payload)
                    .await
                    .map_err(|e| QueueError::Unavailable(e.to_string()))?;
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    async fn reclaim_expired(&self, queue: &str) -> Result<u64> {
        let leases = Self::leases_key(queue);
        let processing = Self::processing_key(queue);
        let ready = Self::ready_key(queue);
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let mut reclaimed = 0_u64;

        let expired: Vec<String> = conn
            .zrangebyscore_limit(&leases, "-inf", now, 0, MAINTENANCE_BATCH)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        for payload in &expired {
            let removed: i64 = conn
                .zrem(&leases, payload)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            if removed == 0 {
                continue;
            }

            let _: i64 = conn
                .lrem(&processing, 1, payload)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            let _: i64 = conn
                .rpush(&ready, payload)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;

            warn!(queue, "reclaimed delivery job with expired lease");
            reclaimed += 1;
        }

        // Adopt orphans: entries that reached the processing list but never
        // received a lease (consumer died between the two writes). Giving
        // them a fresh lease makes the normal expiry path pick them up.
        let in_flight: Vec<String> = conn
            .lrange(&processing, 0, MAINTENANCE_BATCH)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        for payload in &in_flight {
            let score: Option<f64> = conn
                .zscore(&leases, payload)
                .await
                .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            if score.is_none() {
                let expiry = now
                    + i64::try_from(self.visibility_timeout.as_millis()).unwrap_or(i64::MAX);
                let _: i64 = conn
                    .zadd(&leases, payload, expiry)
                    .await
                    .map_err(|e| QueueError::Unavailable(e.to_string()))?;
            }
        }

        Ok(reclaimed)
    }
}
