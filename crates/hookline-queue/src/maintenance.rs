//! Periodic queue maintenance.
//!
//! Promotes due scheduled jobs into the ready queue and reclaims jobs whose
//! lease expired without acknowledgement. The loop is idempotent and safe to
//! run from every process sharing a queue.

use std::{sync::Arc, time::Duration};

use hookline_core::Clock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::JobStore;

/// Maintenance loop driving promotion and lease reclaim for one queue.
pub struct QueueMaintenance {
    store: Arc<dyn JobStore>,
    queue: String,
    interval: Duration,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl QueueMaintenance {
    /// Creates a maintenance loop for `queue`, ticking every `interval`.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: impl Into<String>,
        interval: Duration,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, queue: queue.into(), interval, cancellation_token, clock }
    }

    /// Runs a single maintenance pass.
    ///
    /// # Errors
    ///
    /// Returns error if the queue backend is unreachable.
    pub async fn tick(&self) -> crate::Result<(u64, u64)> {
        let promoted = self.store.promote_due(&self.queue).await?;
        let reclaimed = self.store.reclaim_expired(&self.queue).await?;
        Ok((promoted, reclaimed))
    }

    /// Runs passes until cancelled.
    pub async fn run(self) {
        info!(queue = %self.queue, interval_ms = self.interval.as_millis(), "queue maintenance starting");

        loop {
            tokio::select! {
                () = self.clock.sleep(self.interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }

            match self.tick().await {
                Ok((promoted, reclaimed)) => {
                    if promoted > 0 || reclaimed > 0 {
                        debug!(
                            queue = %self.queue,
                            promoted,
                            reclaimed,
                            "queue maintenance pass completed"
                        );
                    }
                },
                Err(error) => {
                    warn!(queue = %self.queue, error = %error, "queue maintenance pass failed");
                },
            }
        }

        info!(queue = %self.queue, "queue maintenance stopped");
    }
}
