//! Delivery log retention sweeper.
//!
//! Periodically deletes delivery log rows older than the retention horizon.
//! The purge is one bulk statement over the indexed timestamp column and
//! never blocks ingestion. A failed pass is logged and retried on the next
//! tick.

use std::{sync::Arc, time::Duration};

use hookline_core::{Clock, DeliveryLogStore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Default retention horizon for delivery logs.
pub const DEFAULT_RETENTION_HORIZON: Duration = Duration::from_secs(72 * 60 * 60);

/// Default interval between purge passes.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Periodic task deleting delivery logs past the retention horizon.
pub struct RetentionSweeper {
    logs: Arc<dyn DeliveryLogStore>,
    horizon: Duration,
    interval: Duration,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    /// Creates a sweeper with the default 72 h horizon and hourly cadence.
    pub fn new(
        logs: Arc<dyn DeliveryLogStore>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logs,
            horizon: DEFAULT_RETENTION_HORIZON,
            interval: DEFAULT_SWEEP_INTERVAL,
            cancellation_token,
            clock,
        }
    }

    /// Overrides the retention horizon.
    pub fn with_horizon(mut self, horizon: Duration) -> Self {
        self.horizon = horizon;
        self
    }

    /// Overrides the sweep interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs a single purge pass.
    ///
    /// Deletes every row with `timestamp < now - horizon` and returns the
    /// number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns the storage error; the periodic loop logs it and retries on
    /// the next tick.
    pub async fn purge_once(&self) -> hookline_core::Result<u64> {
        let cutoff = self.clock.now_utc()
            - chrono::Duration::from_std(self.horizon)
                .unwrap_or_else(|_| chrono::Duration::hours(72));

        let deleted = self.logs.purge_older_than(cutoff).await?;

        info!(deleted, cutoff = %cutoff, "purged delivery logs");
        Ok(deleted)
    }

    /// Runs purge passes until cancelled.
    pub async fn run(self) {
        info!(
            horizon_hours = self.horizon.as_secs() / 3600,
            interval_secs = self.interval.as_secs(),
            "retention sweeper starting"
        );

        loop {
            tokio::select! {
                () = self.clock.sleep(self.interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }

            if let Err(err) = self.purge_once().await {
                error!(error = %err, "log retention purge failed, retrying next tick");
            }
        }

        info!("retention sweeper stopped");
    }
}
