//! Worker pool management with structured concurrency.
//!
//! Supervises the delivery worker tasks: spawning, health accounting, and
//! graceful shutdown with a bounded drain.

use std::{sync::Arc, time::Duration};

use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::DeliveryClient,
    error::{DeliveryError, Result},
    worker::{DeliveryConfig, DeliveryContext, DeliveryWorker, EngineStats},
};

/// Pool of supervised delivery worker tasks.
pub struct WorkerPool {
    context: DeliveryContext,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl WorkerPool {
    /// Creates a new worker pool with the given configuration.
    pub fn new(
        context: DeliveryContext,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { context, config, client, stats, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns all configured workers and begins processing.
    ///
    /// Workers run until cancellation is requested. Returns immediately
    /// after spawning.
    ///
    /// # Errors
    ///
    /// Currently never returns error but the signature allows for future
    /// validation.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.context.clone(),
                self.config.clone(),
                self.client.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;
                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "delivery worker terminated with error");
                }
                result
            });

            self.worker_handles.push(handle);
        }

        Ok(())
    }

    /// Gracefully shuts down all workers, waiting for in-flight deliveries.
    ///
    /// # Errors
    ///
    /// Returns error if the shutdown timeout is exceeded.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let shutdown_future = async {
            for (worker_id, handle) in
                std::mem::take(&mut self.worker_handles).into_iter().enumerate()
            {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker completed with error during shutdown");
                    },
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked");
                    },
                }
            }

            let mut stats = self.stats.write().await;
            stats.active_workers = 0;
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Checks if any workers are still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|handle| !handle.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active_count > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active_count,
                "worker pool dropped without graceful shutdown, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}
