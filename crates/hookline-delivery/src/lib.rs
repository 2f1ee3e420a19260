//! Webhook delivery pipeline: worker pool, retry policy, and retention.
//!
//! Consumes delivery jobs from the shared queue, POSTs them to subscription
//! target URLs with bounded retries under a fixed backoff schedule, records
//! one log row per attempt, and prunes logs past the retention horizon.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod retention;
pub mod retry;
pub mod worker;
pub mod worker_pool;

pub use client::{ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use error::{DeliveryError, Result};
pub use retention::RetentionSweeper;
pub use retry::{RetryDecision, RetryPolicy};
pub use worker::{DeliveryConfig, DeliveryContext, DeliveryEngine, DeliveryWorker, EngineStats};
pub use worker_pool::WorkerPool;
