//! Error types for delivery operations.
//!
//! Transport failures (network, timeout) are transient by definition: the
//! attempt is recorded as a failed attempt and retried on the backoff
//! schedule. Non-2xx HTTP responses are not modeled as errors at all; the
//! worker classifies them from the response. Storage and queue failures
//! leave the job unacknowledged so the lease expiry redelivers it.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised inside the delivery pipeline.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure (connect, DNS, TLS, reset).
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// Outbound request exceeded the per-attempt timeout.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Configured timeout in seconds.
        timeout_seconds: u64,
    },

    /// Delivery log or subscription storage failed mid-attempt.
    #[error("storage error: {0}")]
    Storage(#[from] hookline_core::CoreError),

    /// Job store failed while scheduling or acknowledging.
    #[error("job store error: {0}")]
    Queue(#[from] hookline_queue::QueueError),

    /// The HTTP client could not be constructed.
    #[error("invalid delivery client configuration: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },

    /// A supervised worker task panicked.
    #[error("worker {worker_id} panicked: {error}")]
    WorkerPanic {
        /// Index of the panicked worker.
        worker_id: usize,
        /// Join error description.
        error: String,
    },

    /// Graceful shutdown did not complete in time.
    #[error("worker shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}
