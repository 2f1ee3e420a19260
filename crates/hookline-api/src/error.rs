//! API error taxonomy with machine-readable kinds.
//!
//! Every error response carries `{"error": {"kind": ..., "message": ...}}`
//! so clients can branch on `kind` without parsing prose.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use hookline_core::CoreError;
use hookline_queue::QueueError;

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The addressed subscription does not exist.
    #[error("subscription not found")]
    SubscriptionNotFound,

    /// No delivery logs exist for the given webhook ID.
    #[error("no delivery logs for given webhook_id")]
    WebhookNotFound,

    /// The request body is not valid JSON.
    #[error("request body is not valid JSON: {message}")]
    InvalidPayload {
        /// Parser error description.
        message: String,
    },

    /// The supplied target URL is not an absolute http(s) URL.
    #[error("target_url is not a valid http(s) URL: {message}")]
    InvalidTargetUrl {
        /// Validation error description.
        message: String,
    },

    /// The payload exceeds the ingest size cap.
    #[error("payload of {size_bytes} bytes exceeds the ingest limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size_bytes: usize,
    },

    /// The job queue could not accept the delivery job.
    #[error("job store unavailable")]
    JobStoreUnavailable,

    /// The durable store failed.
    #[error("storage unavailable")]
    StoreUnavailable,
}

impl ApiError {
    /// Machine-readable error kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SubscriptionNotFound => "SubscriptionNotFound",
            Self::WebhookNotFound => "WebhookNotFound",
            Self::InvalidPayload { .. } => "InvalidPayload",
            Self::InvalidTargetUrl { .. } => "InvalidTargetUrl",
            Self::PayloadTooLarge { .. } => "PayloadTooLarge",
            Self::JobStoreUnavailable => "JobStoreUnavailable",
            Self::StoreUnavailable => "StoreUnavailable",
        }
    }

    /// HTTP status for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::SubscriptionNotFound | Self::WebhookNotFound => StatusCode::NOT_FOUND,
            Self::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidTargetUrl { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::JobStoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::StoreUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(_) => Self::SubscriptionNotFound,
            _ => Self::StoreUnavailable,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(_err: QueueError) -> Self {
        Self::JobStoreUnavailable
    }
}

/// Wire format of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details.
    pub error: ErrorDetail,
}

/// Kind and message of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Machine-readable error kind.
    pub kind: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail { kind: self.kind(), message: self.to_string() },
        };
        (self.status(), Json(body)).into_response()
    }
}
