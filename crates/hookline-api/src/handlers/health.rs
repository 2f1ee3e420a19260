//! Health check handler.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::error;

use crate::AppState;

/// Health check response body.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `"ok"` when the storage backend responds.
    pub status: &'static str,
}

/// Reports service health based on storage reachability.
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    match state.storage.health_check().await {
        Ok(()) => Ok(Json(HealthResponse { status: "ok" })),
        Err(e) => {
            error!(error = %e, "health check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
