//! Delivery status read API.
//!
//! Read-only projections over the delivery log: per-webhook status with the
//! most recent attempts, and per-subscription attempt history.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use hookline_core::{DeliveryLog, SubscriptionId, WebhookId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Attempts returned in the per-webhook status view.
const RECENT_ATTEMPTS: i64 = 20;

/// Status summary for one webhook.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Webhook being summarized.
    pub webhook_id: WebhookId,
    /// Subscription it was addressed to.
    pub subscription_id: SubscriptionId,
    /// Total attempts recorded so far.
    pub total_attempts: i64,
    /// Outcome of the most recent attempt.
    pub final_outcome: String,
    /// Timestamp of the most recent attempt.
    pub last_attempt_at: DateTime<Utc>,
    /// Status code of the most recent attempt, if a response arrived.
    pub last_status_code: Option<i32>,
    /// Error of the most recent attempt, if any.
    pub error: Option<String>,
    /// Most recent attempts, newest first.
    pub recent_attempts: Vec<DeliveryLog>,
}

/// Returns delivery status and recent attempts for a webhook.
///
/// # Errors
///
/// Returns 404 `WebhookNotFound` when no attempt has been recorded.
pub async fn get_webhook_status(
    Path(webhook_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let webhook_id = WebhookId::from(webhook_id);

    let total_attempts = state
        .storage
        .delivery_logs
        .count_by_webhook(webhook_id)
        .await
        .map_err(|_| ApiError::StoreUnavailable)?;
    if total_attempts == 0 {
        return Err(ApiError::WebhookNotFound);
    }

    let recent_attempts = state
        .storage
        .delivery_logs
        .find_by_webhook(webhook_id, RECENT_ATTEMPTS)
        .await
        .map_err(|_| ApiError::StoreUnavailable)?;

    // Non-empty by the count check above.
    let last = &recent_attempts[0];

    Ok(Json(StatusResponse {
        webhook_id,
        subscription_id: last.subscription_id,
        total_attempts,
        final_outcome: last.outcome.to_string(),
        last_attempt_at: last.timestamp,
        last_status_code: last.status_code,
        error: last.error.clone(),
        recent_attempts,
    }))
}

/// Query parameters for the per-subscription attempt listing.
#[derive(Debug, Deserialize)]
pub struct AttemptsQuery {
    /// Maximum rows to return.
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// Lists recent delivery attempts across a subscription, newest first.
pub async fn list_subscription_attempts(
    Path(subscription_id): Path<Uuid>,
    Query(query): Query<AttemptsQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<DeliveryLog>>, ApiError> {
    let logs = state
        .storage
        .delivery_logs
        .find_by_subscription(SubscriptionId::from(subscription_id), query.limit)
        .await
        .map_err(|_| ApiError::StoreUnavailable)?;

    Ok(Json(logs))
}
