//! Webhook ingestion handler.
//!
//! Validates the subscription through the cache, parses the payload, and
//! enqueues a delivery job. The 202 response is returned only after the job
//! is durably enqueued; no outbound delivery happens on this path.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bytes::Bytes;
use hookline_core::{DeliveryJob, SubscriptionId, WebhookId};
use hookline_queue::DELIVERIES_QUEUE;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Payloads above this size are rejected with 413.
const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Response from successful webhook ingestion.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Identity assigned to the ingested webhook.
    pub webhook_id: String,
}

/// Ingests a webhook and enqueues it for delivery.
///
/// # Errors
///
/// - 404 `SubscriptionNotFound` when the subscription does not exist
/// - 400 `InvalidPayload` when the body is not valid JSON
/// - 413 `PayloadTooLarge` above the size cap
/// - 503 `JobStoreUnavailable` when the enqueue fails
#[instrument(name = "ingest_webhook", skip(state, headers, body), fields(subscription_id = %subscription_id))]
pub async fn ingest_webhook(
    Path(subscription_id): Path<Uuid>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<IngestResponse>), ApiError> {
    if body.len() > MAX_PAYLOAD_SIZE {
        warn!(payload_size = body.len(), limit = MAX_PAYLOAD_SIZE, "payload exceeds size limit");
        return Err(ApiError::PayloadTooLarge { size_bytes: body.len() });
    }

    let subscription_id = SubscriptionId::from(subscription_id);

    let subscription = state
        .cache
        .get(subscription_id)
        .await
        .map_err(|_| ApiError::StoreUnavailable)?
        .ok_or(ApiError::SubscriptionNotFound)?;

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidPayload { message: e.to_string() })?;

    let webhook_id = WebhookId::new();
    let job = DeliveryJob {
        subscription_id: subscription.id,
        payload,
        event_type: header_value(&headers, "x-event-type"),
        signature: header_value(&headers, "x-signature"),
        webhook_id,
        attempt: 1,
    };

    // The reply must imply durable enqueue, so this await completes before
    // the 202 is produced.
    state.jobs.enqueue(DELIVERIES_QUEUE, &job).await?;

    info!(
        webhook_id = %webhook_id,
        subscription_id = %subscription_id,
        "webhook accepted for delivery"
    );

    Ok((StatusCode::ACCEPTED, Json(IngestResponse { webhook_id: webhook_id.to_string() })))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|value| value.to_str().ok()).map(ToString::to_string)
}
