//! Subscription CRUD handlers.
//!
//! Writes go through the durable store first, then update the cache:
//! create and update call the write-through `cache`, delete invalidates.
//! Target URLs are validated as absolute http(s) URLs on every write.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use hookline_core::{Subscription, SubscriptionId};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{error::ApiError, AppState};

/// Request body for creating a subscription.
#[derive(Debug, Deserialize)]
pub struct SubscriptionCreate {
    /// Absolute http(s) URL that receives deliveries.
    pub target_url: String,
    /// Optional opaque secret.
    pub secret: Option<String>,
    /// Optional event tag set.
    pub events: Option<Vec<String>>,
}

/// Request body for patching a subscription. Absent fields are unchanged.
#[derive(Debug, Deserialize)]
pub struct SubscriptionUpdate {
    /// Replacement target URL.
    pub target_url: Option<String>,
    /// Replacement secret.
    pub secret: Option<String>,
    /// Replacement event tag set.
    pub events: Option<Vec<String>>,
}

/// Pagination query for listing subscriptions.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Maximum rows to return.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Rows to skip.
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

fn validate_target_url(raw: &str) -> Result<(), ApiError> {
    let url = url::Url::parse(raw)
        .map_err(|e| ApiError::InvalidTargetUrl { message: e.to_string() })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::InvalidTargetUrl {
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ApiError::InvalidTargetUrl { message: "missing host".to_string() });
    }
    Ok(())
}

/// Creates a subscription and warms the cache.
#[instrument(name = "create_subscription", skip(state, body))]
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(body): Json<SubscriptionCreate>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    validate_target_url(&body.target_url)?;

    let subscription = Subscription {
        id: SubscriptionId::new(),
        target_url: body.target_url,
        secret: body.secret,
        events: body.events,
    };

    state.storage.subscriptions.create(&subscription).await.map_err(|_| ApiError::StoreUnavailable)?;
    state.cache.cache(&subscription).await;

    info!(subscription_id = %subscription.id, "subscription created");
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// Fetches one subscription.
pub async fn read_subscription(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .storage
        .subscriptions
        .find(SubscriptionId::from(id))
        .await
        .map_err(|_| ApiError::StoreUnavailable)?
        .ok_or(ApiError::SubscriptionNotFound)?;

    Ok(Json(subscription))
}

/// Lists subscriptions, newest first.
pub async fn list_subscriptions(
    Query(query): Query<ListQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Subscription>>, ApiError> {
    let subscriptions = state
        .storage
        .subscriptions
        .list(query.limit, query.offset)
        .await
        .map_err(|_| ApiError::StoreUnavailable)?;

    Ok(Json(subscriptions))
}

/// Applies a partial update and re-warms the cache.
#[instrument(name = "update_subscription", skip(state, body))]
pub async fn update_subscription(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
    Json(body): Json<SubscriptionUpdate>,
) -> Result<Json<Subscription>, ApiError> {
    let id = SubscriptionId::from(id);

    let mut subscription = state
        .storage
        .subscriptions
        .find(id)
        .await
        .map_err(|_| ApiError::StoreUnavailable)?
        .ok_or(ApiError::SubscriptionNotFound)?;

    if let Some(target_url) = body.target_url {
        validate_target_url(&target_url)?;
        subscription.target_url = target_url;
    }
    if let Some(secret) = body.secret {
        subscription.secret = Some(secret);
    }
    if let Some(events) = body.events {
        subscription.events = Some(events);
    }

    state.storage.subscriptions.update(&subscription).await?;
    state.cache.cache(&subscription).await;

    info!(subscription_id = %subscription.id, "subscription updated");
    Ok(Json(subscription))
}

/// Deletes a subscription and invalidates its cache entry.
///
/// Prior delivery logs are kept.
#[instrument(name = "delete_subscription", skip(state))]
pub async fn delete_subscription(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let id = SubscriptionId::from(id);

    state.storage.subscriptions.delete(id).await?;
    state.cache.invalidate(id).await;

    info!(subscription_id = %id, "subscription deleted");
    Ok(StatusCode::NO_CONTENT)
}
