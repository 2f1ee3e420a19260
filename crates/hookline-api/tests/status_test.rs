//! Status read API tests over seeded delivery logs.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::Utc;
use hookline_api::{create_router, AppState, Config};
use hookline_cache::{InMemoryCacheBackend, SubscriptionCache};
use hookline_core::{
    DeliveryJob, DeliveryLog, DeliveryOutcome, Storage, SubscriptionId, WebhookId,
};
use hookline_queue::InMemoryJobStore;
use http_body_util::BodyExt;
use tower::ServiceExt;

fn test_app() -> (Router, Storage) {
    let storage = Storage::in_memory();
    let cache = Arc::new(SubscriptionCache::new(
        Arc::new(InMemoryCacheBackend::new()),
        storage.subscriptions.clone(),
    ));
    let state = AppState::new(storage.clone(), cache, Arc::new(InMemoryJobStore::new()));
    let router = create_router(state, &Config::default());
    (router, storage)
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn seed_attempts(
    storage: &Storage,
    subscription_id: SubscriptionId,
    webhook_id: WebhookId,
    outcomes: &[(DeliveryOutcome, Option<i32>, Option<&str>)],
) {
    let mut job = DeliveryJob {
        subscription_id,
        payload: serde_json::json!({}),
        event_type: None,
        signature: None,
        webhook_id,
        attempt: 1,
    };

    for (index, (outcome, status_code, error)) in outcomes.iter().enumerate() {
        job.attempt = u32::try_from(index + 1).unwrap();
        let log = DeliveryLog::for_attempt(
            &job,
            "https://example.com/hook",
            Utc::now() + chrono::Duration::milliseconds(i64::try_from(index).unwrap()),
            *outcome,
            *status_code,
            error.map(ToString::to_string),
        );
        storage.delivery_logs.append(&log).await.unwrap();
    }
}

#[tokio::test]
async fn unknown_webhook_is_404() {
    let (router, _storage) = test_app();

    let response = get(&router, "/status/00000000-0000-0000-0000-000000000000").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "WebhookNotFound");
}

#[tokio::test]
async fn status_summarizes_latest_attempt() {
    let (router, storage) = test_app();
    let subscription_id = SubscriptionId::new();
    let webhook_id = WebhookId::new();

    seed_attempts(
        &storage,
        subscription_id,
        webhook_id,
        &[
            (DeliveryOutcome::FailedAttempt, Some(500), Some("HTTP 500")),
            (DeliveryOutcome::FailedAttempt, Some(500), Some("HTTP 500")),
            (DeliveryOutcome::Success, Some(200), None),
        ],
    )
    .await;

    let response = get(&router, &format!("/status/{webhook_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["webhook_id"], webhook_id.to_string());
    assert_eq!(body["subscription_id"], subscription_id.to_string());
    assert_eq!(body["total_attempts"], 3);
    assert_eq!(body["final_outcome"], "Success");
    assert_eq!(body["last_status_code"], 200);
    assert!(body["error"].is_null());

    let attempts = body["recent_attempts"].as_array().unwrap();
    assert_eq!(attempts.len(), 3);
    // Newest first, with outcome strings matching the stored vocabulary.
    assert_eq!(attempts[0]["outcome"], "Success");
    assert_eq!(attempts[1]["outcome"], "Failed Attempt");
    assert_eq!(attempts[2]["attempt_number"], 1);
}

#[tokio::test]
async fn status_reports_permanent_failure() {
    let (router, storage) = test_app();
    let webhook_id = WebhookId::new();

    seed_attempts(
        &storage,
        SubscriptionId::new(),
        webhook_id,
        &[
            (DeliveryOutcome::FailedAttempt, Some(503), Some("HTTP 503")),
            (DeliveryOutcome::Failure, None, Some("request timeout after 5s")),
        ],
    )
    .await;

    let body = json_body(get(&router, &format!("/status/{webhook_id}")).await).await;

    assert_eq!(body["final_outcome"], "Failure");
    assert!(body["last_status_code"].is_null());
    assert_eq!(body["error"], "request timeout after 5s");
}

#[tokio::test]
async fn subscription_attempts_honor_limit_and_order() {
    let (router, storage) = test_app();
    let subscription_id = SubscriptionId::new();

    for _ in 0..3 {
        seed_attempts(
            &storage,
            subscription_id,
            WebhookId::new(),
            &[(DeliveryOutcome::Success, Some(200), None)],
        )
        .await;
    }

    let response =
        get(&router, &format!("/subscriptions/{subscription_id}/attempts?limit=2")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body.as_array().unwrap().len(), 2);

    // Unknown subscription simply has no attempts.
    let response = get(
        &router,
        "/subscriptions/00000000-0000-0000-0000-000000000000/attempts",
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(json_body(response).await.as_array().unwrap().is_empty());
}
