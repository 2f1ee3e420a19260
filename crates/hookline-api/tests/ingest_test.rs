//! Router-level ingestion tests over in-memory backends.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hookline_api::{create_router, AppState, Config};
use hookline_cache::{InMemoryCacheBackend, SubscriptionCache};
use hookline_core::{DeliveryJob, Storage, Subscription, SubscriptionId};
use hookline_queue::{InMemoryJobStore, JobLease, JobStore, LeasedJob, QueueError, DELIVERIES_QUEUE};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

struct TestApp {
    router: Router,
    storage: Storage,
    jobs: Arc<InMemoryJobStore>,
}

fn test_app() -> TestApp {
    let storage = Storage::in_memory();
    let jobs = Arc::new(InMemoryJobStore::new());
    let cache = Arc::new(SubscriptionCache::new(
        Arc::new(InMemoryCacheBackend::new()),
        storage.subscriptions.clone(),
    ));

    let state = AppState::new(storage.clone(), cache, jobs.clone());
    let router = create_router(state, &Config::default());

    TestApp { router, storage, jobs }
}

async fn register(app: &TestApp, events: Option<Vec<String>>) -> Subscription {
    let subscription = Subscription {
        id: SubscriptionId::new(),
        target_url: "https://example.com/hook".to_string(),
        secret: None,
        events,
    };
    app.storage.subscriptions.create(&subscription).await.unwrap();
    subscription
}

fn ingest_request(subscription_id: impl std::fmt::Display, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/ingest/{subscription_id}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn valid_ingest_returns_202_and_enqueues_job() {
    let app = test_app();
    let subscription = register(&app, None).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/ingest/{}", subscription.id))
        .header("content-type", "application/json")
        .header("X-Event-Type", "order.created")
        .header("X-Signature", "sha256=abc")
        .body(Body::from(r#"{"x":1}"#))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    let webhook_id: Uuid =
        body["webhook_id"].as_str().expect("webhook_id present").parse().expect("valid uuid");

    let leased = app
        .jobs
        .dequeue(DELIVERIES_QUEUE, Duration::ZERO)
        .await
        .unwrap()
        .expect("job was enqueued before the 202");
    let job: DeliveryJob = leased.job;
    assert_eq!(job.subscription_id, subscription.id);
    assert_eq!(job.webhook_id.0, webhook_id);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.payload, serde_json::json!({"x": 1}));
    assert_eq!(job.event_type.as_deref(), Some("order.created"));
    assert_eq!(job.signature.as_deref(), Some("sha256=abc"));
}

#[tokio::test]
async fn unknown_subscription_is_404_with_no_enqueue() {
    let app = test_app();

    let response = app
        .router
        .clone()
        .oneshot(ingest_request("00000000-0000-0000-0000-000000000000", "{}"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "SubscriptionNotFound");

    assert!(app.jobs.dequeue(DELIVERIES_QUEUE, Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_json_is_400_with_no_enqueue() {
    let app = test_app();
    let subscription = register(&app, None).await;

    let response = app
        .router
        .clone()
        .oneshot(ingest_request(subscription.id, "{not json"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "InvalidPayload");

    assert!(app.jobs.dequeue(DELIVERIES_QUEUE, Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn successive_ingests_mint_distinct_webhook_ids() {
    let app = test_app();
    let subscription = register(&app, None).await;

    let first = app
        .router
        .clone()
        .oneshot(ingest_request(subscription.id, r#"{"n":1}"#))
        .await
        .unwrap();
    let second = app
        .router
        .clone()
        .oneshot(ingest_request(subscription.id, r#"{"n":1}"#))
        .await
        .unwrap();

    let first_id = json_body(first).await["webhook_id"].as_str().unwrap().to_string();
    let second_id = json_body(second).await["webhook_id"].as_str().unwrap().to_string();
    assert_ne!(first_id, second_id);
}

#[tokio::test]
async fn event_type_mismatch_is_still_enqueued() {
    let app = test_app();
    let subscription = register(&app, Some(vec!["order.created".to_string()])).await;

    let request = Request::builder()
        .method("POST")
        .uri(format!("/ingest/{}", subscription.id))
        .header("content-type", "application/json")
        .header("X-Event-Type", "payment.refunded")
        .body(Body::from("{}"))
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The events field is advisory; no filtering happens at ingest.
    let leased = app.jobs.dequeue(DELIVERIES_QUEUE, Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(leased.job.event_type.as_deref(), Some("payment.refunded"));
}

#[tokio::test]
async fn oversized_payload_is_413() {
    let app = test_app();
    let subscription = register(&app, None).await;

    let oversized = format!(r#"{{"blob":"{}"}}"#, "a".repeat(1024 * 1024 + 1));
    let response = app
        .router
        .clone()
        .oneshot(ingest_request(subscription.id, &oversized))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "PayloadTooLarge");
}

/// Queue stub that refuses every enqueue, simulating a Redis outage.
struct DownJobStore;

#[async_trait]
impl JobStore for DownJobStore {
    async fn enqueue(&self, _queue: &str, _job: &DeliveryJob) -> hookline_queue::Result<Uuid> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn enqueue_in(
        &self,
        _queue: &str,
        _delay: Duration,
        _job: &DeliveryJob,
    ) -> hookline_queue::Result<Uuid> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn dequeue(&self, _queue: &str, _wait: Duration) -> hookline_queue::Result<Option<LeasedJob>> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn ack(&self, _queue: &str, _lease: &JobLease) -> hookline_queue::Result<()> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn promote_due(&self, _queue: &str) -> hookline_queue::Result<u64> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn reclaim_expired(&self, _queue: &str) -> hookline_queue::Result<u64> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }
}

#[tokio::test]
async fn queue_outage_maps_to_503() {
    let storage = Storage::in_memory();
    let cache = Arc::new(SubscriptionCache::new(
        Arc::new(InMemoryCacheBackend::new()),
        storage.subscriptions.clone(),
    ));
    let subscription = Subscription {
        id: SubscriptionId::new(),
        target_url: "https://example.com/hook".to_string(),
        secret: None,
        events: None,
    };
    storage.subscriptions.create(&subscription).await.unwrap();

    let state = AppState::new(storage, cache, Arc::new(DownJobStore));
    let router = create_router(state, &Config::default());

    let response = router.oneshot(ingest_request(subscription.id, "{}")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["error"]["kind"], "JobStoreUnavailable");
}
