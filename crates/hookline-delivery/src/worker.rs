//! Delivery worker engine.
//!
//! Workers consume delivery jobs from the shared queue one at a time and run
//! the attempt protocol: resolve the subscription through the cache, POST to
//! its current target URL, classify the outcome, append exactly one log row
//! per executed attempt, and either finish or schedule the next attempt on
//! the backoff schedule. A retry is enqueued only after the current
//! attempt's log row is committed, which keeps attempt numbers for one
//! webhook strictly ordered.
//!
//! Jobs are acknowledged only after their side effects are durable. A
//! storage or queue failure leaves the lease unacknowledged so the
//! visibility timeout redelivers the job; a duplicate log row is an accepted
//! artefact of at-least-once execution.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use hookline_cache::SubscriptionCache;
use hookline_core::{
    Clock, DeliveryJob, DeliveryLog, DeliveryLogStore, DeliveryOutcome, Subscription,
};
use hookline_queue::{JobStore, LeasedJob, DELIVERIES_QUEUE};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient, DeliveryRequest},
    error::{DeliveryError, Result},
    retry::{RetryDecision, RetryPolicy},
    worker_pool::WorkerPool,
};

/// Configuration for the delivery engine.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Logical queue consumed by the workers.
    pub queue: String,

    /// How long a worker blocks on an empty queue before rechecking for
    /// shutdown.
    pub poll_interval: Duration,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Retry policy applied to transient failures.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers to drain on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue: DELIVERIES_QUEUE.to_string(),
            poll_interval: Duration::from_secs(1),
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared dependencies handed to every worker.
#[derive(Clone)]
pub struct DeliveryContext {
    /// Job queue the workers consume from.
    pub jobs: Arc<dyn JobStore>,

    /// Cache-aside subscription lookup.
    pub cache: Arc<SubscriptionCache>,

    /// Delivery log sink.
    pub logs: Arc<dyn DeliveryLogStore>,

    /// Time source for sleeps and timestamps.
    pub clock: Arc<dyn Clock>,
}

/// Statistics for delivery engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of active delivery workers.
    pub active_workers: usize,
    /// Total jobs processed since startup.
    pub jobs_processed: u64,
    /// Successful deliveries.
    pub successful_deliveries: u64,
    /// Transient failures that were rescheduled.
    pub failed_attempts: u64,
    /// Permanent failures after the attempt budget was exhausted.
    pub permanent_failures: u64,
    /// Jobs dropped because their subscription vanished.
    pub dropped_jobs: u64,
    /// Jobs currently being delivered.
    pub in_flight_deliveries: u64,
}

/// Main engine coordinating the delivery worker pool.
pub struct DeliveryEngine {
    context: DeliveryContext,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
}

impl DeliveryEngine {
    /// Creates a new delivery engine.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be initialized.
    pub fn new(context: DeliveryContext, config: DeliveryConfig) -> Result<Self> {
        let client = Arc::new(DeliveryClient::new(config.client_config.clone())?);

        Ok(Self {
            context,
            config,
            client,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
        })
    }

    /// Starts the configured worker pool.
    ///
    /// Returns immediately after spawning workers; use `shutdown()` to stop
    /// gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the worker pool fails to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            queue = %self.config.queue,
            "starting webhook delivery engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.context.clone(),
            self.config.clone(),
            self.client.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        worker_pool.spawn_workers().await?;
        self.worker_pool = Some(worker_pool);

        Ok(())
    }

    /// Gracefully shuts down the engine, draining in-flight deliveries.
    ///
    /// # Errors
    ///
    /// Returns error if workers fail to stop within the shutdown timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");

        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        }
        Ok(())
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }
}

/// Individual worker consuming delivery jobs.
pub struct DeliveryWorker {
    id: usize,
    context: DeliveryContext,
    config: DeliveryConfig,
    client: Arc<DeliveryClient>,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    pub fn new(
        id: usize,
        context: DeliveryContext,
        config: DeliveryConfig,
        client: Arc<DeliveryClient>,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, context, config, client, stats, cancellation_token }
    }

    /// Main worker loop: dequeues and processes jobs until cancelled.
    ///
    /// # Errors
    ///
    /// Job-level failures are logged and leave the job for redelivery; only
    /// setup problems terminate the loop with an error.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            match self.context.jobs.dequeue(&self.config.queue, self.config.poll_interval).await {
                Ok(Some(leased)) => {
                    if let Err(error) = self.process(leased).await {
                        // No ack happened: the lease expiry will redeliver.
                        error!(
                            worker_id = self.id,
                            error = %error,
                            "job processing failed, leaving job for redelivery"
                        );
                    }
                },
                Ok(None) => {
                    // Empty poll; loop to recheck cancellation.
                },
                Err(error) => {
                    error!(worker_id = self.id, error = %error, "job dequeue failed");
                    tokio::select! {
                        () = self.context.clock.sleep(Duration::from_secs(5)) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }

    /// Runs the attempt protocol for one leased job.
    ///
    /// # Errors
    ///
    /// Returns error when storage or the queue fails; the job is then left
    /// unacknowledged for redelivery.
    pub async fn process(&self, leased: LeasedJob) -> Result<()> {
        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries += 1;
        }

        let result = self.run_attempt(leased).await;

        {
            let mut stats = self.stats.write().await;
            stats.in_flight_deliveries -= 1;
            stats.jobs_processed += 1;
        }

        result
    }

    async fn run_attempt(&self, leased: LeasedJob) -> Result<()> {
        let job = &leased.job;

        // Per-attempt lookup: a mutated subscription is contacted at its
        // current URL, a vanished one drops the job without a log row.
        let subscription = match self.context.cache.get(job.subscription_id).await? {
            Some(subscription) => subscription,
            None => {
                warn!(
                    worker_id = self.id,
                    webhook_id = %job.webhook_id,
                    subscription_id = %job.subscription_id,
                    attempt_number = job.attempt,
                    "subscription vanished, dropping delivery job"
                );
                {
                    let mut stats = self.stats.write().await;
                    stats.dropped_jobs += 1;
                }
                self.context.jobs.ack(&self.config.queue, &leased.lease).await?;
                return Ok(());
            },
        };

        let attempt = self.execute_attempt(job, &subscription).await;
        let timestamp = self.context.clock.now_utc();

        if attempt.success {
            let log = DeliveryLog::for_attempt(
                job,
                &subscription.target_url,
                timestamp,
                DeliveryOutcome::Success,
                attempt.status_code,
                None,
            );
            self.context.logs.append(&log).await.map_err(DeliveryError::Storage)?;
            self.context.jobs.ack(&self.config.queue, &leased.lease).await?;

            {
                let mut stats = self.stats.write().await;
                stats.successful_deliveries += 1;
            }
            info!(
                worker_id = self.id,
                webhook_id = %job.webhook_id,
                subscription_id = %job.subscription_id,
                attempt_number = job.attempt,
                outcome = %DeliveryOutcome::Success,
                status_code = attempt.status_code,
                "webhook delivered"
            );
            return Ok(());
        }

        match self.config.retry_policy.decide(job.attempt) {
            RetryDecision::Retry { delay } => {
                // The log row must be durable before the retry exists,
                // otherwise a crash could reorder attempt numbers.
                let log = DeliveryLog::for_attempt(
                    job,
                    &subscription.target_url,
                    timestamp,
                    DeliveryOutcome::FailedAttempt,
                    attempt.status_code,
                    attempt.error.clone(),
                );
                self.context.logs.append(&log).await.map_err(DeliveryError::Storage)?;

                self.context
                    .jobs
                    .enqueue_in(&self.config.queue, delay, &job.next_attempt())
                    .await?;
                self.context.jobs.ack(&self.config.queue, &leased.lease).await?;

                {
                    let mut stats = self.stats.write().await;
                    stats.failed_attempts += 1;
                }
                warn!(
                    worker_id = self.id,
                    webhook_id = %job.webhook_id,
                    subscription_id = %job.subscription_id,
                    attempt_number = job.attempt,
                    outcome = %DeliveryOutcome::FailedAttempt,
                    status_code = attempt.status_code,
                    error = attempt.error.as_deref(),
                    retry_delay_secs = delay.as_secs(),
                    "delivery failed, retry scheduled"
                );
            },
            RetryDecision::GiveUp => {
                let log = DeliveryLog::for_attempt(
                    job,
                    &subscription.target_url,
                    timestamp,
                    DeliveryOutcome::Failure,
                    attempt.status_code,
                    attempt.error.clone(),
                );
                self.context.logs.append(&log).await.map_err(DeliveryError::Storage)?;
                self.context.jobs.ack(&self.config.queue, &leased.lease).await?;

                {
                    let mut stats = self.stats.write().await;
                    stats.permanent_failures += 1;
                }
                error!(
                    worker_id = self.id,
                    webhook_id = %job.webhook_id,
                    subscription_id = %job.subscription_id,
                    attempt_number = job.attempt,
                    outcome = %DeliveryOutcome::Failure,
                    status_code = attempt.status_code,
                    error = attempt.error.as_deref(),
                    "delivery permanently failed"
                );
            },
        }

        Ok(())
    }

    /// Performs the outbound POST and classifies the result.
    ///
    /// Any 2xx status is a success; every other status and every transport
    /// failure is transient.
    async fn execute_attempt(&self, job: &DeliveryJob, subscription: &Subscription) -> AttemptResult {
        let body = match serde_json::to_vec(&job.payload) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                // Payload was valid JSON at ingest; re-encoding cannot
                // realistically fail, but classify it transient if it does.
                return AttemptResult {
                    success: false,
                    status_code: None,
                    error: Some(format!("payload serialization failed: {e}")),
                };
            },
        };

        let request = DeliveryRequest {
            webhook_id: job.webhook_id,
            subscription_id: job.subscription_id,
            url: subscription.target_url.clone(),
            body,
            event_type: job.event_type.clone(),
            signature: job.signature.clone(),
            attempt: job.attempt,
        };

        match self.client.deliver(request).await {
            Ok(response) if response.is_success => AttemptResult {
                success: true,
                status_code: Some(i32::from(response.status_code)),
                error: None,
            },
            Ok(response) => AttemptResult {
                success: false,
                status_code: Some(i32::from(response.status_code)),
                error: Some(format!("HTTP {}", response.status_code)),
            },
            Err(error) => AttemptResult {
                success: false,
                status_code: None,
                error: Some(error.to_string()),
            },
        }
    }
}

/// Classified result of one outbound POST.
struct AttemptResult {
    success: bool,
    status_code: Option<i32>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use hookline_cache::{InMemoryCacheBackend, SubscriptionCache};
    use hookline_core::{RealClock, Storage, Subscription, SubscriptionId, WebhookId};
    use hookline_queue::InMemoryJobStore;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    struct TestRig {
        storage: Storage,
        jobs: Arc<InMemoryJobStore>,
        worker: DeliveryWorker,
    }

    fn rig_with_policy(policy: RetryPolicy) -> TestRig {
        let storage = Storage::in_memory();
        let jobs = Arc::new(InMemoryJobStore::new());
        let cache = Arc::new(SubscriptionCache::new(
            Arc::new(InMemoryCacheBackend::new()),
            storage.subscriptions.clone(),
        ));

        let context = DeliveryContext {
            jobs: jobs.clone(),
            cache,
            logs: storage.delivery_logs.clone(),
            clock: Arc::new(RealClock::new()),
        };
        let config = DeliveryConfig { retry_policy: policy, ..Default::default() };
        let client =
            Arc::new(DeliveryClient::new(config.client_config.clone()).expect("client builds"));

        let worker = DeliveryWorker::new(
            0,
            context,
            config,
            client,
            Arc::new(RwLock::new(EngineStats::default())),
            CancellationToken::new(),
        );

        TestRig { storage, jobs, worker }
    }

    fn rig() -> TestRig {
        rig_with_policy(RetryPolicy::default())
    }

    async fn create_subscription(rig: &TestRig, target_url: &str) -> Subscription {
        let subscription = Subscription {
            id: SubscriptionId::new(),
            target_url: target_url.to_string(),
            secret: None,
            events: None,
        };
        rig.storage.subscriptions.create(&subscription).await.unwrap();
        subscription
    }

    fn job_for(subscription: &Subscription, attempt: u32) -> DeliveryJob {
        DeliveryJob {
            subscription_id: subscription.id,
            payload: serde_json::json!({"x": 1}),
            event_type: None,
            signature: None,
            webhook_id: WebhookId::new(),
            attempt,
        }
    }

    async fn enqueue_and_take(rig: &TestRig, job: &DeliveryJob) -> LeasedJob {
        rig.jobs.enqueue(DELIVERIES_QUEUE, job).await.unwrap();
        rig.jobs.dequeue(DELIVERIES_QUEUE, Duration::ZERO).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn successful_attempt_writes_one_success_row() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rig = rig();
        let subscription = create_subscription(&rig, &format!("{}/ok", mock_server.uri())).await;
        let job = job_for(&subscription, 1);
        let leased = enqueue_and_take(&rig, &job).await;

        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, DeliveryOutcome::Success);
        assert_eq!(logs[0].attempt_number, 1);
        assert_eq!(logs[0].status_code, Some(200));
        assert_eq!(logs[0].error, None);

        // Terminal attempt: nothing rescheduled, nothing left in flight.
        assert_eq!(rig.jobs.ready_len(DELIVERIES_QUEUE), 0);
        assert_eq!(rig.jobs.scheduled_len(DELIVERIES_QUEUE), 0);
    }

    #[tokio::test]
    async fn server_error_schedules_retry_with_incremented_attempt() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let rig = rig();
        let subscription = create_subscription(&rig, &format!("{}/hook", mock_server.uri())).await;
        let job = job_for(&subscription, 1);
        let leased = enqueue_and_take(&rig, &job).await;

        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, DeliveryOutcome::FailedAttempt);
        assert_eq!(logs[0].status_code, Some(500));
        assert_eq!(logs[0].error.as_deref(), Some("HTTP 500"));

        assert_eq!(rig.jobs.scheduled_len(DELIVERIES_QUEUE), 1);
        rig.jobs.promote_due(DELIVERIES_QUEUE).await.unwrap();
        // Default schedule delays the retry by 10s, so it is not yet due.
        assert_eq!(rig.jobs.ready_len(DELIVERIES_QUEUE), 0);
    }

    #[tokio::test]
    async fn redirect_counts_as_failed_attempt() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/elsewhere"))
            .mount(&mock_server)
            .await;

        let rig = rig();
        let subscription = create_subscription(&rig, &format!("{}/hook", mock_server.uri())).await;
        let job = job_for(&subscription, 1);
        let leased = enqueue_and_take(&rig, &job).await;

        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert_eq!(logs[0].outcome, DeliveryOutcome::FailedAttempt);
        assert_eq!(logs[0].status_code, Some(302));
    }

    #[tokio::test]
    async fn final_attempt_failure_is_terminal() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let rig = rig();
        let subscription = create_subscription(&rig, &format!("{}/hook", mock_server.uri())).await;
        let job = job_for(&subscription, 5);
        let leased = enqueue_and_take(&rig, &job).await;

        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, DeliveryOutcome::Failure);
        assert_eq!(logs[0].attempt_number, 5);

        // Budget exhausted: no retry exists anywhere.
        assert_eq!(rig.jobs.ready_len(DELIVERIES_QUEUE), 0);
        assert_eq!(rig.jobs.scheduled_len(DELIVERIES_QUEUE), 0);
    }

    #[tokio::test]
    async fn vanished_subscription_drops_job_without_log_row() {
        let rig = rig();
        let subscription = Subscription {
            id: SubscriptionId::new(),
            target_url: "http://127.0.0.1:9/hook".to_string(),
            secret: None,
            events: None,
        };
        // Never stored: the lookup misses both cache and store.
        let job = job_for(&subscription, 2);
        let leased = enqueue_and_take(&rig, &job).await;

        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert!(logs.is_empty());
        assert_eq!(rig.jobs.ready_len(DELIVERIES_QUEUE), 0);
        assert_eq!(rig.jobs.scheduled_len(DELIVERIES_QUEUE), 0);
    }

    #[tokio::test]
    async fn attempt_contacts_current_target_url() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/moved"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rig = rig();
        let subscription = create_subscription(&rig, "http://127.0.0.1:9/original").await;

        // Retarget between enqueue and delivery; the attempt must use the
        // new URL and snapshot it in the log row.
        let moved = Subscription {
            target_url: format!("{}/moved", mock_server.uri()),
            ..subscription.clone()
        };
        rig.storage.subscriptions.update(&moved).await.unwrap();

        let job = job_for(&subscription, 1);
        let leased = enqueue_and_take(&rig, &job).await;
        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert_eq!(logs[0].target_url, moved.target_url);
        assert_eq!(logs[0].outcome, DeliveryOutcome::Success);
    }

    #[tokio::test]
    async fn event_type_mismatch_is_still_delivered() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .and(matchers::header("X-Event-Type", "payment.refunded"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let rig = rig();
        let mut subscription =
            create_subscription(&rig, &format!("{}/hook", mock_server.uri())).await;
        subscription.events = Some(vec!["order.created".to_string()]);
        rig.storage.subscriptions.update(&subscription).await.unwrap();

        let mut job = job_for(&subscription, 1);
        job.event_type = Some("payment.refunded".to_string());
        let leased = enqueue_and_take(&rig, &job).await;

        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].outcome, DeliveryOutcome::Success);
    }

    #[tokio::test]
    async fn timeout_records_null_status_and_timeout_error() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&mock_server)
            .await;

        let mut rig = rig();
        rig.worker.config.client_config.timeout = Duration::from_millis(100);
        rig.worker.client = Arc::new(
            DeliveryClient::new(rig.worker.config.client_config.clone()).expect("client builds"),
        );

        let subscription = create_subscription(&rig, &format!("{}/slow", mock_server.uri())).await;
        let job = job_for(&subscription, 1);
        let leased = enqueue_and_take(&rig, &job).await;

        rig.worker.process(leased).await.unwrap();

        let logs = rig.storage.delivery_logs.find_by_webhook(job.webhook_id, 10).await.unwrap();
        assert_eq!(logs[0].outcome, DeliveryOutcome::FailedAttempt);
        assert_eq!(logs[0].status_code, None);
        assert!(logs[0].error.as_deref().unwrap().contains("timeout"));
    }
}
