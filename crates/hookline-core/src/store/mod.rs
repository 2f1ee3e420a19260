//! Storage layer for subscriptions and delivery logs.
//!
//! The store traits act as an anti-corruption layer between domain models
//! and the backing database. Two implementations exist: a durable Postgres
//! backend for production and an in-memory backend for local development and
//! tests. All persistence goes through these traits; no component issues SQL
//! outside this module.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod postgres;

use crate::{
    error::Result,
    models::{DeliveryLog, Subscription, SubscriptionId, WebhookId},
};

/// Authoritative store for subscription records.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Inserts a new subscription.
    async fn create(&self, subscription: &Subscription) -> Result<()>;

    /// Fetches a subscription by primary key.
    async fn find(&self, id: SubscriptionId) -> Result<Option<Subscription>>;

    /// Lists subscriptions, newest first.
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Subscription>>;

    /// Replaces an existing subscription.
    ///
    /// Returns `CoreError::NotFound` if no row with the given ID exists.
    async fn update(&self, subscription: &Subscription) -> Result<()>;

    /// Deletes a subscription.
    ///
    /// Returns `CoreError::NotFound` if no row with the given ID exists.
    /// Prior delivery logs are left untouched.
    async fn delete(&self, id: SubscriptionId) -> Result<()>;

    /// Verifies the backend is reachable.
    async fn health_check(&self) -> Result<()>;
}

/// Append-mostly store for delivery attempt rows.
#[async_trait]
pub trait DeliveryLogStore: Send + Sync {
    /// Appends one attempt row. Rows are immutable once written.
    async fn append(&self, log: &DeliveryLog) -> Result<()>;

    /// Returns attempts for a webhook, newest first.
    async fn find_by_webhook(&self, webhook_id: WebhookId, limit: i64) -> Result<Vec<DeliveryLog>>;

    /// Counts attempts recorded for a webhook.
    async fn count_by_webhook(&self, webhook_id: WebhookId) -> Result<i64>;

    /// Returns attempts across a subscription, newest first.
    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        limit: i64,
    ) -> Result<Vec<DeliveryLog>>;

    /// Deletes rows with `timestamp` strictly before `cutoff`.
    ///
    /// Runs as a single bulk statement and returns the number of rows
    /// removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Container for the store handles wired into the rest of the system.
#[derive(Clone)]
pub struct Storage {
    /// Subscription records.
    pub subscriptions: Arc<dyn SubscriptionStore>,

    /// Delivery attempt audit trail.
    pub delivery_logs: Arc<dyn DeliveryLogStore>,
}

impl Storage {
    /// Creates storage backed by PostgreSQL.
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        let store = Arc::new(postgres::PostgresStore::new(pool));
        Self { subscriptions: store.clone(), delivery_logs: store }
    }

    /// Creates storage backed by process-local memory.
    ///
    /// Used by tests and local development; all state is lost on restart.
    pub fn in_memory() -> Self {
        let store = Arc::new(memory::MemoryStore::new());
        Self { subscriptions: store.clone(), delivery_logs: store }
    }

    /// Performs a health check against the subscription backend.
    pub async fn health_check(&self) -> Result<()> {
        self.subscriptions.health_check().await
    }
}
