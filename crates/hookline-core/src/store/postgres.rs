//! PostgreSQL-backed storage implementation.
//!
//! Each call opens its own short-lived statement against the shared pool;
//! there are no long-held locks. The delivery log purge is a single bulk
//! delete over the indexed `timestamp` column so it never blocks ingestion.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::{DeliveryLogStore, SubscriptionStore};
use crate::{
    error::{CoreError, Result},
    models::{DeliveryLog, Subscription, SubscriptionId, WebhookId},
};

/// Durable store over a shared Postgres connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new store instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensures the schema exists.
    ///
    /// Idempotent bootstrap run at startup: creates the two tables and the
    /// indexes the hot paths depend on.
    ///
    /// # Errors
    ///
    /// Returns error if any DDL statement fails.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id UUID PRIMARY KEY,
                target_url TEXT NOT NULL,
                secret TEXT,
                events TEXT[],
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS delivery_logs (
                id UUID PRIMARY KEY,
                webhook_id UUID NOT NULL,
                subscription_id UUID NOT NULL,
                target_url TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                attempt_number INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                status_code INTEGER,
                error TEXT
            )
            ",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_delivery_logs_webhook
             ON delivery_logs(webhook_id, attempt_number)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_delivery_logs_subscription
             ON delivery_logs(subscription_id, timestamp DESC)",
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_delivery_logs_timestamp
             ON delivery_logs(timestamp)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn create(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO subscriptions (id, target_url, secret, events)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(subscription.id)
        .bind(&subscription.target_url)
        .bind(&subscription.secret)
        .bind(&subscription.events)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let subscription = sqlx::query_as::<_, Subscription>(
            "SELECT id, target_url, secret, events FROM subscriptions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Subscription>> {
        let subscriptions = sqlx::query_as::<_, Subscription>(
            r"
            SELECT id, target_url, secret, events
            FROM subscriptions
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            ",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(subscriptions)
    }

    async fn update(&self, subscription: &Subscription) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE subscriptions
            SET target_url = $2, secret = $3, events = $4, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(subscription.id)
        .bind(&subscription.target_url)
        .bind(&subscription.secret)
        .bind(&subscription.events)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("subscription {}", subscription.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: SubscriptionId) -> Result<()> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("subscription {id}")));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryLogStore for PostgresStore {
    async fn append(&self, log: &DeliveryLog) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO delivery_logs (
                id, webhook_id, subscription_id, target_url,
                timestamp, attempt_number, outcome, status_code, error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(log.id)
        .bind(log.webhook_id)
        .bind(log.subscription_id)
        .bind(&log.target_url)
        .bind(log.timestamp)
        .bind(i32::try_from(log.attempt_number).unwrap_or(i32::MAX))
        .bind(log.outcome)
        .bind(log.status_code)
        .bind(&log.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_webhook(&self, webhook_id: WebhookId, limit: i64) -> Result<Vec<DeliveryLog>> {
        let logs = sqlx::query_as::<_, DeliveryLog>(
            r"
            SELECT id, webhook_id, subscription_id, target_url,
                   timestamp, attempt_number, outcome, status_code, error
            FROM delivery_logs
            WHERE webhook_id = $1
            ORDER BY timestamp DESC, attempt_number DESC
            LIMIT $2
            ",
        )
        .bind(webhook_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    async fn count_by_webhook(&self, webhook_id: WebhookId) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_logs WHERE webhook_id = $1")
                .bind(webhook_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count.0)
    }

    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        limit: i64,
    ) -> Result<Vec<DeliveryLog>> {
        let logs = sqlx::query_as::<_, DeliveryLog>(
            r"
            SELECT id, webhook_id, subscription_id, target_url,
                   timestamp, attempt_number, outcome, status_code, error
            FROM delivery_logs
            WHERE subscription_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            ",
        )
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(logs)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM delivery_logs WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
