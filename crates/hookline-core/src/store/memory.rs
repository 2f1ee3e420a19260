//! In-memory storage implementation.
//!
//! Implements the store traits over `HashMap`s guarded by a tokio `RwLock`.
//! Exists for local development and tests, where no Postgres instance is
//! available. Not durable: all state is lost on process restart. Operations
//! are consistent within one process; mutations take the write lock, reads
//! the read lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{DeliveryLogStore, SubscriptionStore};
use crate::{
    error::{CoreError, Result},
    models::{DeliveryLog, Subscription, SubscriptionId, WebhookId},
};

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    // Insertion order doubles as creation order for list().
    subscription_order: Vec<SubscriptionId>,
    delivery_logs: Vec<DeliveryLog>,
}

/// Process-local store used by tests and development setups.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn create(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.subscriptions.contains_key(&subscription.id) {
            return Err(CoreError::ConstraintViolation(format!(
                "subscription {} already exists",
                subscription.id
            )));
        }
        inner.subscription_order.push(subscription.id);
        inner.subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn find(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        let inner = self.inner.read().await;
        Ok(inner.subscriptions.get(&id).cloned())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Subscription>> {
        let inner = self.inner.read().await;
        let subscriptions = inner
            .subscription_order
            .iter()
            .rev()
            .filter_map(|id| inner.subscriptions.get(id).cloned())
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect();
        Ok(subscriptions)
    }

    async fn update(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.inner.write().await;
        match inner.subscriptions.get_mut(&subscription.id) {
            Some(existing) => {
                *existing = subscription.clone();
                Ok(())
            },
            None => Err(CoreError::NotFound(format!("subscription {}", subscription.id))),
        }
    }

    async fn delete(&self, id: SubscriptionId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.subscriptions.remove(&id).is_none() {
            return Err(CoreError::NotFound(format!("subscription {id}")));
        }
        inner.subscription_order.retain(|existing| *existing != id);
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl DeliveryLogStore for MemoryStore {
    async fn append(&self, log: &DeliveryLog) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.delivery_logs.push(log.clone());
        Ok(())
    }

    async fn find_by_webhook(&self, webhook_id: WebhookId, limit: i64) -> Result<Vec<DeliveryLog>> {
        let inner = self.inner.read().await;
        let mut logs: Vec<DeliveryLog> = inner
            .delivery_logs
            .iter()
            .filter(|log| log.webhook_id == webhook_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| {
            b.timestamp.cmp(&a.timestamp).then(b.attempt_number.cmp(&a.attempt_number))
        });
        logs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(logs)
    }

    async fn count_by_webhook(&self, webhook_id: WebhookId) -> Result<i64> {
        let inner = self.inner.read().await;
        let count = inner.delivery_logs.iter().filter(|log| log.webhook_id == webhook_id).count();
        Ok(count as i64)
    }

    async fn find_by_subscription(
        &self,
        subscription_id: SubscriptionId,
        limit: i64,
    ) -> Result<Vec<DeliveryLog>> {
        let inner = self.inner.read().await;
        let mut logs: Vec<DeliveryLog> = inner
            .delivery_logs
            .iter()
            .filter(|log| log.subscription_id == subscription_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(logs)
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.delivery_logs.len();
        inner.delivery_logs.retain(|log| log.timestamp >= cutoff);
        Ok((before - inner.delivery_logs.len()) as u64)
    }
}
