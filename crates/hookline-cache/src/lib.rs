//! Cache-aside subscription lookup.
//!
//! Fronts the durable subscription store with a key/value cache. The cache
//! is never authoritative: a miss, a corrupt entry, or a backend outage all
//! fall through to the store, and backend failures are swallowed, counted,
//! and logged rather than surfaced to callers. Consistency is eventual; an
//! in-flight read racing an update may observe the prior value, which the
//! delivery worker tolerates by re-reading on every attempt.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use hookline_core::{Subscription, SubscriptionId, SubscriptionStore};
use thiserror::Error;
use tracing::{debug, warn};

pub mod memory;
pub mod redis;

pub use memory::InMemoryCacheBackend;
pub use self::redis::RedisCacheBackend;

/// Errors raised by a cache backend.
///
/// These never escape `SubscriptionCache`; they are counted and logged.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache backend could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key/value backend with optional per-entry TTL.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Fetches the raw value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores `value` under `key`, expiring after `ttl` when given.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Removes the entry under `key`, if any.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Counters tracking cache effectiveness and swallowed failures.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    /// Cache hits served without touching the store.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that fell through to the store.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Backend operations that failed and were swallowed.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Cache-aside view over the subscription store.
pub struct SubscriptionCache {
    backend: Arc<dyn CacheBackend>,
    store: Arc<dyn SubscriptionStore>,
    ttl: Option<Duration>,
    stats: CacheStats,
}

impl SubscriptionCache {
    /// Creates a cache with no entry expiry.
    pub fn new(backend: Arc<dyn CacheBackend>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self { backend, store, ttl: None, stats: CacheStats::default() }
    }

    /// Sets a TTL applied to every cached entry.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Current hit/miss/error counters.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn key(id: SubscriptionId) -> String {
        format!("subscription:{id}")
    }

    /// Write-through: stores the full record in the cache.
    ///
    /// Called by subscription CRUD on create and update. Backend failures
    /// are swallowed; the durable store already holds the truth.
    pub async fn cache(&self, subscription: &Subscription) {
        let key = Self::key(subscription.id);
        let value = match serde_json::to_string(subscription) {
            Ok(value) => value,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(subscription_id = %subscription.id, error = %e, "failed to encode subscription for cache");
                return;
            },
        };

        if let Err(e) = self.backend.set(&key, &value, self.ttl).await {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            warn!(subscription_id = %subscription.id, error = %e, "cache write failed");
        }
    }

    /// Cache-aside lookup.
    ///
    /// Consults the cache first; on miss, corrupt entry, or outage it falls
    /// through to the store by primary key, warming the cache on a hit.
    /// Only store failures propagate.
    ///
    /// # Errors
    ///
    /// Returns `CoreError` if the fall-through store lookup fails.
    pub async fn get(&self, id: SubscriptionId) -> hookline_core::Result<Option<Subscription>> {
        let key = Self::key(id);

        match self.backend.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<Subscription>(&raw) {
                Ok(subscription) => {
                    self.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some(subscription));
                },
                Err(e) => {
                    // Corrupt entry: treat as a miss and repair from the store.
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(subscription_id = %id, error = %e, "corrupt cache entry, falling through");
                },
            },
            Ok(None) => {
                debug!(subscription_id = %id, "cache miss");
            },
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(subscription_id = %id, error = %e, "cache read failed, falling through");
            },
        }

        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        let Some(subscription) = self.store.find(id).await? else {
            return Ok(None);
        };

        // Best-effort write-back; the caller gets the record either way.
        self.cache(&subscription).await;

        Ok(Some(subscription))
    }

    /// Removes the cached entry for `id`.
    ///
    /// Called by subscription CRUD on delete. Backend failures are
    /// swallowed; a stale entry would at worst cost one extra delivery
    /// attempt against a vanished subscription.
    pub async fn invalidate(&self, id: SubscriptionId) {
        if let Err(e) = self.backend.delete(&Self::key(id)).await {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            warn!(subscription_id = %id, error = %e, "cache invalidation failed");
        }
    }
}
