//! Cache-aside behavior tests: transparency against the durable store,
//! fall-through on corruption and outage, and invalidation.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use hookline_cache::{CacheBackend, CacheError, InMemoryCacheBackend, SubscriptionCache};
use hookline_core::{
    store::memory::MemoryStore, Subscription, SubscriptionId, SubscriptionStore,
};

/// Store wrapper counting primary-key lookups, to assert when the cache
/// short-circuits the database.
struct CountingStore {
    inner: MemoryStore,
    finds: AtomicU64,
}

impl CountingStore {
    fn new() -> Self {
        Self { inner: MemoryStore::new(), finds: AtomicU64::new(0) }
    }

    fn finds(&self) -> u64 {
        self.finds.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SubscriptionStore for CountingStore {
    async fn create(&self, subscription: &Subscription) -> hookline_core::Result<()> {
        self.inner.create(subscription).await
    }

    async fn find(&self, id: SubscriptionId) -> hookline_core::Result<Option<Subscription>> {
        self.finds.fetch_add(1, Ordering::Relaxed);
        self.inner.find(id).await
    }

    async fn list(&self, limit: i64, offset: i64) -> hookline_core::Result<Vec<Subscription>> {
        self.inner.list(limit, offset).await
    }

    async fn update(&self, subscription: &Subscription) -> hookline_core::Result<()> {
        self.inner.update(subscription).await
    }

    async fn delete(&self, id: SubscriptionId) -> hookline_core::Result<()> {
        self.inner.delete(id).await
    }

    async fn health_check(&self) -> hookline_core::Result<()> {
        self.inner.health_check().await
    }
}

/// Backend that fails every operation, simulating a cache outage.
struct FailingBackend;

#[async_trait]
impl CacheBackend for FailingBackend {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<std::time::Duration>) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

fn subscription() -> Subscription {
    Subscription {
        id: SubscriptionId::new(),
        target_url: "https://example.com/hook".to_string(),
        secret: Some("s3cret".to_string()),
        events: Some(vec!["order.created".to_string()]),
    }
}

#[tokio::test]
async fn cold_get_reads_store_and_warms_cache() {
    let store = Arc::new(CountingStore::new());
    let backend = Arc::new(InMemoryCacheBackend::new());
    let cache = SubscriptionCache::new(backend.clone(), store.clone());

    let sub = subscription();
    store.create(&sub).await.unwrap();

    // Cold read falls through to the store and matches it exactly.
    let fetched = cache.get(sub.id).await.unwrap().unwrap();
    assert_eq!(fetched, sub);
    assert_eq!(store.finds(), 1);
    assert!(backend.contains(&format!("subscription:{}", sub.id)));

    // Warm read is served without touching the store.
    let again = cache.get(sub.id).await.unwrap().unwrap();
    assert_eq!(again, sub);
    assert_eq!(store.finds(), 1);
    assert_eq!(cache.stats().hits(), 1);
    assert_eq!(cache.stats().misses(), 1);
}

#[tokio::test]
async fn missing_subscription_returns_none() {
    let store = Arc::new(CountingStore::new());
    let cache = SubscriptionCache::new(Arc::new(InMemoryCacheBackend::new()), store);

    assert!(cache.get(SubscriptionId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_entry_falls_through_and_repairs() {
    let store = Arc::new(CountingStore::new());
    let backend = Arc::new(InMemoryCacheBackend::new());
    let cache = SubscriptionCache::new(backend.clone(), store.clone());

    let sub = subscription();
    store.create(&sub).await.unwrap();

    let key = format!("subscription:{}", sub.id);
    backend.set(&key, "{not json", None).await.unwrap();

    let fetched = cache.get(sub.id).await.unwrap().unwrap();
    assert_eq!(fetched, sub);
    assert_eq!(cache.stats().errors(), 1);

    // Entry was repaired: the next read is a clean hit.
    let again = cache.get(sub.id).await.unwrap().unwrap();
    assert_eq!(again, sub);
    assert_eq!(cache.stats().hits(), 1);
}

#[tokio::test]
async fn cache_outage_never_fails_the_lookup() {
    let store = Arc::new(CountingStore::new());
    let cache = SubscriptionCache::new(Arc::new(FailingBackend), store.clone());

    let sub = subscription();
    store.create(&sub).await.unwrap();

    let fetched = cache.get(sub.id).await.unwrap().unwrap();
    assert_eq!(fetched, sub);
    // Read failed and the write-back failed; both were swallowed.
    assert!(cache.stats().errors() >= 2);
}

#[tokio::test]
async fn write_through_and_invalidate() {
    let store = Arc::new(CountingStore::new());
    let backend = Arc::new(InMemoryCacheBackend::new());
    let cache = SubscriptionCache::new(backend.clone(), store.clone());

    let sub = subscription();
    store.create(&sub).await.unwrap();
    cache.cache(&sub).await;

    let key = format!("subscription:{}", sub.id);
    assert!(backend.contains(&key));

    // Warm entry short-circuits the store entirely.
    let fetched = cache.get(sub.id).await.unwrap().unwrap();
    assert_eq!(fetched, sub);
    assert_eq!(store.finds(), 0);

    cache.invalidate(sub.id).await;
    assert!(!backend.contains(&key));
}

#[tokio::test]
async fn ttl_expiry_falls_back_to_store() {
    let store = Arc::new(CountingStore::new());
    let backend = Arc::new(InMemoryCacheBackend::new());
    let cache = SubscriptionCache::new(backend, store.clone())
        .with_ttl(std::time::Duration::from_millis(5));

    let sub = subscription();
    store.create(&sub).await.unwrap();
    cache.cache(&sub).await;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let fetched = cache.get(sub.id).await.unwrap().unwrap();
    assert_eq!(fetched, sub);
    assert_eq!(store.finds(), 1);
}
