//! In-memory cache backend.
//!
//! Honors TTLs lazily: expired entries are dropped on read. Used by tests
//! and single-process development setups.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use async_trait::async_trait;

use crate::{CacheBackend, CacheError};

#[derive(Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// Process-local cache backend.
#[derive(Default)]
pub struct InMemoryCacheBackend {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryCacheBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if a live entry exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock().expect("cache lock poisoned");
        entries
            .get(key)
            .is_some_and(|entry| !entry.expires_at.is_some_and(|expiry| expiry <= Instant::now()))
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(entry) => {
                if entry.expires_at.is_some_and(|expiry| expiry <= Instant::now()) {
                    entries.remove(key);
                    Ok(None)
                } else {
                    Ok(Some(entry.value.clone()))
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.insert(
            key.to_string(),
            Entry { value: value.to_string(), expires_at: ttl.map(|ttl| Instant::now() + ttl) },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.remove(key);
        Ok(())
    }
}
