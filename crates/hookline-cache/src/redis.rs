//! Redis cache backend.

use std::time::Duration;

use ::redis::{aio::ConnectionManager, AsyncCommands};
use async_trait::async_trait;

use crate::{CacheBackend, CacheError};

/// Cache backend over a shared Redis connection manager.
#[derive(Clone)]
pub struct RedisCacheBackend {
    conn: ConnectionManager,
}

impl RedisCacheBackend {
    /// Creates a backend over an established connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Connects to Redis and builds a backend.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Unavailable` if the connection cannot be
    /// established.
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client =
            ::redis::Client::open(url).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(Self::new(conn))
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| CacheError::Unavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                let () = conn
                    .set_ex(key, value, ttl.as_secs().max(1))
                    .await
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            },
            None => {
                let () = conn
                    .set(key, value)
                    .await
                    .map_err(|e| CacheError::Unavailable(e.to_string()))?;
            },
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await.map_err(|e| CacheError::Unavailable(e.to_string()))?;
        Ok(())
    }
}
