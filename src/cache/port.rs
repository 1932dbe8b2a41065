//! Cache Port
//!
//! The narrow interfaces the gateway uses to reach its key-value backend,
//! plus the [`Cache`] facade handlers use for typed values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::Result;

// == Key-Value Store ==
/// Uniform get/set/delete/clear over a key-value backend.
///
/// Any backend failure is reported as `Error::CacheUnavailable`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the live value for `key`; expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Stores `value`, replacing any previous value and TTL.
    /// `None` or a zero TTL never expires.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Removes every key owned by this store.
    async fn clear(&self) -> Result<()>;
}

// == Window Counter ==
/// Result of one atomic fixed-window step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Whether the request was counted
    pub admitted: bool,
    /// Counter value after the step
    pub count: u64,
    /// Time until the window closes
    pub resets_in: Option<Duration>,
}

/// Current state of a window, read without counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u64,
    pub resets_in: Option<Duration>,
}

/// Atomic increment-with-expiry primitive used by the rate limiter.
#[async_trait]
pub trait WindowCounter: Send + Sync {
    /// Atomically performs one fixed-window step on `key`:
    /// - absent: create with count 1 expiring after `window`, admitted
    /// - `count >= limit`: rejected, count unchanged
    /// - otherwise: increment, admitted
    async fn hit(&self, key: &str, limit: u64, window: Duration) -> Result<WindowHit>;

    /// Reads the window for `key` without counting.
    async fn peek(&self, key: &str) -> Result<Option<WindowState>>;
}

// == Cache Facade ==
/// Cache handle used by the pipeline and handlers.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    default_ttl: Option<Duration>,
}

impl Cache {
    /// Wraps a store; `default_ttl` applies to [`Cache::set_default`].
    pub fn new(store: Arc<dyn KeyValueStore>, default_ttl: Option<Duration>) -> Self {
        Self { store, default_ttl }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.store.set(key, value, ttl).await
    }

    /// Stores `value` with the configured default TTL.
    pub async fn set_default(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.set(key, value, self.default_ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    /// Reads and decodes a JSON value.
    ///
    /// A value that no longer decodes is treated as absent and removed.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                self.store.delete(key).await?;
                Ok(None)
            }
        }
    }

    /// Encodes `value` as JSON and stores it.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, bytes, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::clock::ManualClock;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        visits: u32,
    }

    fn cache() -> Cache {
        let store = MemoryStore::new(100, Arc::new(ManualClock::new(0)));
        Cache::new(Arc::new(store), Some(Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_json_helpers() {
        let cache = cache();
        let profile = Profile {
            name: "alice".into(),
            visits: 3,
        };

        cache.set_json("profile:alice", &profile, None).await.unwrap();
        let loaded: Option<Profile> = cache.get_json("profile:alice").await.unwrap();
        assert_eq!(loaded, Some(profile));
    }

    #[tokio::test]
    async fn test_undecodable_json_reads_as_absent() {
        let cache = cache();
        cache.set("broken", b"not json".to_vec(), None).await.unwrap();

        let loaded: Option<Profile> = cache.get_json("broken").await.unwrap();
        assert!(loaded.is_none());
        assert!(cache.get("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = cache();
        cache.set_default("a", b"1".to_vec()).await.unwrap();
        cache.set_default("b", b"2".to_vec()).await.unwrap();

        cache.delete("a").await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());

        cache.clear().await.unwrap();
        assert!(cache.get("b").await.unwrap().is_none());
    }
}
