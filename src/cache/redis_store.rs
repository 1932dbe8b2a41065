//! Redis Store Module
//!
//! Network-backed implementation of the cache port and window counter.
//! Expiry is delegated to Redis; the window step runs as one Lua script so
//! concurrent gateway instances share a linearizable counter.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::cache::port::{KeyValueStore, WindowCounter, WindowHit, WindowState};
use crate::error::{Error, Result};

const WINDOW_HIT_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  redis.call('SET', KEYS[1], 1, 'PX', ARGV[2])
  return {1, 1, tonumber(ARGV[2])}
end
local count = tonumber(current)
local ttl = redis.call('PTTL', KEYS[1])
if count == nil then
  redis.call('SET', KEYS[1], 1, 'PX', ARGV[2])
  return {1, 1, tonumber(ARGV[2])}
end
if count >= tonumber(ARGV[1]) then
  return {0, count, ttl}
end
count = redis.call('INCR', KEYS[1])
return {1, count, ttl}
"#;

const SCAN_BATCH: usize = 500;

fn unavailable(err: redis::RedisError) -> Error {
    Error::CacheUnavailable(err.to_string())
}

/// Converts a PTTL reply (negative = no expiry / missing) into a duration.
fn pttl_to_duration(pttl: i64) -> Option<Duration> {
    (pttl >= 0).then(|| Duration::from_millis(pttl as u64))
}

// == Redis Store ==
/// Key-value store on Redis. Every key is written under `namespace`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStore {
    /// Connects to Redis at `url`.
    ///
    /// # Errors
    /// Returns `Error::CacheUnavailable` if the connection fails.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        let namespace = namespace.into();
        info!(namespace = %namespace, "Connected to Redis key-value store");
        Ok(Self::from_connection(conn, namespace))
    }

    /// Builds a store on an existing connection manager.
    pub fn from_connection(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    /// Shared connection, for other Redis-backed components.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(self.key(key))
            .query_async::<_, Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl.filter(|ttl| !ttl.is_zero()) {
            cmd.arg("PX").arg(ttl.as_millis() as u64);
        }
        cmd.query_async::<_, ()>(&mut conn).await.map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(key))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn clear(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.namespace);
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if !keys.is_empty() {
                removed += keys.len();
                redis::cmd("DEL")
                    .arg(&keys)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(unavailable)?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(namespace = %self.namespace, removed, "Cleared Redis namespace");
        Ok(())
    }
}

#[async_trait]
impl WindowCounter for RedisStore {
    async fn hit(&self, key: &str, limit: u64, window: Duration) -> Result<WindowHit> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis().max(1) as u64;

        let (admitted, count, pttl): (i64, i64, i64) = redis::Script::new(WINDOW_HIT_SCRIPT)
            .key(self.key(key))
            .arg(limit)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(WindowHit {
            admitted: admitted == 1,
            count: count.max(0) as u64,
            resets_in: pttl_to_duration(pttl),
        })
    }

    async fn peek(&self, key: &str) -> Result<Option<WindowState>> {
        let mut conn = self.conn.clone();
        let key = self.key(key);

        let (count, pttl): (Option<u64>, i64) = redis::pipe()
            .cmd("GET")
            .arg(&key)
            .cmd("PTTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(count.map(|count| WindowState {
            count,
            resets_in: pttl_to_duration(pttl),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pttl_conversion() {
        assert_eq!(pttl_to_duration(1_500), Some(Duration::from_millis(1_500)));
        assert_eq!(pttl_to_duration(-1), None);
        assert_eq!(pttl_to_duration(-2), None);
    }

    #[test]
    fn test_unavailable_maps_to_cache_error() {
        let err = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        assert!(matches!(unavailable(err), Error::CacheUnavailable(_)));
    }
}
