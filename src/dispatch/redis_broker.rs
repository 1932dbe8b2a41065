//! Redis-backed broker and dead-letter sink.
//!
//! # Queue Structure
//!
//! Each queue `{ns}{queue}` uses four keys:
//!
//! - `{queue}:payloads`: hash of lease tag to payload
//! - `{queue}:ready`: list of tags ready for delivery
//! - `{queue}:delayed`: sorted set of tags scored by visibility time
//! - `{queue}:leases`: sorted set of leased tags scored by lease expiry
//! - `{queue}:deliveries`: hash of tag to reservation count
//!
//! Promotion of due and expired tags and the lease itself happen in one Lua
//! script, so two consumers never hold the same tag at once.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::dispatch::broker::{Broker, Delivery};
use crate::dispatch::dead_letter::DeadLetterSink;
use crate::dispatch::item::DeadLetter;
use crate::error::{Error, Result};

const RESERVE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', now)
for _, tag in ipairs(due) do
  redis.call('ZREM', KEYS[2], tag)
  redis.call('RPUSH', KEYS[1], tag)
end
local expired = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', now)
for _, tag in ipairs(expired) do
  redis.call('ZREM', KEYS[3], tag)
  redis.call('RPUSH', KEYS[1], tag)
end
while true do
  local tag = redis.call('LPOP', KEYS[1])
  if not tag then
    return nil
  end
  local payload = redis.call('HGET', KEYS[4], tag)
  if payload then
    redis.call('ZADD', KEYS[3], now + tonumber(ARGV[2]), tag)
    local deliveries = redis.call('HINCRBY', KEYS[5], tag, 1)
    return {tag, payload, deliveries}
  end
end
"#;

fn unavailable(err: redis::RedisError) -> Error {
    Error::BrokerUnavailable(err.to_string())
}

struct QueueKeys {
    ready: String,
    delayed: String,
    leases: String,
    payloads: String,
    deliveries: String,
}

// == Redis Broker ==
/// Broker on Redis sharing the gateway's connection.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    namespace: String,
    clock: SharedClock,
}

impl RedisBroker {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
            clock,
        }
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        let base = format!("{}{}", self.namespace, queue);
        QueueKeys {
            ready: format!("{}:ready", base),
            delayed: format!("{}:delayed", base),
            leases: format!("{}:leases", base),
            payloads: format!("{}:payloads", base),
            deliveries: format!("{}:deliveries", base),
        }
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, queue: &str, payload: String, delay: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let keys = self.keys(queue);
        let tag = Uuid::new_v4().to_string();

        let mut pipe = redis::pipe();
        pipe.atomic().hset(&keys.payloads, &tag, payload);
        if delay.is_zero() {
            pipe.rpush(&keys.ready, &tag);
        } else {
            let visible_at = self.clock.now_ms() + delay.as_millis() as u64;
            pipe.zadd(&keys.delayed, &tag, visible_at);
        }
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn reserve(&self, queue: &str, lease: Duration) -> Result<Option<Delivery>> {
        let mut conn = self.conn.clone();
        let keys = self.keys(queue);

        let reply: Option<(String, String, u32)> = redis::Script::new(RESERVE_SCRIPT)
            .key(&keys.ready)
            .key(&keys.delayed)
            .key(&keys.leases)
            .key(&keys.payloads)
            .key(&keys.deliveries)
            .arg(self.clock.now_ms())
            .arg(lease.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(reply.map(|(tag, payload, deliveries)| Delivery {
            tag,
            payload,
            deliveries,
        }))
    }

    async fn ack(&self, queue: &str, tag: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let keys = self.keys(queue);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrem(&keys.leases, tag)
            .hdel(&keys.payloads, tag)
            .hdel(&keys.deliveries, tag);
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)?;
        debug!(queue = %queue, tag = %tag, "Acknowledged delivery");
        Ok(())
    }
}

// == Redis Dead-Letter Sink ==
/// Dead letters stored newest-first in one Redis list.
#[derive(Clone)]
pub struct RedisDeadLetterSink {
    conn: ConnectionManager,
    key: String,
}

impl RedisDeadLetterSink {
    pub fn new(conn: ConnectionManager, namespace: &str) -> Self {
        Self {
            conn,
            key: format!("{}dead_letters", namespace),
        }
    }
}

#[async_trait]
impl DeadLetterSink for RedisDeadLetterSink {
    async fn record(&self, letter: &DeadLetter) -> Result<()> {
        let serialized = serde_json::to_string(letter)
            .map_err(|e| Error::Internal(format!("Dead letter encoding failed: {}", e)))?;
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(&self.key)
            .arg(serialized)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn list(&self, kind: Option<&str>, limit: usize) -> Result<Vec<DeadLetter>> {
        let mut conn = self.conn.clone();
        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(&self.key)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(entries
            .iter()
            .filter_map(|raw| serde_json::from_str::<DeadLetter>(raw).ok())
            .filter(|letter| kind.map_or(true, |kind| letter.item.kind == kind))
            .take(limit)
            .collect())
    }
}
