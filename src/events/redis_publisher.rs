//! Redis pub/sub publisher.
//!
//! Each event goes out as JSON on the channel `{ns}events:{event_type}`.
//! Redis keeps nothing for absent subscribers.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::{Event, EventPublisher};

const CHANNEL_PREFIX: &str = "events:";

#[derive(Clone)]
pub struct RedisEventPublisher {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisEventPublisher {
    pub fn new(conn: ConnectionManager, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    /// Channel carrying events of `event_type`.
    pub fn channel(&self, event_type: &str) -> String {
        channel_name(&self.namespace, event_type)
    }
}

fn channel_name(namespace: &str, event_type: &str) -> String {
    format!("{}{}{}", namespace, CHANNEL_PREFIX, event_type)
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(&self, event: &Event) -> Result<()> {
        let message = serde_json::to_string(event)
            .map_err(|e| Error::Internal(format!("Event encoding failed: {}", e)))?;
        let channel = self.channel(&event.event_type);

        let mut conn = self.conn.clone();
        let receivers: u64 = redis::cmd("PUBLISH")
            .arg(&channel)
            .arg(message)
            .query_async(&mut conn)
            .await
            .map_err(|e| Error::BrokerUnavailable(e.to_string()))?;

        debug!(channel = %channel, receivers, "Published event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_is_namespaced_by_type() {
        assert_eq!(
            channel_name("gateway:", "task.dead_lettered"),
            "gateway:events:task.dead_lettered"
        );
        assert_eq!(channel_name("", "user.created"), "events:user.created");
    }
}
