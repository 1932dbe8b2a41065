//! Publisher port and in-process publisher.

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::Result;
use crate::events::Event;

const CHANNEL_CAPACITY: usize = 256;
const HISTORY_LIMIT: usize = 1_000;

/// Announces events to whoever listens.
///
/// Delivery is fire-and-forget: publishing succeeds whether or not anyone
/// is subscribed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &Event) -> Result<()>;
}

// == Memory Publisher ==
/// Broadcasts events to in-process subscribers and keeps the most recent
/// ones for inspection.
pub struct MemoryEventPublisher {
    sender: broadcast::Sender<Event>,
    history: RwLock<Vec<Event>>,
}

impl MemoryEventPublisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            sender,
            history: RwLock::new(Vec::new()),
        }
    }

    /// Receives every event published after subscribing.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Retained events of `event_type`, oldest first.
    pub async fn published(&self, event_type: &str) -> Vec<Event> {
        self.history
            .read()
            .await
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl Default for MemoryEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for MemoryEventPublisher {
    async fn publish(&self, event: &Event) -> Result<()> {
        {
            let mut history = self.history.write().await;
            if history.len() >= HISTORY_LIMIT {
                history.remove(0);
            }
            history.push(event.clone());
        }
        // No subscribers is not an error.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = MemoryEventPublisher::new();
        let mut rx = publisher.subscribe();

        let event = Event::new("user.created", json!({"name": "alice"}), Utc::now());
        publisher.publish(&event).await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), event);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_retained() {
        let publisher = MemoryEventPublisher::new();
        publisher
            .publish(&Event::new("a", json!(1), Utc::now()))
            .await
            .unwrap();
        publisher
            .publish(&Event::new("b", json!(2), Utc::now()))
            .await
            .unwrap();

        let published = publisher.published("a").await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].data, json!(1));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let publisher = MemoryEventPublisher::new();
        for i in 0..HISTORY_LIMIT + 5 {
            publisher
                .publish(&Event::new("tick", json!(i), Utc::now()))
                .await
                .unwrap();
        }

        let published = publisher.published("tick").await;
        assert_eq!(published.len(), HISTORY_LIMIT);
        assert_eq!(published[0].data, json!(5));
    }
}
