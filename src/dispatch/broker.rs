//! Broker port and in-memory broker.
//!
//! A broker holds named queues of opaque string payloads. `reserve` leases
//! the next ready payload to one consumer; `ack` removes it for good. A
//! payload whose lease runs out becomes ready again, so delivery is
//! at-least-once. Every reservation of a payload bumps its delivery count,
//! which lets consumers bound redeliveries of work that never acks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::error::{Error, Result};

/// A leased payload. `tag` identifies the lease for `ack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: String,
    pub payload: String,
    /// Times this payload has been reserved since it was published,
    /// counting this one.
    pub deliveries: u32,
}

/// Durable queue operations.
///
/// Backend failures are reported as `Error::BrokerUnavailable`.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Appends `payload` to `queue`, visible after `delay`.
    async fn publish(&self, queue: &str, payload: String, delay: Duration) -> Result<()>;

    /// Leases the next visible payload for `lease`.
    async fn reserve(&self, queue: &str, lease: Duration) -> Result<Option<Delivery>>;

    /// Removes a leased payload. Unknown tags are ignored.
    async fn ack(&self, queue: &str, tag: &str) -> Result<()>;
}

// == Memory Broker ==
#[derive(Debug, Clone)]
struct Message {
    payload: String,
    deliveries: u32,
}

impl Message {
    fn new(payload: String) -> Self {
        Self {
            payload,
            deliveries: 0,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    // (visible_at_ms, sequence) keeps equal due times in publish order
    delayed: BTreeMap<(u64, u64), Message>,
    leased: HashMap<String, (u64, Message)>,
    sequence: u64,
}

impl QueueState {
    fn promote(&mut self, now_ms: u64) {
        while let Some(entry) = self.delayed.first_entry() {
            if entry.key().0 > now_ms {
                break;
            }
            let message = entry.remove();
            self.ready.push_back(message);
        }

        let mut expired: Vec<(u64, String)> = self
            .leased
            .iter()
            .filter(|(_, (until, _))| *until <= now_ms)
            .map(|(tag, (until, _))| (*until, tag.clone()))
            .collect();
        expired.sort();
        for (_, tag) in expired {
            if let Some((_, message)) = self.leased.remove(&tag) {
                self.ready.push_back(message);
            }
        }
    }

    fn pending(&self) -> usize {
        self.ready.len() + self.delayed.len() + self.leased.len()
    }
}

/// Process-local broker. Contents are lost when the process exits.
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, QueueState>>,
    clock: SharedClock,
}

impl MemoryBroker {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> Result<T> {
        let mut queues = self
            .queues
            .lock()
            .map_err(|_| Error::BrokerUnavailable("broker state poisoned".to_string()))?;
        Ok(f(queues.entry(queue.to_string()).or_default()))
    }

    /// Payloads held for `queue` in any state (ready, delayed, leased).
    pub fn pending(&self, queue: &str) -> usize {
        self.with_queue(queue, |state| state.pending()).unwrap_or(0)
    }

    /// Payloads `queue` would hand out right now.
    pub fn ready(&self, queue: &str) -> usize {
        let now = self.clock.now_ms();
        self.with_queue(queue, |state| {
            state.promote(now);
            state.ready.len()
        })
        .unwrap_or(0)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, payload: String, delay: Duration) -> Result<()> {
        let now = self.clock.now_ms();
        self.with_queue(queue, |state| {
            let message = Message::new(payload);
            if delay.is_zero() {
                state.ready.push_back(message);
            } else {
                state.sequence += 1;
                let due = now + delay.as_millis() as u64;
                state.delayed.insert((due, state.sequence), message);
            }
        })
    }

    async fn reserve(&self, queue: &str, lease: Duration) -> Result<Option<Delivery>> {
        let now = self.clock.now_ms();
        self.with_queue(queue, |state| {
            state.promote(now);
            let mut message = state.ready.pop_front()?;
            message.deliveries += 1;
            let tag = Uuid::new_v4().to_string();
            let delivery = Delivery {
                tag: tag.clone(),
                payload: message.payload.clone(),
                deliveries: message.deliveries,
            };
            state
                .leased
                .insert(tag, (now + lease.as_millis() as u64, message));
            Some(delivery)
        })
    }

    async fn ack(&self, queue: &str, tag: &str) -> Result<()> {
        self.with_queue(queue, |state| {
            state.leased.remove(tag);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    const LEASE: Duration = Duration::from_secs(30);

    fn broker() -> (MemoryBroker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (MemoryBroker::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (broker, _) = broker();
        broker.publish("q", "a".into(), Duration::ZERO).await.unwrap();
        broker.publish("q", "b".into(), Duration::ZERO).await.unwrap();

        assert_eq!(broker.reserve("q", LEASE).await.unwrap().unwrap().payload, "a");
        assert_eq!(broker.reserve("q", LEASE).await.unwrap().unwrap().payload, "b");
        assert!(broker.reserve("q", LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delayed_payload_becomes_visible() {
        let (broker, clock) = broker();
        broker
            .publish("q", "later".into(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(broker.reserve("q", LEASE).await.unwrap().is_none());
        clock.advance(Duration::from_secs(60));
        assert_eq!(
            broker.reserve("q", LEASE).await.unwrap().unwrap().payload,
            "later"
        );
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_until_expiry() {
        let (broker, clock) = broker();
        broker.publish("q", "job".into(), Duration::ZERO).await.unwrap();

        let first = broker.reserve("q", LEASE).await.unwrap().unwrap();
        assert!(broker.reserve("q", LEASE).await.unwrap().is_none());

        clock.advance(LEASE);
        let second = broker.reserve("q", LEASE).await.unwrap().unwrap();
        assert_eq!(second.payload, "job");
        assert_ne!(second.tag, first.tag);
    }

    #[tokio::test]
    async fn test_ack_removes_payload() {
        let (broker, clock) = broker();
        broker.publish("q", "job".into(), Duration::ZERO).await.unwrap();
        let delivery = broker.reserve("q", LEASE).await.unwrap().unwrap();
        broker.ack("q", &delivery.tag).await.unwrap();

        clock.advance(LEASE * 2);
        assert!(broker.reserve("q", LEASE).await.unwrap().is_none());
        assert_eq!(broker.pending("q"), 0);
        // Acking twice is harmless
        broker.ack("q", &delivery.tag).await.unwrap();
    }

    #[tokio::test]
    async fn test_queues_are_isolated() {
        let (broker, _) = broker();
        broker.publish("a", "x".into(), Duration::ZERO).await.unwrap();
        assert!(broker.reserve("b", LEASE).await.unwrap().is_none());
        assert_eq!(broker.ready("a"), 1);
    }

    #[tokio::test]
    async fn test_redelivery_counts_reservations() {
        let (broker, clock) = broker();
        broker.publish("q", "job".into(), Duration::ZERO).await.unwrap();

        for expected in 1..=3 {
            let delivery = broker.reserve("q", LEASE).await.unwrap().unwrap();
            assert_eq!(delivery.deliveries, expected);
            clock.advance(LEASE);
        }

        // A payload published afterwards starts its own count
        broker.publish("q2", "other".into(), Duration::ZERO).await.unwrap();
        let other = broker.reserve("q2", LEASE).await.unwrap().unwrap();
        assert_eq!(other.deliveries, 1);
    }
}
