//! Event Module
//!
//! Domain events announced to collaborators outside the gateway process:
//!
//! - `Event`: typed, timestamped JSON envelope
//! - `EventPublisher`: the publishing port
//! - `MemoryEventPublisher`: in-process fan-out for single-node deployments
//! - `RedisEventPublisher`: Redis pub/sub on `{ns}events:{event_type}`

mod event;
mod publisher;
mod redis_publisher;

pub use event::{Event, TASK_DEAD_LETTERED};
pub use publisher::{EventPublisher, MemoryEventPublisher};
pub use redis_publisher::RedisEventPublisher;
