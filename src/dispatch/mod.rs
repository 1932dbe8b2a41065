//! Task Dispatch Module
//!
//! Durable work queue with bounded retry and dead-lettering:
//!
//! - `Broker`: publish / reserve with lease / ack, in memory or on Redis
//! - `Dispatcher`: enqueue, handler registry and per-delivery processing
//! - `DeadLetterSink`: where exhausted items end up
//! - built-in handlers for the standard work kinds

mod broker;
mod dead_letter;
mod dispatcher;
mod handlers;
mod item;
mod redis_broker;

pub use broker::{Broker, Delivery, MemoryBroker};
pub use dead_letter::{DeadLetterSink, MemoryDeadLetterSink};
pub use dispatcher::{Disposition, Dispatcher, HandlerRegistry, Processed, TaskHandler};
pub use handlers::{
    register_builtin_handlers, sanitize_input, IndexDocument, ProcessMessage, PublishMessage,
    INDEX_DOCUMENT, PROCESS_MESSAGE, PUBLISH_MESSAGE,
};
pub use item::{
    DeadLetter, RetryPolicy, TaskContext, TaskOutcome, WorkItem, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_RETRY_DELAY,
};
pub use redis_broker::{RedisBroker, RedisDeadLetterSink};
