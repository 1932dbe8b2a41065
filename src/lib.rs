//! API Gateway - request pipeline and durable task dispatch
//!
//! Authenticates, rate limits, caches and meters inbound HTTP requests, and
//! hands deferred work to a broker-backed dispatcher with bounded retry and
//! dead-lettering. Every backend sits behind a trait with an in-memory and a
//! networked implementation.

pub mod api;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod ratelimit;
pub mod search;
pub mod tasks;

pub use api::{create_router, AppState, Backends};
pub use config::Config;
pub use error::{Error, Result};
pub use tasks::{spawn_cleanup_task, spawn_dispatch_workers};
