//! Background Tasks Module
//!
//! Contains background tasks that run for the lifetime of the server.
//!
//! # Tasks
//! - TTL Cleanup: Purges expired in-memory entries at configured intervals
//! - Dispatcher Workers: Consume queued work items per registered kind

mod cleanup;
mod workers;

pub use cleanup::spawn_cleanup_task;
pub use workers::spawn_dispatch_workers;
