//! Cache Module
//!
//! The cache port (get/set/delete/clear with per-entry expiration), the
//! atomic window counter used by the rate limiter, and their in-memory and
//! Redis backends.

mod entry;
mod lru;
mod memory;
mod port;
mod redis_store;
mod stats;


// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruTracker;
pub use memory::MemoryStore;
pub use port::{Cache, KeyValueStore, WindowCounter, WindowHit, WindowState};
pub use redis_store::RedisStore;
pub use stats::StoreStats;
