//! TTL Cleanup Task
//!
//! Background task that periodically purges expired entries from the
//! in-memory store. Expired entries are already invisible to readers; the
//! purge only reclaims their memory. After each pass the store counters are
//! copied into the metrics registry.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::MemoryStore;
use crate::metrics::MetricsCollector;

/// Spawns a background task that periodically purges expired entries.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let store = Arc::new(MemoryStore::new(1000, Arc::new(SystemClock)));
/// let cleanup_handle = spawn_cleanup_task(store.clone(), metrics, Duration::from_secs(1));
/// // Later, during shutdown:
/// cleanup_handle.abort();
/// ```
pub fn spawn_cleanup_task(
    store: Arc<MemoryStore>,
    metrics: MetricsCollector,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting TTL cleanup task"
        );

        loop {
            tokio::time::sleep(interval).await;

            let removed = store.purge_expired().await;
            if removed > 0 {
                info!(removed, "TTL cleanup: removed expired entries");
            } else {
                debug!("TTL cleanup: no expired entries found");
            }
            metrics.record_store_stats(&store.stats().await);
        }
    })
}
