//! Dispatcher Workers
//!
//! Long-running consumer loops, one set per registered task kind. Each loop
//! drains its queue and sleeps for the poll interval when it finds nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{Dispatcher, Disposition};

/// Spawns `workers_per_kind` consumer loops for every registered kind.
///
/// Loops exit once `shutdown` flips to `true` (or its sender is dropped).
/// An in-flight item is always finished before the loop checks the signal.
pub fn spawn_dispatch_workers(
    dispatcher: Arc<Dispatcher>,
    workers_per_kind: usize,
    poll_interval: Duration,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let kinds = dispatcher.registry().kinds();
    info!(
        kinds = ?kinds,
        workers_per_kind,
        "Starting dispatcher workers"
    );

    kinds
        .into_iter()
        .flat_map(|kind| (0..workers_per_kind.max(1)).map(move |worker| (kind.clone(), worker)))
        .map(|(kind, worker)| {
            tokio::spawn(worker_loop(
                dispatcher.clone(),
                kind,
                worker,
                poll_interval,
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn worker_loop(
    dispatcher: Arc<Dispatcher>,
    kind: String,
    worker: usize,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(kind = %kind, worker, "Dispatcher worker started");

    while !*shutdown.borrow() {
        let idle = match dispatcher.process_next(&kind).await {
            Ok(Some(processed)) => {
                if let Disposition::Retried { attempt, delay } = processed.disposition {
                    debug!(
                        id = %processed.id,
                        kind = %kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Work item scheduled for retry"
                    );
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Dispatcher poll failed");
                true
            }
        };

        if idle {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    debug!(kind = %kind, worker, "Dispatcher worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::clock::{SharedClock, SystemClock};
    use crate::dispatch::{
        MemoryBroker, MemoryDeadLetterSink, RetryPolicy, TaskContext, TaskHandler, TaskOutcome,
    };

    struct Counting(Arc<AtomicU32>);

    #[async_trait]
    impl TaskHandler for Counting {
        async fn handle(&self, _payload: &Value, _ctx: &TaskContext) -> TaskOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Success
        }
    }

    fn dispatcher(counter: Arc<AtomicU32>) -> Arc<Dispatcher> {
        let clock: SharedClock = Arc::new(SystemClock);
        let mut dispatcher = Dispatcher::new(
            Arc::new(MemoryBroker::new(clock.clone())),
            Arc::new(MemoryDeadLetterSink::new()),
            RetryPolicy::default(),
            Duration::from_secs(30),
            clock,
        );
        dispatcher.consume("count", Arc::new(Counting(counter)));
        Arc::new(dispatcher)
    }

    #[tokio::test]
    async fn test_workers_drain_queue() {
        let counter = Arc::new(AtomicU32::new(0));
        let dispatcher = dispatcher(counter.clone());
        for n in 0..5 {
            dispatcher.enqueue("count", json!({ "n": n })).await.unwrap();
        }

        let (tx, rx) = watch::channel(false);
        let handles =
            spawn_dispatch_workers(dispatcher, 2, Duration::from_millis(10), rx);
        assert_eq!(handles.len(), 2);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);

        tx.send(true).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_workers_stop_when_sender_dropped() {
        let dispatcher = dispatcher(Arc::new(AtomicU32::new(0)));
        let (tx, rx) = watch::channel(false);
        let handles = spawn_dispatch_workers(dispatcher, 1, Duration::from_secs(60), rx);

        drop(tx);
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
