//! Task Dispatcher
//!
//! Publishes work items to the broker and runs one delivery at a time
//! through the handler registered for its kind. Retryable failures are
//! re-published with backoff until the attempt budget is spent; the item
//! is then written to the dead-letter sink and announced as a
//! `task.dead_lettered` event.
//!
//! A reservation whose lease ran out counts as a spent attempt, so work
//! that keeps killing its worker still reaches the dead-letter sink.
//! Handlers are cut off before their lease expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::dispatch::broker::{Broker, Delivery};
use crate::dispatch::dead_letter::DeadLetterSink;
use crate::dispatch::item::{DeadLetter, RetryPolicy, TaskContext, TaskOutcome, WorkItem};
use crate::error::{Error, Result};
use crate::events::{Event, EventPublisher, TASK_DEAD_LETTERED};
use crate::metrics::MetricsCollector;

const QUEUE_PREFIX: &str = "tasks:";

/// Processes the payload of one work kind.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &Value, ctx: &TaskContext) -> TaskOutcome;
}

// == Handler Registry ==
/// Explicit kind-to-handler table, filled at startup.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(kind.into(), handler);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Retried { attempt: u32, delay: Duration },
    DeadLettered { error: String },
}

/// A processed delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    pub id: Uuid,
    pub attempt: u32,
    pub disposition: Disposition,
}

// == Dispatcher ==
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    sink: Arc<dyn DeadLetterSink>,
    registry: HandlerRegistry,
    policy: RetryPolicy,
    lease: Duration,
    handler_timeout: Duration,
    clock: SharedClock,
    events: Option<Arc<dyn EventPublisher>>,
    metrics: Option<MetricsCollector>,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        sink: Arc<dyn DeadLetterSink>,
        policy: RetryPolicy,
        lease: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            broker,
            sink,
            registry: HandlerRegistry::new(),
            policy,
            lease,
            handler_timeout: lease - lease / 10,
            clock,
            events: None,
            metrics: None,
        }
    }

    /// Announces dead letters on `events`.
    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Caps one handler invocation. Defaults to nine tenths of the lease;
    /// values at or above the lease are clamped below it.
    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout.min(self.lease - self.lease / 10);
        self
    }

    /// Records task outcomes and dead letters on `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registers the handler for `kind`.
    pub fn consume(&mut self, kind: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let kind = kind.into();
        info!(kind = %kind, "Registered task handler");
        self.registry.register(kind, handler);
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    /// Broker queue holding items of `kind`.
    pub fn queue_name(kind: &str) -> String {
        format!("{}{}", QUEUE_PREFIX, kind)
    }

    // == Producing ==
    /// Publishes a new work item and returns its id.
    ///
    /// # Errors
    /// - `Error::InvalidRequest` if no handler is registered for `kind`
    /// - `Error::BrokerUnavailable` if the broker refuses the item
    pub async fn enqueue(&self, kind: &str, payload: Value) -> Result<Uuid> {
        if !self.registry.contains(kind) {
            return Err(Error::InvalidRequest(format!(
                "No handler registered for task kind '{}'",
                kind
            )));
        }

        let item = WorkItem::new(kind, payload, self.policy.max_attempts, self.clock.now());
        let serialized = serde_json::to_string(&item)
            .map_err(|e| Error::Internal(format!("Work item encoding failed: {}", e)))?;

        self.broker
            .publish(&Self::queue_name(kind), serialized, Duration::ZERO)
            .await?;

        debug!(id = %item.id, kind = %kind, "Enqueued work item");
        Ok(item.id)
    }

    // == Consuming ==
    /// Leases the next item of `kind` and runs it through its handler.
    ///
    /// Returns `Ok(None)` when nothing is ready. On `Err` the lease is left
    /// in place and the item is redelivered once it expires.
    pub async fn process_next(&self, kind: &str) -> Result<Option<Processed>> {
        let handler = self.registry.get(kind).ok_or_else(|| {
            Error::InvalidRequest(format!("No handler registered for task kind '{}'", kind))
        })?;
        let queue = Self::queue_name(kind);

        let Some(delivery) = self.broker.reserve(&queue, self.lease).await? else {
            return Ok(None);
        };

        let mut item = match serde_json::from_str::<WorkItem>(&delivery.payload) {
            Ok(item) => item,
            Err(e) => {
                let item = self.undecodable_item(kind, &delivery);
                let processed = self
                    .dead_letter(&queue, &delivery, item, format!("Undecodable work item: {}", e))
                    .await?;
                return Ok(Some(processed));
            }
        };

        // Reservations that expired without an ack were attempts too.
        item.attempt += delivery.deliveries.max(1);
        if item.attempt > item.max_attempts {
            let abandoned = delivery.deliveries.saturating_sub(1);
            item.attempt -= 1;
            let error = format!(
                "Attempts exhausted: lease expired {} time(s) without acknowledgement",
                abandoned
            );
            item.last_error.get_or_insert_with(|| "lease expired".to_string());
            return self.dead_letter(&queue, &delivery, item, error).await.map(Some);
        }

        let ctx = TaskContext {
            id: item.id,
            kind: item.kind.clone(),
            attempt: item.attempt,
            max_attempts: item.max_attempts,
        };

        let outcome = run_handler(handler, item.payload.clone(), ctx, self.handler_timeout).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_task(kind, outcome.label());
        }

        match outcome {
            TaskOutcome::Success => {
                self.broker.ack(&queue, &delivery.tag).await?;
                debug!(id = %item.id, kind = %kind, attempt = item.attempt, "Work item completed");
                Ok(Some(Processed {
                    id: item.id,
                    attempt: item.attempt,
                    disposition: Disposition::Completed,
                }))
            }
            TaskOutcome::RetryableFailure(reason) if item.can_retry() => {
                let attempt = item.attempt;
                let delay = self.policy.delay_for(attempt);
                item.last_error = Some(reason.clone());

                let serialized = serde_json::to_string(&item)
                    .map_err(|e| Error::Internal(format!("Work item encoding failed: {}", e)))?;
                // Publish the retry before acking so a crash in between
                // duplicates the item instead of losing it.
                self.broker.publish(&queue, serialized, delay).await?;
                self.broker.ack(&queue, &delivery.tag).await?;

                warn!(
                    id = %item.id,
                    kind = %kind,
                    attempt,
                    max_attempts = item.max_attempts,
                    delay_secs = delay.as_secs(),
                    reason = %reason,
                    "Work item failed, retry scheduled"
                );
                Ok(Some(Processed {
                    id: item.id,
                    attempt,
                    disposition: Disposition::Retried { attempt, delay },
                }))
            }
            TaskOutcome::RetryableFailure(reason) => {
                let error = format!("Attempts exhausted: {}", reason);
                item.last_error = Some(reason);
                self.dead_letter(&queue, &delivery, item, error).await.map(Some)
            }
            TaskOutcome::PermanentFailure(reason) => {
                item.last_error = Some(reason.clone());
                self.dead_letter(&queue, &delivery, item, reason).await.map(Some)
            }
        }
    }

    fn undecodable_item(&self, kind: &str, delivery: &Delivery) -> WorkItem {
        WorkItem {
            id: Uuid::nil(),
            kind: kind.to_string(),
            payload: Value::String(delivery.payload.clone()),
            attempt: 0,
            max_attempts: self.policy.max_attempts,
            enqueued_at: self.clock.now(),
            last_error: None,
        }
    }

    async fn dead_letter(
        &self,
        queue: &str,
        delivery: &Delivery,
        item: WorkItem,
        error: String,
    ) -> Result<Processed> {
        let letter = DeadLetter {
            item,
            error,
            dead_lettered_at: self.clock.now(),
        };

        if let Err(e) = self.sink.record(&letter).await {
            error!(
                id = %letter.item.id,
                kind = %letter.item.kind,
                error = %e,
                "Dead-letter sink rejected item; lease left for redelivery"
            );
            return Err(e);
        }
        self.broker.ack(queue, &delivery.tag).await?;

        let failure = Error::TaskPermanentFailure {
            id: letter.item.id,
            kind: letter.item.kind.clone(),
            attempts: letter.item.attempt,
            reason: letter.error.clone(),
        };
        error!(error = %failure, "Work item dead-lettered");

        if let Some(metrics) = &self.metrics {
            metrics.record_dead_letter(&letter.item.kind);
        }

        self.announce(&letter).await;

        Ok(Processed {
            id: letter.item.id,
            attempt: letter.item.attempt,
            disposition: Disposition::DeadLettered {
                error: letter.error,
            },
        })
    }

    /// Publishes the dead letter. The letter is already durable, so a
    /// publisher failure is only logged.
    async fn announce(&self, letter: &DeadLetter) {
        let Some(events) = &self.events else {
            return;
        };
        let data = match serde_json::to_value(letter) {
            Ok(data) => data,
            Err(e) => {
                warn!(id = %letter.item.id, error = %e, "Dead letter event encoding failed");
                return;
            }
        };
        let event = Event::new(TASK_DEAD_LETTERED, data, letter.dead_lettered_at);
        if let Err(e) = events.publish(&event).await {
            warn!(id = %letter.item.id, error = %e, "Dead letter event not published");
        }
    }

    // == Dead Letters ==
    /// Reads back recorded dead letters, newest first.
    pub async fn dead_letters(&self, kind: Option<&str>, limit: usize) -> Result<Vec<DeadLetter>> {
        self.sink.list(kind, limit).await
    }
}

/// Runs the handler on its own task so a panic becomes a retryable failure.
/// A handler still running after `limit` is aborted and retried.
async fn run_handler(
    handler: Arc<dyn TaskHandler>,
    payload: Value,
    ctx: TaskContext,
    limit: Duration,
) -> TaskOutcome {
    let id = ctx.id;
    let mut task = tokio::spawn(async move { handler.handle(&payload, &ctx).await });
    match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!(id = %id, error = %e, "Task handler panicked");
            TaskOutcome::retry(format!("Handler panicked: {}", e))
        }
        Err(_) => {
            task.abort();
            warn!(id = %id, timeout_ms = limit.as_millis() as u64, "Task handler timed out");
            TaskOutcome::retry(format!("Handler timed out after {}ms", limit.as_millis()))
        }
    }
}
