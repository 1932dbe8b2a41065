//! Work item definitions for the dispatcher.
//!
//! - `WorkItem`: a unit of work travelling through the broker
//! - `TaskOutcome`: what a handler reports for one attempt
//! - `DeadLetter`: the record kept for an item that will never run again
//! - `RetryPolicy`: attempt budget and backoff

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Default handler invocations before an item is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default base delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(60);

// == Work Item ==
/// A named unit of work with its JSON payload and retry bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: Uuid,
    pub kind: String,
    pub payload: Value,
    /// Handler invocations made so far.
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkItem {
    pub fn new(
        kind: impl Into<String>,
        payload: Value,
        max_attempts: u32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            attempt: 0,
            max_attempts: max_attempts.max(1),
            enqueued_at,
            last_error: None,
        }
    }

    /// Whether another attempt fits in the budget.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

// == Task Outcome ==
/// Result of one handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// Try again later, subject to the attempt budget
    RetryableFailure(String),
    /// Never retry; dead-letter immediately
    PermanentFailure(String),
}

impl TaskOutcome {
    pub fn retry(reason: impl Into<String>) -> Self {
        TaskOutcome::RetryableFailure(reason.into())
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        TaskOutcome::PermanentFailure(reason.into())
    }

    /// Label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Success => "success",
            TaskOutcome::RetryableFailure(_) => "retryable_failure",
            TaskOutcome::PermanentFailure(_) => "permanent_failure",
        }
    }
}

/// Attempt information passed to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub id: Uuid,
    pub kind: String,
    /// 1-based number of this invocation.
    pub attempt: u32,
    pub max_attempts: u32,
}

// == Dead Letter ==
/// A work item that exhausted its attempts or failed permanently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub item: WorkItem,
    pub error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

// == Retry Policy ==
/// Attempt budget with exponential backoff capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_RETRY_DELAY,
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, never above `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_starts_at_zero_attempts() {
        let item = WorkItem::new("process_message", serde_json::json!({}), 3, Utc::now());
        assert_eq!(item.attempt, 0);
        assert!(item.can_retry());
        assert!(item.last_error.is_none());
    }

    #[test]
    fn test_max_attempts_at_least_one() {
        let item = WorkItem::new("k", Value::Null, 0, Utc::now());
        assert_eq!(item.max_attempts, 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
        };
        assert_eq!(policy.delay_for(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(2), Duration::from_secs(120));
        assert_eq!(policy.delay_for(3), Duration::from_secs(240));
        assert_eq!(policy.delay_for(5), Duration::from_secs(600));
        assert_eq!(policy.delay_for(40), Duration::from_secs(600));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(TaskOutcome::Success.label(), "success");
        assert_eq!(TaskOutcome::retry("x").label(), "retryable_failure");
        assert_eq!(TaskOutcome::fail("x").label(), "permanent_failure");
    }
}
