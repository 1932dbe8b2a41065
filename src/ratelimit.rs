//! Rate Limiter
//!
//! Fixed-window request counting per client identity. A window opens on the
//! first request from an identity and lasts `window`; it is not aligned to
//! calendar boundaries. Because the counter resets entirely when a window
//! closes, a client can get up to twice the limit through in a short burst
//! straddling the boundary. That is the documented behaviour of this limiter.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::cache::WindowCounter;
use crate::clock::{millis_to_datetime, SharedClock};
use crate::error::{Error, Result};

const KEY_PREFIX: &str = "rate_limit:";

// == Rate Limit Status ==
/// Outcome of counting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    /// Whether the request must be rejected
    pub limited: bool,
    /// Requests admitted per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window closes
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitStatus {
    /// Whole seconds until the window closes, at least 1 when limited.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let secs = self
            .reset_at
            .map(|reset| (reset - now).num_milliseconds().max(0) as u64)
            .map(|ms| ms.div_ceil(1000))
            .unwrap_or(0);
        if self.limited {
            secs.max(1)
        } else {
            secs
        }
    }

    /// Converts a limited status into the `RateLimited` error.
    pub fn to_error(&self, now: DateTime<Utc>) -> Error {
        Error::RateLimited {
            limit: self.limit,
            reset_at: self.reset_at,
            retry_after_secs: self.retry_after_secs(now),
        }
    }
}

// == Rate Limiter ==
/// Fixed-window limiter backed by an atomic window counter.
#[derive(Clone)]
pub struct RateLimiter {
    counter: Arc<dyn WindowCounter>,
    limit: u64,
    window: Duration,
    clock: SharedClock,
}

impl RateLimiter {
    /// Creates a limiter admitting `limit` requests per `window`.
    pub fn new(
        counter: Arc<dyn WindowCounter>,
        limit: u64,
        window: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            counter,
            limit,
            window,
            clock,
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn key(identity: &str) -> String {
        format!("{}{}", KEY_PREFIX, identity)
    }

    fn reset_at(&self, resets_in: Option<Duration>) -> Option<DateTime<Utc>> {
        resets_in.map(|d| millis_to_datetime(self.clock.now_ms() + d.as_millis() as u64))
    }

    // == Check ==
    /// Counts one request for `identity` and reports the resulting window.
    ///
    /// The first request of a window opens it with a count of 1. Later
    /// requests are rejected without counting once the count has reached
    /// the limit.
    pub async fn check(&self, identity: &str) -> Result<RateLimitStatus> {
        let hit = self
            .counter
            .hit(&Self::key(identity), self.limit, self.window)
            .await?;

        let status = RateLimitStatus {
            limited: !hit.admitted,
            limit: self.limit,
            remaining: self.limit.saturating_sub(hit.count),
            reset_at: self.reset_at(hit.resets_in),
        };

        if status.limited {
            debug!(identity = %identity, count = hit.count, "Rate limit reached");
        }
        Ok(status)
    }

    /// Counts one request and returns whether it must be rejected.
    pub async fn is_limited(&self, identity: &str) -> Result<bool> {
        Ok(self.check(identity).await?.limited)
    }

    /// Requests left in the identity's current window.
    pub async fn remaining(&self, identity: &str) -> Result<u64> {
        let state = self.counter.peek(&Self::key(identity)).await?;
        Ok(match state {
            Some(state) => self.limit.saturating_sub(state.count),
            None => self.limit,
        })
    }

    /// When the identity's current window closes, if one is open.
    pub async fn reset_time(&self, identity: &str) -> Result<Option<DateTime<Utc>>> {
        let state = self.counter.peek(&Self::key(identity)).await?;
        Ok(state.and_then(|state| self.reset_at(state.resets_in)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, MemoryStore};
    use crate::clock::{Clock, ManualClock, SystemClock};

    const T0: u64 = 1_700_000_000_000;

    fn limiter(limit: u64, window_secs: u64) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::new(1_000, clock.clone()));
        (
            RateLimiter::new(store, limit, Duration::from_secs(window_secs), clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_remaining_decreases_to_limit_minus_n() {
        let (limiter, _) = limiter(10, 60);
        let mut previous = limiter.remaining("10.0.0.1").await.unwrap();
        assert_eq!(previous, 10);

        for _ in 0..7 {
            assert!(!limiter.is_limited("10.0.0.1").await.unwrap());
            let remaining = limiter.remaining("10.0.0.1").await.unwrap();
            assert!(remaining < previous);
            previous = remaining;
        }
        assert_eq!(previous, 3);
    }

    #[tokio::test]
    async fn test_request_past_limit_is_rejected() {
        let (limiter, _) = limiter(3, 60);
        for _ in 0..3 {
            assert!(!limiter.check("client").await.unwrap().limited);
        }

        let status = limiter.check("client").await.unwrap();
        assert!(status.limited);
        assert_eq!(status.remaining, 0);
        assert_eq!(limiter.remaining("client").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_identities_are_independent() {
        let (limiter, _) = limiter(1, 60);
        assert!(!limiter.is_limited("a").await.unwrap());
        assert!(limiter.is_limited("a").await.unwrap());
        assert!(!limiter.is_limited("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_window_anchored_to_first_request() {
        let (limiter, clock) = limiter(2, 60);
        clock.advance(Duration::from_secs(17));
        limiter.check("c").await.unwrap();

        let reset = limiter.reset_time("c").await.unwrap().unwrap();
        assert_eq!(reset.timestamp_millis() as u64, T0 + 17_000 + 60_000);

        clock.advance(Duration::from_secs(60));
        assert!(limiter.reset_time("c").await.unwrap().is_none());
        assert_eq!(limiter.remaining("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_boundary_burst_allows_twice_the_limit() {
        let (limiter, clock) = limiter(5, 10);
        let mut admitted = 0;

        // Fill the window just before it closes, then again just after.
        for _ in 0..5 {
            if !limiter.is_limited("burst").await.unwrap() {
                admitted += 1;
            }
        }
        clock.advance(Duration::from_millis(9_999));
        assert!(limiter.is_limited("burst").await.unwrap());
        clock.advance(Duration::from_millis(1));
        for _ in 0..5 {
            if !limiter.is_limited("burst").await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn test_retry_after_hint() {
        let (limiter, clock) = limiter(1, 30);
        limiter.check("c").await.unwrap();
        clock.advance(Duration::from_millis(20_500));

        let status = limiter.check("c").await.unwrap();
        assert!(status.limited);
        assert_eq!(status.retry_after_secs(clock.now()), 10);
        assert!(matches!(
            status.to_error(clock.now()),
            Error::RateLimited { retry_after_secs: 10, limit: 1, .. }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_for_last_slot_admit_one() {
        let clock: SharedClock = Arc::new(SystemClock);
        let store = Arc::new(MemoryStore::new(1_000, clock.clone()));
        let limiter = RateLimiter::new(store, 10, Duration::from_secs(60), clock);

        for _ in 0..9 {
            assert!(!limiter.is_limited("shared").await.unwrap());
        }

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = limiter.clone();
                tokio::spawn(async move { limiter.is_limited("shared").await.unwrap() })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if !handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
        assert_eq!(limiter.remaining("shared").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cached_responses_cannot_reset_a_window() {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(MemoryStore::new(3, clock.clone()));
        let limiter = RateLimiter::new(store.clone(), 1, Duration::from_secs(60), clock);
        let cache = Cache::new(store, None);

        assert!(!limiter.is_limited("bob").await.unwrap());
        assert!(limiter.is_limited("bob").await.unwrap());

        for i in 0..3 {
            let key = format!("response:GET:/x?{}:bob", i);
            cache.set(&key, b"{}".to_vec(), None).await.unwrap();
        }

        assert!(limiter.is_limited("bob").await.unwrap());
        assert_eq!(limiter.remaining("bob").await.unwrap(), 0);
    }
}
