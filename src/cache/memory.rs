//! In-Memory Store Module
//!
//! HashMap storage with LRU capacity eviction and lazy TTL expiration.
//! Implements both the cache port and the rate-limit window counter; every
//! read-modify-write happens under one write lock, which makes the window
//! step atomic across concurrent requests.
//!
//! Rate-limit windows live in their own table outside the LRU. Cached
//! responses can fill the store to capacity without ever evicting a
//! client's window; windows leave only by expiring.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::cache::port::{KeyValueStore, WindowCounter, WindowHit, WindowState};
use crate::cache::{CacheEntry, LruTracker, StoreStats};
use crate::clock::SharedClock;
use crate::error::Result;

// == Store State ==
#[derive(Debug)]
struct StoreState {
    entries: HashMap<String, CacheEntry>,
    windows: HashMap<String, CacheEntry>,
    lru: LruTracker,
    stats: StoreStats,
    max_entries: usize,
}

impl StoreState {
    /// Returns the entry for `key` if it is live at `now_ms`, removing it
    /// when it has expired.
    fn live_entry(&mut self, key: &str, now_ms: u64) -> Option<&mut CacheEntry> {
        let expired = self.entries.get(key)?.is_expired(now_ms);
        if expired {
            self.remove(key);
            self.stats.record_expirations(1);
            return None;
        }
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: &str, entry: CacheEntry) {
        if !self.entries.contains_key(key) && self.entries.len() >= self.max_entries {
            if let Some(evicted) = self.lru.evict_oldest() {
                self.entries.remove(&evicted);
                self.stats.record_eviction();
            }
        }
        self.entries.insert(key.to_string(), entry);
        self.lru.touch(key);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.lru.remove(key);
        self.entries.remove(key).is_some()
    }

    /// Count and time left of the window at `key`, dropping it once expired.
    fn live_window(&mut self, key: &str, now_ms: u64) -> Option<(u64, Option<Duration>)> {
        let entry = self.windows.get(key)?;
        if entry.is_expired(now_ms) {
            self.windows.remove(key);
            self.stats.record_expirations(1);
            return None;
        }
        let count = std::str::from_utf8(&entry.value).ok()?.parse::<u64>().ok()?;
        Some((count, entry.ttl_remaining(now_ms)))
    }
}

// == Memory Store ==
/// Capacity-bounded in-memory key-value store.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    clock: SharedClock,
}

impl MemoryStore {
    /// Creates a store holding at most `max_entries` entries.
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            state: RwLock::new(StoreState {
                entries: HashMap::new(),
                windows: HashMap::new(),
                lru: LruTracker::new(),
                stats: StoreStats::default(),
                max_entries: max_entries.max(1),
            }),
            clock,
        }
    }

    /// Removes all expired entries and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        let expired: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            state.remove(key);
        }
        let windows_before = state.windows.len();
        state.windows.retain(|_, entry| !entry.is_expired(now));
        let removed = expired.len() + (windows_before - state.windows.len());

        state.stats.record_expirations(removed);
        removed
    }

    /// Snapshot of the store counters.
    pub async fn stats(&self) -> StoreStats {
        let state = self.state.read().await;
        let mut stats = state.stats.clone();
        stats.total_entries = state.entries.len();
        stats.open_windows = state.windows.len();
        stats
    }

    /// Number of stored entries, including ones not yet purged.
    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }


    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        let value = state.live_entry(key, now).map(|entry| entry.value.clone());
        match value {
            Some(value) => {
                state.lru.touch(key);
                state.stats.record_hit();
                Ok(Some(value))
            }
            None => {
                state.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = CacheEntry::new(value, ttl, self.clock.now_ms());
        self.state.write().await.insert(key, entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.state.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.windows.clear();
        state.lru.clear();
        Ok(())
    }
}

#[async_trait]
impl WindowCounter for MemoryStore {
    async fn hit(&self, key: &str, limit: u64, window: Duration) -> Result<WindowHit> {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        // A value that is not a counter is replaced by a fresh window.
        let hit = match state.live_window(key, now) {
            None => {
                state.windows.insert(
                    key.to_string(),
                    CacheEntry::new(b"1".to_vec(), Some(window), now),
                );
                WindowHit {
                    admitted: true,
                    count: 1,
                    resets_in: Some(window),
                }
            }
            Some((count, resets_in)) if count >= limit => WindowHit {
                admitted: false,
                count,
                resets_in,
            },
            Some((count, resets_in)) => {
                let count = count + 1;
                if let Some(entry) = state.windows.get_mut(key) {
                    entry.value = count.to_string().into_bytes();
                }
                WindowHit {
                    admitted: true,
                    count,
                    resets_in,
                }
            }
        };
        Ok(hit)
    }

    async fn peek(&self, key: &str) -> Result<Option<WindowState>> {
        let now = self.clock.now_ms();
        let mut state = self.state.write().await;

        Ok(state
            .live_window(key, now)
            .map(|(count, resets_in)| WindowState { count, resets_in }))
    }
}
