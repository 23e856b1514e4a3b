//! Per-key retry state store
//!
//! Entries live in a sharded [`DashMap`], each behind its own mutex. A call
//! clones the entry's `Arc` out of the map before locking it, so a map shard
//! lock is never held while an entry is locked.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{StateError, StateResult};
use crate::time::{Clock, SystemClock};

/// Retry progress of a single operation key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts recorded so far
    pub attempt_count: u32,
    /// When the most recent attempt finished
    pub last_attempt_time: Option<Instant>,
    /// When the next attempt is due, if one is scheduled
    pub next_attempt_time: Option<Instant>,
    /// Rendered message of the most recent failure
    pub last_error: Option<String>,
    /// Backoff scheduled after the most recent attempt
    pub backoff_duration: Duration,
    /// Attempt budget copied from the policy
    pub max_attempts: u32,
    pub created_at: Instant,
}

impl RetryState {
    fn new(max_attempts: u32, now: Instant) -> Self {
        Self {
            attempt_count: 0,
            last_attempt_time: None,
            next_attempt_time: None,
            last_error: None,
            backoff_duration: Duration::ZERO,
            max_attempts,
            created_at: now,
        }
    }

    /// Attempts still allowed by the policy
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

/// Concurrent map of operation key to [`RetryState`]
///
/// Owned by one executor. The store creates entries on first use and deletes
/// them when the executor reports a terminal outcome.
pub struct RetryStateStore {
    entries: DashMap<String, Arc<Mutex<RetryState>>>,
    active: AtomicUsize,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RetryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStateStore")
            .field("entries", &self.entries.len())
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl Default for RetryStateStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RetryStateStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), active: AtomicUsize::new(0), clock }
    }

    /// Get or create the entry for `key`
    ///
    /// Returns `true` when a new entry was created.
    pub fn init(&self, key: &str, max_attempts: u32) -> bool {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                let state = RetryState::new(max_attempts, self.clock.now());
                vacant.insert(Arc::new(Mutex::new(state)));
                self.active.fetch_add(1, Ordering::AcqRel);
                true
            }
        }
    }

    /// Record a finished attempt for `key`
    ///
    /// Increments the attempt count and stamps the attempt time, failure
    /// message and the backoff scheduled before the next attempt.
    pub fn record(
        &self,
        key: &str,
        error: Option<String>,
        backoff: Duration,
    ) -> StateResult<RetryState> {
        let entry = self.entry(key)?;
        let now = self.clock.now();

        let mut state = entry.lock();
        state.attempt_count = state.attempt_count.saturating_add(1);
        state.last_attempt_time = Some(now);
        state.last_error = error;
        state.backoff_duration = backoff;
        state.next_attempt_time = now.checked_add(backoff);
        Ok(state.clone())
    }

    /// Snapshot of the entry for `key`
    pub fn get(&self, key: &str) -> StateResult<RetryState> {
        let entry = self.entry(key)?;
        let state = entry.lock().clone();
        Ok(state)
    }

    /// Remove the entry for `key`, returning its final snapshot
    pub fn clear(&self, key: &str) -> Option<RetryState> {
        let (_, entry) = self.entries.remove(key)?;
        self.active.fetch_sub(1, Ordering::AcqRel);
        let state = entry.lock().clone();
        Some(state)
    }

    /// Number of operations currently being retried
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys with a live entry, in no particular order
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn entry(&self, key: &str) -> StateResult<Arc<Mutex<RetryState>>> {
        self.entries
            .get(key)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| StateError::NotFound { key: key.to_string() })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the retry state store.
    use std::thread;

    use super::*;
    use crate::time::MockClock;

    fn store_with_clock() -> (RetryStateStore, MockClock) {
        let clock = MockClock::new();
        (RetryStateStore::new(Arc::new(clock.clone())), clock)
    }

    /// Validates `init` creates an entry once.
    ///
    /// Assertions:
    /// - Confirms the first `init` returns `true` and the second `false`
    /// - Confirms the active counter counts entries, not calls
    #[test]
    fn test_init_is_get_or_create() {
        let (store, _) = store_with_clock();
        assert!(store.init("op", 3));
        assert!(!store.init("op", 5));
        assert_eq!(store.active_count(), 1);

        let state = store.get("op").expect("entry exists");
        assert_eq!(state.attempt_count, 0);
        assert_eq!(state.max_attempts, 3);
        assert_eq!(state.remaining_attempts(), 3);
    }

    /// Validates `record` stamps every field of the entry.
    #[test]
    fn test_record_updates_entry() {
        let (store, clock) = store_with_clock();
        store.init("op", 3);
        clock.advance(Duration::from_millis(40));

        let state = store
            .record("op", Some("connection reset".to_string()), Duration::from_millis(100))
            .expect("recorded");
        let now = clock.now();
        assert_eq!(state.attempt_count, 1);
        assert_eq!(state.last_attempt_time, Some(now));
        assert_eq!(state.next_attempt_time, Some(now + Duration::from_millis(100)));
        assert_eq!(state.last_error.as_deref(), Some("connection reset"));
        assert_eq!(state.backoff_duration, Duration::from_millis(100));

        let state = store.record("op", None, Duration::ZERO).expect("recorded");
        assert_eq!(state.attempt_count, 2);
        assert_eq!(state.last_error, None);
        assert_eq!(store.get("op").expect("entry exists"), state);
    }

    /// Validates operations on unknown keys.
    #[test]
    fn test_unknown_key() {
        let store = RetryStateStore::default();
        assert_eq!(
            store.record("missing", None, Duration::ZERO),
            Err(StateError::NotFound { key: "missing".to_string() })
        );
        assert!(store.get("missing").is_err());
        assert!(store.clear("missing").is_none());
        assert_eq!(store.active_count(), 0);
    }

    /// Validates `clear` returns the final snapshot and releases the slot.
    #[test]
    fn test_clear_returns_final_state() {
        let store = RetryStateStore::default();
        store.init("a", 2);
        store.init("b", 2);
        store.record("a", Some("boom".to_string()), Duration::ZERO).expect("recorded");

        let final_state = store.clear("a").expect("entry existed");
        assert_eq!(final_state.attempt_count, 1);
        assert_eq!(store.active_count(), 1);
        assert_eq!(store.keys(), vec!["b".to_string()]);
        assert!(store.get("a").is_err());

        store.clear("b");
        assert!(store.is_empty());
        assert_eq!(store.active_count(), 0);
    }

    /// Validates concurrent recording on distinct keys loses no updates.
    #[test]
    fn test_concurrent_distinct_keys() {
        let store = Arc::new(RetryStateStore::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let key = format!("key-{i}");
                    store.init(&key, 100);
                    for _ in 0..50 {
                        store.record(&key, None, Duration::ZERO).expect("recorded");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread finished");
        }

        assert_eq!(store.len(), 8);
        assert_eq!(store.active_count(), 8);
        for i in 0..8 {
            assert_eq!(store.get(&format!("key-{i}")).expect("entry").attempt_count, 50);
        }
    }
}
