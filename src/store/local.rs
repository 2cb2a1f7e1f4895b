//! In-process sliding-window counter store.
//!
//! Keeps an ordered log of event timestamps per key and counts only entries
//! inside `[now - window, now]`, so counting is exact. Unlike the shared
//! backend's fixed window, the reset time for a denial is derived from the
//! oldest retained event plus the window, not from a bucket boundary. The
//! asymmetry between the two backends is observable and intentional.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use super::{CounterStore, Incremented};
use crate::error::StoreError;

/// Event log for one key.
struct EventLog {
    /// Millisecond timestamps of counted events, oldest first
    timestamps: VecDeque<u64>,
    /// Window the key was last checked with, for sweeping
    window_ms: u64,
}

/// Thread-safe in-memory store. One coarse mutex per process; contention is
/// bounded by single-process request volume.
#[derive(Default)]
pub struct LocalCounterStore {
    logs: Mutex<HashMap<String, EventLog>>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently holding at least one event.
    pub fn key_count(&self) -> usize {
        self.lock().len()
    }

    /// Drop keys whose newest event has aged out of its window. Expiry is
    /// otherwise lazy (driven by access), so this only bounds memory under
    /// low-traffic keys; it is not needed for correctness.
    pub fn sweep(&self) -> usize {
        self.sweep_at(now_millis())
    }

    fn sweep_at(&self, now_ms: u64) -> usize {
        let mut logs = self.lock();
        let before = logs.len();
        logs.retain(|_, log| {
            log.timestamps
                .back()
                .is_some_and(|&newest| newest + log.window_ms > now_ms)
        });
        before - logs.len()
    }

    /// Record one event now. Infallible: the local store has no I/O and is
    /// the backend of last resort.
    pub fn record(&self, key: &str, limit: u64, window: Duration) -> Incremented {
        self.increment_at(key, limit, window, now_millis())
    }

    /// Remove a key's event log. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Prune, count, and conditionally append as one critical section.
    fn increment_at(&self, key: &str, limit: u64, window: Duration, now_ms: u64) -> Incremented {
        let window_ms = window.as_millis() as u64;
        let mut logs = self.lock();
        let log = logs.entry(key.to_string()).or_insert_with(|| EventLog {
            timestamps: VecDeque::new(),
            window_ms,
        });
        log.window_ms = window_ms;

        let cutoff = now_ms.saturating_sub(window_ms);
        while log.timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            log.timestamps.pop_front();
        }

        let count = log.timestamps.len() as u64 + 1;
        if count <= limit {
            // Admitted: the request is spent against this window.
            log.timestamps.push_back(now_ms);
        }

        // Reset when the oldest retained event leaves the window.
        let ttl_remaining = match log.timestamps.front() {
            Some(&oldest) => Duration::from_millis((oldest + window_ms).saturating_sub(now_ms)),
            None => window,
        };

        Incremented {
            count,
            ttl_remaining,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, EventLog>> {
        // A panic while holding the lock leaves the map structurally intact;
        // recover rather than wedging the admission path.
        self.logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CounterStore for LocalCounterStore {
    async fn increment(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Incremented, StoreError> {
        Ok(self.increment_at(key, limit, window, now_millis()))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.remove(key))
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
