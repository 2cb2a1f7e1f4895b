//! Counter store backends.
//!
//! A counter store tracks how many events a key has seen inside the current
//! window. The shared backend (Redis) gives cross-process consistency; the
//! local backend is process-private but always available. The facade in
//! `limiter` owns one of each and falls back from shared to local per call.

pub mod local;
pub mod shared;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use local::LocalCounterStore;
pub use shared::SharedCounterStore;

/// Result of a successful increment.
#[derive(Debug, Clone, Copy)]
pub struct Incremented {
    /// Counter value after this event was counted
    pub count: u64,
    /// Time until the counter resets (window expiry)
    pub ttl_remaining: Duration,
}

/// A named counter with window expiry.
///
/// `increment` must be atomic under concurrent callers: across processes for
/// the shared backend, across threads for the local one. A failed increment
/// is an `Err`, never an allow/deny decision — the caller must fall back.
///
/// `limit` is part of the signature because the local backend refuses to
/// record events past the limit (denied requests do not count against future
/// windows); the shared backend is a plain counter and ignores it.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> Result<Incremented, StoreError>;

    /// Remove a counter immediately. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}
