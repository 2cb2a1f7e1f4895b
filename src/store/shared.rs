//! Redis-backed counter store.
//!
//! Implements a fixed-window counter: `INCR` and `TTL` are pipelined in one
//! round trip, and a key observed without an expiry (it was just created)
//! gets `EXPIRE key window` immediately. All requests landing in the same
//! window share one counter that resets in a single step, which can admit up
//! to 2x the limit across a window boundary. That trade-off is deliberate
//! and scales without per-event state; do not replace it with a sliding
//! window here.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::Client;
use tokio::sync::RwLock;
use tracing::debug;

use super::{CounterStore, Incremented};
use crate::error::StoreError;

pub struct SharedCounterStore {
    client: Client,
    /// Cached multiplexed connection; dropped on any error so the next call
    /// redials instead of reusing a dead socket.
    connection: RwLock<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl SharedCounterStore {
    /// Create a store for the given Redis URL. This validates the URL but
    /// does not dial; the first operation establishes the connection.
    pub fn new(redis_url: &str, timeout: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            connection: RwLock::new(None),
            timeout,
        })
    }

    /// Liveness probe for health reporting. Never used on the decision path.
    pub async fn ping(&self) -> bool {
        let result = self
            .with_timeout(async {
                let mut conn = self.connect().await?;
                redis::cmd("PING")
                    .query_async::<_, String>(&mut conn)
                    .await
                    .map_err(StoreError::from)
            })
            .await;
        result.is_ok()
    }

    async fn connect(&self) -> Result<MultiplexedConnection, StoreError> {
        if let Some(conn) = self.connection.read().await.clone() {
            return Ok(conn);
        }
        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.clone() {
            return Ok(conn);
        }
        let conn = self.client.get_multiplexed_async_connection().await?;
        debug!("established shared store connection");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn drop_connection(&self) {
        *self.connection.write().await = None;
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.drop_connection().await;
                Err(err)
            }
            Err(_) => {
                self.drop_connection().await;
                Err(StoreError::unavailable(format!(
                    "operation timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }

    async fn increment_inner(
        &self,
        key: &str,
        window: Duration,
    ) -> Result<Incremented, StoreError> {
        let mut conn = self.connect().await?;

        let (count, ttl_secs): (i64, i64) = redis::pipe()
            .cmd("INCR")
            .arg(key)
            .cmd("TTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        // TTL of -1 (no expiry) or -2 (raced with expiry) means this counter
        // was just created; anchor its window now.
        let ttl_remaining = if ttl_secs < 0 {
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(window.as_secs())
                .query_async::<_, ()>(&mut conn)
                .await?;
            window
        } else {
            Duration::from_secs(ttl_secs as u64)
        };

        Ok(Incremented {
            count: count.max(0) as u64,
            ttl_remaining,
        })
    }
}

#[async_trait]
impl CounterStore for SharedCounterStore {
    async fn increment(
        &self,
        key: &str,
        _limit: u64,
        window: Duration,
    ) -> Result<Incremented, StoreError> {
        self.with_timeout(self.increment_inner(key, window)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.with_timeout(async {
            let mut conn = self.connect().await?;
            let deleted: i64 = redis::cmd("DEL")
                .arg(key)
                .query_async(&mut conn)
                .await
                .map_err(StoreError::from)?;
            Ok(deleted > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_url_is_rejected() {
        let result = SharedCounterStore::new("not-a-url", Duration::from_secs(2));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_store_reports_unavailable() {
        // Reserved TEST-NET address, nothing listens there.
        let store =
            SharedCounterStore::new("redis://192.0.2.1:1/", Duration::from_millis(100)).unwrap();
        let err = store
            .increment("k", 10, Duration::from_secs(60))
            .await
            .unwrap_err();
        let StoreError::Unavailable(message) = err;
        assert!(!message.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_ping() {
        let store =
            SharedCounterStore::new("redis://192.0.2.1:1/", Duration::from_millis(100)).unwrap();
        assert!(!store.ping().await);
    }
}
