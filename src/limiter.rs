//! Rate limiter facade.
//!
//! Wires the shared and local counter stores together behind a single
//! never-failing decision API. Each call independently attempts the shared
//! store first and degrades to the local store on any store error — there is
//! no circuit breaker, so a recovered backend is picked up on the very next
//! call.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::error::StoreError;
use crate::keys;
use crate::store::{CounterStore, Incremented, LocalCounterStore, SharedCounterStore};

/// The outcome of one admission check.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub current_count: u64,
    pub limit: u64,
    /// `limit - current_count`, floored at zero
    pub remaining: u64,
    /// Unix timestamp (seconds) when the counter resets
    pub reset_at: u64,
    /// Seconds the caller should wait before retrying; 0 when allowed
    pub retry_after_secs: u64,
    /// Which backend produced the decision: "shared" or "local"
    pub backend: &'static str,
}

/// Introspection snapshot for health checks. Read-only: gathering it never
/// touches a counter.
#[derive(Debug, Clone, Serialize)]
pub struct LimiterStats {
    pub shared_configured: bool,
    pub shared_available: bool,
    /// Backend the next check will most likely use
    pub backend: &'static str,
    pub local_key_count: usize,
}

/// Process-wide admission controller.
///
/// Construct one per process and share it via `Arc`; it is not a global.
/// Both stores are owned here — callers never hold a store directly.
pub struct RateLimiter {
    shared: Option<SharedCounterStore>,
    local: LocalCounterStore,
    config: Config,
}

impl RateLimiter {
    /// Build a limiter from configuration. A malformed store URL is a
    /// configuration error: it is logged once and the limiter runs
    /// local-only, it never fails construction.
    pub fn new(config: Config) -> Self {
        let timeout = Duration::from_millis(config.store_timeout_ms.max(1));
        let shared = config.redis_url.as_deref().and_then(|url| {
            match SharedCounterStore::new(url, timeout) {
                Ok(store) => Some(store),
                Err(e) => {
                    error!(error = %e, "invalid shared store URL; running local-only");
                    None
                }
            }
        });

        Self {
            shared,
            local: LocalCounterStore::new(),
            config,
        }
    }

    /// A limiter with no shared backend, for tests and embedded use.
    pub fn local_only() -> Self {
        Self::new(Config::local_only())
    }

    /// Check and consume one request against `key`.
    ///
    /// Never fails: if the shared store is unreachable the call degrades to
    /// the process-local store. A zero `limit` or `window_secs` is treated
    /// as a configuration mistake and clamped to 1.
    pub async fn check_limit(&self, key: &str, limit: u64, window_secs: u64) -> RateLimitDecision {
        let (limit, window_secs) = clamp_policy(key, limit, window_secs);
        let window = Duration::from_secs(window_secs);

        // The fallback is an explicit branch on the store result, not a
        // side effect of error handling.
        if let Some(shared) = &self.shared {
            match shared.increment(key, limit, window).await {
                Ok(incremented) => return decide(incremented, limit, "shared"),
                Err(StoreError::Unavailable(reason)) => {
                    warn!(key = key, reason = %reason, "shared store unavailable, using local fallback");
                }
            }
        }

        decide(self.local.record(key, limit, window), limit, "local")
    }

    /// Check a client IP against the configured per-IP policy.
    pub async fn check_ip(&self, ip: &str) -> RateLimitDecision {
        let policy = self.config.ip_policy;
        self.check_limit(&keys::by_ip(ip), policy.limit, policy.window_secs)
            .await
    }

    /// Check a tenant against the configured per-tenant policy.
    pub async fn check_tenant(&self, tenant_id: &str) -> RateLimitDecision {
        let policy = self.config.tenant_policy;
        self.check_limit(&keys::by_tenant(tenant_id), policy.limit, policy.window_secs)
            .await
    }

    /// Check an IP + endpoint pair against the configured endpoint policy.
    pub async fn check_endpoint(&self, ip: &str, path: &str) -> RateLimitDecision {
        let policy = self.config.endpoint_policy;
        self.check_limit(&keys::by_endpoint(ip, path), policy.limit, policy.window_secs)
            .await
    }

    /// Administrative reset: remove `key` from whichever backend holds it.
    /// Returns whether any backend held the key. Shared-store errors degrade
    /// to a local-only result.
    pub async fn clear_key(&self, key: &str) -> bool {
        let mut existed = false;
        if let Some(shared) = &self.shared {
            match shared.delete(key).await {
                Ok(found) => existed |= found,
                Err(StoreError::Unavailable(reason)) => {
                    warn!(key = key, reason = %reason, "shared store unavailable during clear");
                }
            }
        }
        existed | self.local.remove(key)
    }

    /// Health snapshot. Pings the shared store but never counts anything.
    pub async fn stats(&self) -> LimiterStats {
        let shared_configured = self.shared.is_some();
        let shared_available = match &self.shared {
            Some(shared) => shared.ping().await,
            None => false,
        };
        LimiterStats {
            shared_configured,
            shared_available,
            backend: if shared_available { "shared" } else { "local" },
            local_key_count: self.local.key_count(),
        }
    }

    /// Sweep aged keys out of the local store; returns how many were
    /// dropped. Driven by an optional background task in the binary.
    pub fn sweep_local(&self) -> usize {
        self.local.sweep()
    }
}

fn clamp_policy(key: &str, limit: u64, window_secs: u64) -> (u64, u64) {
    if limit == 0 || window_secs == 0 {
        debug!(
            key = key,
            limit = limit,
            window_secs = window_secs,
            "zero limit or window clamped to 1"
        );
    }
    (limit.max(1), window_secs.max(1))
}

fn decide(incremented: Incremented, limit: u64, backend: &'static str) -> RateLimitDecision {
    let Incremented {
        count,
        ttl_remaining,
    } = incremented;
    let allowed = count <= limit;
    RateLimitDecision {
        allowed,
        current_count: count,
        limit,
        remaining: limit.saturating_sub(count),
        reset_at: now_secs() + ttl_remaining.as_secs(),
        retry_after_secs: if allowed {
            0
        } else {
            ttl_remaining.as_secs().max(1)
        },
        backend,
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_check_allows_with_full_remaining() {
        let limiter = RateLimiter::local_only();
        let decision = limiter.check_limit("k", 10, 60).await;
        assert!(decision.allowed);
        assert_eq!(decision.current_count, 1);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.retry_after_secs, 0);
        assert_eq!(decision.backend, "local");
    }

    #[tokio::test]
    async fn test_limit_exhaustion_denies_with_retry_after() {
        let limiter = RateLimiter::local_only();
        for i in 1..=10 {
            let decision = limiter.check_limit("k", 10, 60).await;
            assert!(decision.allowed, "call {} should be allowed", i);
        }
        let denied = limiter.check_limit("k", 10, 60).await;
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_secs > 0);
        assert!(denied.reset_at > now_secs());
    }

    #[tokio::test]
    async fn test_keys_do_not_interfere() {
        let limiter = RateLimiter::local_only();
        for _ in 0..5 {
            limiter.check_limit("tenant:abc", 5, 60).await;
        }
        let exhausted = limiter.check_limit("tenant:abc", 5, 60).await;
        assert!(!exhausted.allowed);

        let fresh = limiter.check_limit("ip:1.2.3.4", 5, 60).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.current_count, 1);
    }

    #[tokio::test]
    async fn test_clear_key_resets_counter() {
        let limiter = RateLimiter::local_only();
        limiter.check_limit("k", 5, 60).await;
        limiter.check_limit("k", 5, 60).await;
        assert!(limiter.clear_key("k").await);
        let decision = limiter.check_limit("k", 5, 60).await;
        assert_eq!(decision.current_count, 1);
    }

    #[tokio::test]
    async fn test_clear_unknown_key_returns_false() {
        let limiter = RateLimiter::local_only();
        assert!(!limiter.clear_key("nope").await);
    }

    #[tokio::test]
    async fn test_zero_limit_clamps_to_one() {
        let limiter = RateLimiter::local_only();
        let first = limiter.check_limit("k", 0, 0).await;
        assert!(first.allowed);
        assert_eq!(first.limit, 1);
        let second = limiter.check_limit("k", 0, 0).await;
        assert!(!second.allowed);
    }

    #[tokio::test]
    async fn test_unreachable_shared_store_falls_back_to_local() {
        let mut config = Config::local_only();
        config.redis_url = Some("redis://192.0.2.1:1/".to_string());
        config.store_timeout_ms = 100;
        let limiter = RateLimiter::new(config);

        let decision = limiter.check_limit("k", 3, 60).await;
        assert!(decision.allowed);
        assert_eq!(decision.backend, "local");

        // The fallback still enforces the limit within this process.
        limiter.check_limit("k", 3, 60).await;
        limiter.check_limit("k", 3, 60).await;
        let denied = limiter.check_limit("k", 3, 60).await;
        assert!(!denied.allowed);
    }

    #[tokio::test]
    async fn test_convenience_checks_use_scoped_keys() {
        let limiter = RateLimiter::local_only();
        let ip = limiter.check_ip("1.2.3.4").await;
        assert_eq!(ip.limit, crate::config::DEFAULT_IP_LIMIT);
        let tenant = limiter.check_tenant("acme").await;
        assert_eq!(tenant.limit, crate::config::DEFAULT_TENANT_LIMIT);
        let endpoint = limiter.check_endpoint("1.2.3.4", "/api/users/7").await;
        assert_eq!(endpoint.limit, crate::config::DEFAULT_ENDPOINT_LIMIT);
    }

    #[tokio::test]
    async fn test_stats_reports_local_mode() {
        let limiter = RateLimiter::local_only();
        limiter.check_limit("a", 5, 60).await;
        limiter.check_limit("b", 5, 60).await;
        let stats = limiter.stats().await;
        assert!(!stats.shared_configured);
        assert!(!stats.shared_available);
        assert_eq!(stats.backend, "local");
        assert_eq!(stats.local_key_count, 2);
    }
}
