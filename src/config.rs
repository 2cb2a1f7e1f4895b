use std::env;
use std::net::SocketAddr;

use crate::error::{GatekeeperError, Result};

/// Default per-scope policies. These are configuration defaults, not
/// invariants: every check accepts an explicit limit/window override.
pub const DEFAULT_IP_LIMIT: u64 = 100;
pub const DEFAULT_IP_WINDOW_SECS: u64 = 60;
pub const DEFAULT_TENANT_LIMIT: u64 = 500;
pub const DEFAULT_TENANT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_ENDPOINT_LIMIT: u64 = 20;
pub const DEFAULT_ENDPOINT_WINDOW_SECS: u64 = 60;

/// A limit/window pair for one key scope.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub limit: u64,
    pub window_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: SocketAddr,

    /// Shared store URL; `None` means local-only mode
    pub redis_url: Option<String>,

    /// Raw comma-separated trusted proxy CIDR list (empty = trust nothing)
    pub trusted_proxies: String,

    /// Per-call timeout for shared store operations, in milliseconds
    pub store_timeout_ms: u64,

    /// Local store sweep interval in seconds; 0 disables the sweep task
    pub sweep_interval_secs: u64,

    /// Deployment environment name, used only for startup warnings
    pub app_env: String,

    pub ip_policy: Policy,
    pub tenant_policy: Policy,
    pub endpoint_policy: Policy,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "127.0.0.1:3000")
            .parse::<SocketAddr>()
            .map_err(|e| GatekeeperError::Config(format!("invalid BIND_ADDR: {}", e)))?;

        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());

        let config = Config {
            bind_addr,
            redis_url,
            trusted_proxies: env_or("TRUSTED_PROXIES", ""),
            store_timeout_ms: parse_env("STORE_TIMEOUT_MS", 2000)?,
            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", 300)?,
            app_env: env_or("APP_ENV", "development"),
            ip_policy: Policy {
                limit: parse_env("IP_LIMIT", DEFAULT_IP_LIMIT)?,
                window_secs: parse_env("IP_WINDOW_SECS", DEFAULT_IP_WINDOW_SECS)?,
            },
            tenant_policy: Policy {
                limit: parse_env("TENANT_LIMIT", DEFAULT_TENANT_LIMIT)?,
                window_secs: parse_env("TENANT_WINDOW_SECS", DEFAULT_TENANT_WINDOW_SECS)?,
            },
            endpoint_policy: Policy {
                limit: parse_env("ENDPOINT_LIMIT", DEFAULT_ENDPOINT_LIMIT)?,
                window_secs: parse_env("ENDPOINT_WINDOW_SECS", DEFAULT_ENDPOINT_WINDOW_SECS)?,
            },
        };

        if config.redis_url.is_none() && config.app_env == "production" {
            tracing::warn!(
                "REDIS_URL is not set; running in local-only mode, rate limits \
                 will not be shared across worker processes"
            );
        }

        Ok(config)
    }

    /// A local-only configuration with all defaults, for tests.
    pub fn local_only() -> Self {
        Config {
            bind_addr: "127.0.0.1:0".parse().expect("static addr"),
            redis_url: None,
            trusted_proxies: String::new(),
            store_timeout_ms: 2000,
            sweep_interval_secs: 0,
            app_env: "test".to_string(),
            ip_policy: Policy {
                limit: DEFAULT_IP_LIMIT,
                window_secs: DEFAULT_IP_WINDOW_SECS,
            },
            tenant_policy: Policy {
                limit: DEFAULT_TENANT_LIMIT,
                window_secs: DEFAULT_TENANT_WINDOW_SECS,
            },
            endpoint_policy: Policy {
                limit: DEFAULT_ENDPOINT_LIMIT,
                window_secs: DEFAULT_ENDPOINT_WINDOW_SECS,
            },
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|e| GatekeeperError::Config(format!("invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_only_defaults() {
        let config = Config::local_only();
        assert!(config.redis_url.is_none());
        assert_eq!(config.ip_policy.limit, 100);
        assert_eq!(config.tenant_policy.limit, 500);
        assert_eq!(config.endpoint_policy.limit, 20);
        assert_eq!(config.endpoint_policy.window_secs, 60);
    }
}
