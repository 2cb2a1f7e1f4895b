pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod keys;
pub mod limiter;
pub mod middleware;
pub mod server;
pub mod store;

pub use config::Config;
pub use error::{GatekeeperError, Result, StoreError};
pub use identity::ClientIdentityResolver;
pub use limiter::{LimiterStats, RateLimitDecision, RateLimiter};
pub use server::create_app;
