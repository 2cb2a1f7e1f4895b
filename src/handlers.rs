use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::identity::ClientIdentityResolver;
use crate::limiter::RateLimiter;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Application state containing the limiter and identity resolver
pub struct AppState {
    pub limiter: RateLimiter,
    pub resolver: ClientIdentityResolver,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            limiter: RateLimiter::new(config.clone()),
            resolver: ClientIdentityResolver::from_config(&config.trusted_proxies),
            config,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub key: String,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub window_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub peer_ip: String,
    #[serde(default)]
    pub forwarded_for: String,
    #[serde(default)]
    pub real_ip: String,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub client_ip: String,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub key: String,
    pub cleared: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub shared_configured: bool,
    pub shared_available: bool,
}

/// Run an admission check for a key. Falls back to the configured per-IP
/// policy when the caller does not pass an explicit limit/window.
pub async fn check_limit(
    State(state): State<SharedState>,
    Json(payload): Json<CheckRequest>,
) -> impl IntoResponse {
    let limit = payload.limit.unwrap_or(state.config.ip_policy.limit);
    let window_secs = payload
        .window_secs
        .unwrap_or(state.config.ip_policy.window_secs);

    let decision = state.limiter.check_limit(&payload.key, limit, window_secs).await;

    let status = if decision.allowed {
        StatusCode::OK
    } else {
        StatusCode::TOO_MANY_REQUESTS
    };
    let mut response = (status, Json(&decision)).into_response();

    let headers = response.headers_mut();
    if let Ok(value) = decision.limit.to_string().parse() {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = decision.remaining.to_string().parse() {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = decision.reset_at.to_string().parse() {
        headers.insert("X-RateLimit-Reset", value);
    }
    if !decision.allowed {
        if let Ok(value) = decision.retry_after_secs.to_string().parse() {
            headers.insert("Retry-After", value);
        }
    }

    response
}

/// Resolve the true client identity from the peer address and forwarding
/// headers supplied by the routing layer.
pub async fn resolve_identity(
    State(state): State<SharedState>,
    Json(payload): Json<ResolveRequest>,
) -> impl IntoResponse {
    let client_ip = state.resolver.resolve(
        &payload.peer_ip,
        &payload.forwarded_for,
        &payload.real_ip,
    );
    Json(ResolveResponse { client_ip })
}

/// Administrative reset for one key. Kept off the decision path so normal
/// request handling can never drop counter state by accident.
pub async fn clear_key(
    State(state): State<SharedState>,
    Path(key): Path<String>,
) -> impl IntoResponse {
    let cleared = state.limiter.clear_key(&key).await;
    Json(ClearResponse { key, cleared })
}

/// Limiter introspection for dashboards and health tooling.
pub async fn stats(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.limiter.stats().await)
}

/// Liveness endpoint. Always 200: the service can make decisions even with
/// the shared store down.
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let stats = state.limiter.stats().await;
    Json(HealthResponse {
        status: "healthy",
        shared_configured: stats.shared_configured,
        shared_available: stats.shared_available,
    })
}

/// Readiness endpoint. Reports local-only mode without failing readiness.
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    let stats = state.limiter.stats().await;
    if stats.shared_available {
        Json(serde_json::json!({
            "status": "ready",
            "shared_store": "connected"
        }))
    } else {
        Json(serde_json::json!({
            "status": "ready",
            "shared_store": "disconnected",
            "note": "running in local-only mode"
        }))
    }
}
