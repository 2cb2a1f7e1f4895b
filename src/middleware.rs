use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::info;

use crate::handlers::SharedState;

/// Request logging middleware. Logs the resolved client identity rather
/// than the raw peer address so operators see the same key the limiter
/// would use.
pub async fn logging_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = resolved_client_ip(&state, &request);

    info!(
        target: "gatekeeper::middleware",
        method = %method,
        uri = %uri,
        client_ip = %client_ip,
        "Incoming request"
    );

    let response = next.run(request).await;

    info!(
        target: "gatekeeper::middleware",
        method = %method,
        uri = %uri,
        status = %response.status(),
        "Request completed"
    );

    response
}

fn resolved_client_ip(state: &SharedState, request: &Request) -> String {
    let peer_ip = request
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let forwarded_for = header_value(request, "x-forwarded-for");
    let real_ip = header_value(request, "x-real-ip");

    state.resolver.resolve(&peer_ip, &forwarded_for, &real_ip)
}

fn header_value(request: &Request, name: &str) -> String {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::handlers::AppState;
    use axum::http::HeaderValue;
    use std::sync::Arc;

    fn state_with_proxies(trusted: &str) -> SharedState {
        let mut config = Config::local_only();
        config.trusted_proxies = trusted.to_string();
        Arc::new(AppState::new(config))
    }

    #[test]
    fn test_spoofed_header_ignored_without_trusted_proxies() {
        let state = state_with_proxies("");
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4"),
        );
        request
            .extensions_mut()
            .insert(axum::extract::ConnectInfo::<SocketAddr>(
                "198.51.100.7:4242".parse().unwrap(),
            ));

        assert_eq!(resolved_client_ip(&state, &request), "198.51.100.7");
    }

    #[test]
    fn test_trusted_proxy_chain_resolved() {
        let state = state_with_proxies("10.0.0.0/8");
        let mut request = Request::new(axum::body::Body::empty());
        request.headers_mut().insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.5"),
        );
        request
            .extensions_mut()
            .insert(axum::extract::ConnectInfo::<SocketAddr>(
                "10.0.0.5:4242".parse().unwrap(),
            ));

        assert_eq!(resolved_client_ip(&state, &request), "203.0.113.9");
    }

    #[test]
    fn test_missing_connect_info_falls_back() {
        let state = state_with_proxies("");
        let request = Request::new(axum::body::Body::empty());
        assert_eq!(resolved_client_ip(&state, &request), "unknown");
    }
}
