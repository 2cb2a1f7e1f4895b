use crate::config::Config;
use crate::handlers::{
    check_limit, clear_key, health_check, readiness_check, resolve_identity, stats, AppState,
    SharedState,
};
use crate::middleware::logging_middleware;
use axum::routing::{delete, get, post};
use axum::{middleware, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the application router for the given state.
pub fn create_app(state: SharedState) -> Router {
    Router::new()
        // Decision and identity endpoints
        .route("/v1/check", post(check_limit))
        .route("/v1/resolve", post(resolve_identity))
        // Administrative reset, distinct from the decision path
        .route("/v1/limits/:key", delete(clear_key))
        .route("/v1/stats", get(stats))
        // Health and readiness endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    logging_middleware,
                )),
        )
        .with_state(state)
}

pub struct Server {
    state: SharedState,
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        let state = Arc::new(AppState::new(config.clone()));
        Self { state, config }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = create_app(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;

        if self.config.sweep_interval_secs > 0 {
            spawn_sweep_task(self.state.clone(), self.config.sweep_interval_secs);
        }

        tracing::info!("Gatekeeper listening on {}", self.config.bind_addr);
        tracing::info!("Health check available at /health");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        Ok(())
    }
}

/// Periodically drop aged keys from the local store. Memory-bounding only;
/// expiry on the decision path is lazy.
fn spawn_sweep_task(state: SharedState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.tick().await; // first tick fires immediately
        loop {
            interval.tick().await;
            let swept = state.limiter.sweep_local();
            if swept > 0 {
                tracing::debug!(swept = swept, "swept aged keys from local store");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
