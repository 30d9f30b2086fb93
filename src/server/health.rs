//! Health check endpoint
//!
//! `/health` reports version, live WebSocket connections and broker
//! reachability. Served on its own port, separate from the WebSocket listener.

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use wsbridge_core::MessageStore;
use wsbridge_gateway::ConnectionRegistry;

/// Shared state for health handlers
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<ConnectionRegistry>,
    pub store: MessageStore,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub connections: usize,
    pub broker: ComponentHealth,
}

/// Individual component health status
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let broker = check_broker(&state.store).await;
    let status = if broker.status == "healthy" {
        "healthy"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        connections: state.registry.len(),
        broker,
    })
}

async fn check_broker(store: &MessageStore) -> ComponentHealth {
    let broker = store.broker();
    let start = Instant::now();
    match broker.ping().await {
        Ok(()) => ComponentHealth {
            status: "healthy",
            backend: broker.name(),
            latency_ms: Some(millis(start.elapsed())),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: "unhealthy",
            backend: broker.name(),
            latency_ms: None,
            error: Some(e.to_string()),
        },
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Health routes
pub fn health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
