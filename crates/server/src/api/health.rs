//! Liveness and telemetry endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use drudge_pool::{PoolState, PoolStats};
use drudge_queue::{Backend, MetricsSnapshot, QueueHealth};
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub running: bool,
    pub state: PoolState,
    pub backend: String,
    /// Result of the backend's connectivity check; absent when it failed.
    pub queue: Option<QueueHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /health`: 200 while the pool runs and the backend answers its
/// health check, 503 otherwise.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let backend = state.pool.backend();
    let running = state.pool.is_running();

    let (queue, error) = match backend.health_check().await {
        Ok(health) => (Some(health), None),
        Err(e) => {
            warn!(backend = %backend.name(), error = %e, "Backend health check failed");
            (None, Some(e.to_string()))
        }
    };
    let healthy = running && queue.as_ref().is_some_and(|q| q.connected);

    let body = HealthResponse {
        status: if healthy { "ok" } else { "unavailable" },
        running,
        state: state.pool.state(),
        backend: backend.name().to_string(),
        queue,
        error,
    };
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub pool: PoolStats,
    pub backend: Option<MetricsSnapshot>,
    pub methods: Vec<String>,
}

/// `GET /metrics`: pool gauges plus backend counters.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        pool: state.pool.stats(),
        backend: state.pool.backend().metrics().map(|m| m.snapshot()),
        methods: state.methods.names().into_iter().map(str::to_string).collect(),
    })
}
