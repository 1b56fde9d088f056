//! Health Check and Metrics Endpoint
//!
//! HTTP routes for health checks, engine status reporting, and Prometheus
//! metrics. Used by container orchestrators and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /readyz` - Readiness probe (engine running with an adapter)
//! - `GET /metrics` - Prometheus metrics in text format

use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::engine::{EngineState, OracleEngine, TickReport};
use crate::domain::price::now_millis;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Engine version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Engine lifecycle state.
    pub engine: EngineState,
    /// Tracked symbol count.
    pub symbols: usize,
    /// Active adapter count.
    pub adapters: usize,
    /// Live plugin count.
    pub plugins: usize,
    /// Tracked symbols without a fresh published price.
    pub stale_symbols: Vec<String>,
    /// Last completed tick.
    pub last_tick: Option<TickReport>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Running, with adapters, every tracked symbol fresh.
    Healthy,
    /// Running but without adapters or with stale symbols.
    Degraded,
    /// Engine stopped.
    Unhealthy,
}

// =============================================================================
// Health State
// =============================================================================

/// Shared state for the health routes.
pub struct HealthState {
    started_at: Instant,
    engine: Arc<OracleEngine>,
}

impl HealthState {
    /// Create new health state.
    #[must_use]
    pub fn new(engine: Arc<OracleEngine>) -> Self {
        Self {
            started_at: Instant::now(),
            engine,
        }
    }
}

/// Build the health router.
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let is_ready = state.engine.state() == EngineState::Running
        && !state.engine.adapter_names().is_empty();

    if is_ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthState) -> HealthResponse {
    let engine = &state.engine;
    let engine_state = engine.state();
    let adapters = engine.adapter_names().len();
    let stale_symbols = engine.stale_symbols(now_millis());

    HealthResponse {
        status: determine_health_status(engine_state, adapters, stale_symbols.len()),
        version: engine.version().to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        engine: engine_state,
        symbols: engine.symbols().len(),
        adapters,
        plugins: engine.list_plugins().len(),
        stale_symbols,
        last_tick: engine.last_tick(),
    }
}

const fn determine_health_status(engine: EngineState, adapters: usize, stale: usize) -> HealthStatus {
    match engine {
        EngineState::Stopped => HealthStatus::Unhealthy,
        EngineState::Running if adapters == 0 || stale > 0 => HealthStatus::Degraded,
        EngineState::Running => HealthStatus::Healthy,
    }
}

// =============================================================================
// Tests
// =============================================================================
