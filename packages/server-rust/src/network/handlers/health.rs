//! Health, liveness, and readiness endpoint handlers.
//!
//! These routes sit outside the interceptor pipeline: probes are neither
//! correlated nor audited.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the gateway is actually healthy.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "interceptors": state.pipeline.interceptor_names(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe -- always returns 200 OK.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe -- returns 200 when ready, 503 otherwise.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
