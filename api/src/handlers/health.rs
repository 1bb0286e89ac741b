use axum::{extract::State, Json};
use chrono::Utc;
use tracing::debug;

use crate::{
    error::ApiResult,
    models::{HealthResponse, SERVICE_NAME},
    AppState,
};

/// Service banner
///
/// GET /
pub async fn root() -> &'static str {
    "Secure Audio Microservice is running! Check /health for detailed status."
}

/// Health check endpoint
///
/// GET /health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    debug!("Health check requested");

    let connected = state.gateway.authority_healthy().await;
    let breaker = state.gateway.circuit_breaker();

    let state_label = match breaker.state() {
        authz::BreakerState::Closed => "closed",
        authz::BreakerState::Open => "open",
    };

    Ok(Json(HealthResponse {
        status: "UP".to_string(),
        application: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        main_app_connectivity: connected,
        circuit_breaker_failures: breaker.current_failure_count(),
        circuit_breaker_state: state_label.to_string(),
        timestamp: Utc::now().timestamp_millis(),
        metrics: state.gateway.metrics().snapshot().into(),
    }))
}
