use axum::{extract::State, Json};
use tracing::info;

use crate::{
    error::{ApiErrorResponse, ApiResult},
    extract::Admin,
    models::{AdminHealthResponse, ResetResponse, SERVICE_NAME},
    AppState,
};

/// Detailed health for operators
///
/// GET /api/admin/health-check
#[utoipa::path(
    get,
    path = "/api/admin/health-check",
    responses(
        (status = 200, description = "Gateway status", body = AdminHealthResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ApiErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn health_check(
    State(state): State<AppState>,
    Admin(identity): Admin,
) -> ApiResult<Json<AdminHealthResponse>> {
    let breaker = state.gateway.circuit_breaker();
    Ok(Json(AdminHealthResponse {
        status: "UP".to_string(),
        service: SERVICE_NAME.to_string(),
        authenticated_user: identity.user_id,
        access_service_failures: breaker.current_failure_count(),
        circuit_breaker_threshold: breaker.threshold(),
        metrics: state.gateway.metrics().snapshot().into(),
    }))
}

/// Close the circuit breaker
///
/// POST /api/admin/reset-circuit-breaker
#[utoipa::path(
    post,
    path = "/api/admin/reset-circuit-breaker",
    responses(
        (status = 200, description = "Breaker reset", body = ResetResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse),
        (status = 403, description = "Caller is not an admin", body = ApiErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
pub async fn reset_circuit_breaker(
    State(state): State<AppState>,
    Admin(identity): Admin,
) -> ApiResult<Json<ResetResponse>> {
    let previous_failures = state.gateway.reset_circuit_breaker(&identity).await;
    info!(actor = %identity.user_id, previous_failures, "Circuit breaker reset via API");

    Ok(Json(ResetResponse {
        status: "success".to_string(),
        message: format!("Circuit breaker reset by {}", identity.user_id),
        previous_failures,
    }))
}
