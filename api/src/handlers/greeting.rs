use axum::{extract::State, Json};
use chrono::Utc;
use tracing::{info, warn};

use crate::{
    error::{ApiError, ApiErrorResponse, ApiResult},
    extract::Authenticated,
    models::TestResponse,
    rate_limit::RETRY_AFTER_SECS,
    AppState,
};

/// Token smoke test: greets the verified caller
///
/// GET /api/test
#[utoipa::path(
    get,
    path = "/api/test",
    responses(
        (status = 200, description = "Token accepted", body = TestResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ApiErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "test"
)]
pub async fn greet(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> ApiResult<Json<TestResponse>> {
    if !state.limiters.allow_default() {
        warn!(user = %identity.user_id, "Rate limit exceeded on /api/test");
        return Err(ApiError::RateLimited {
            retry_after_secs: RETRY_AFTER_SECS,
        });
    }

    info!(user = %identity.user_id, "Token test succeeded");
    Ok(Json(TestResponse {
        message: format!(
            "Hello {}! JWT authentication works correctly.",
            identity.user_id
        ),
        user: identity.user_id,
        timestamp: Utc::now().timestamp_millis(),
    }))
}
