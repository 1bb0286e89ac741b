use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, Request},
    response::{IntoResponse, Response},
};
use authz::{AccessRequest, RejectReason, ResourceId, Verdict};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info, warn};

use crate::{
    error::{ApiError, ApiErrorResponse, ApiResult},
    extract::{bearer_token, ClientIp},
    rate_limit::RETRY_AFTER_SECS,
    AppState,
};

/// Request headers forwarded to the file service (range and cache validation).
const FORWARDED_HEADERS: [header::HeaderName; 4] = [
    header::RANGE,
    header::IF_RANGE,
    header::IF_MODIFIED_SINCE,
    header::IF_UNMODIFIED_SINCE,
];

/// Stream a protected audio file
///
/// GET /api/audio/stream/{resource_id}
#[utoipa::path(
    get,
    path = "/api/audio/stream/{resource_id}",
    params(
        ("resource_id" = String, Path, description = "Audio resource id ([A-Za-z0-9_-], 1 to 50 characters)")
    ),
    responses(
        (status = 200, description = "Audio file", content_type = "application/octet-stream"),
        (status = 400, description = "Invalid resource id", body = ApiErrorResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorResponse),
        (status = 403, description = "Access denied", body = ApiErrorResponse),
        (status = 404, description = "Audio file not found", body = ApiErrorResponse),
        (status = 429, description = "Rate limit exceeded", body = ApiErrorResponse),
        (status = 500, description = "Internal error", body = ApiErrorResponse)
    ),
    security(("bearer" = [])),
    tag = "audio"
)]
pub async fn stream_audio(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
    ClientIp(client_ip): ClientIp,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if !state.limiters.allow_audio() {
        warn!(
            resource = %resource_id,
            ip = %client_ip,
            "Audio access rate limit exceeded"
        );
        state
            .gateway
            .log_unauthorized_access(&resource_id, &client_ip, RejectReason::RateLimited)
            .await;
        return Err(ApiError::RateLimited {
            retry_after_secs: RETRY_AFTER_SECS,
        });
    }

    info!(resource = %resource_id, ip = %client_ip, "Audio stream requested");

    let request = AccessRequest::new(bearer_token(&headers), resource_id, client_ip);
    let verdict = state.gateway.evaluate_detached(request).await?;

    match verdict {
        Verdict::Granted {
            identity,
            resource_id,
        } => {
            info!(user = %identity.user_id, resource = %resource_id, "Streaming audio file");
            serve_audio(&state, &resource_id, &headers).await
        }
        Verdict::Rejected(RejectReason::BadFormat) => {
            Err(ApiError::BadRequest("Invalid resource id".to_string()))
        }
        Verdict::Rejected(RejectReason::BadToken) => Err(ApiError::Unauthorized),
        Verdict::Rejected(RejectReason::RateLimited) => Err(ApiError::RateLimited {
            retry_after_secs: RETRY_AFTER_SECS,
        }),
        Verdict::Denied(_) => Err(ApiError::Forbidden),
    }
}

async fn serve_audio(
    state: &AppState,
    resource_id: &ResourceId,
    headers: &HeaderMap,
) -> ApiResult<Response> {
    let file_name = format!("{}.mp3", resource_id);
    let path = state.config.audio_dir.join(&file_name);

    match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => {}
        _ => {
            warn!(path = %path.display(), "Audio file not found");
            return Err(ApiError::NotFound(format!("Audio file {}", file_name)));
        }
    }

    let mut file_request = Request::builder().method(Method::GET).uri("/");
    for name in &FORWARDED_HEADERS {
        if let Some(value) = headers.get(name) {
            file_request = file_request.header(name, value);
        }
    }
    let file_request = file_request
        .body(Body::empty())
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    let mut response = match ServeFile::new(&path).oneshot(file_request).await {
        Ok(response) => response.map(Body::new).into_response(),
        Err(infallible) => match infallible {},
    };

    if response.status().is_server_error() {
        error!(path = %path.display(), status = %response.status(), "Failed to read audio file");
        return Err(ApiError::InternalError("failed to read audio file".to_string()));
    }

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file_name))
        .map_err(|e| ApiError::InternalError(e.to_string()))?;
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    response_headers.insert(header::CONTENT_DISPOSITION, disposition);
    Ok(response)
}
