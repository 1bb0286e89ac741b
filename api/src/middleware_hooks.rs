use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Header carrying the gateway version on every response.
pub const VERSION_HEADER: &str = "x-audio-gateway-version";

/// Security headers added to every response.
pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("cache-control", "no-store"),
];

/// Request logging hook
///
/// Logs method, path, status and latency. Failed requests are logged at
/// `warn` so they show up in the default log level.
pub async fn request_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    debug!("Processing {} {}", method, path);

    let response = next.run(request).await;

    let elapsed = start.elapsed();
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        warn!(%method, %path, status = status.as_u16(), ?elapsed, "Request failed");
    } else {
        info!(%method, %path, status = status.as_u16(), ?elapsed, "Request completed");
    }

    response
}

/// Response post-processing hook
///
/// Adds the security headers and the version header. Values already set by a
/// handler are kept.
pub async fn response_middleware(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    for (name, value) in SECURITY_HEADERS {
        headers
            .entry(HeaderName::from_static(name))
            .or_insert(HeaderValue::from_static(value));
    }
    headers.insert(
        HeaderName::from_static(VERSION_HEADER),
        HeaderValue::from_static(env!("CARGO_PKG_VERSION")),
    );

    response
}
