use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use authz::AccessGateway;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware_hooks;
pub mod models;
pub mod rate_limit;
pub mod server;


// Re-export server functions for convenience
pub use server::{serve, start_server_with_config, ApiConfig};

use rate_limit::RateLimiters;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<AccessGateway>,
    pub config: Arc<ApiConfig>,
    pub limiters: Arc<RateLimiters>,
}

impl AppState {
    pub fn new(gateway: Arc<AccessGateway>, config: ApiConfig) -> Self {
        let limiters = RateLimiters::new(
            config.audio_rate_limit_per_sec,
            config.default_rate_limit_per_sec,
        );
        Self {
            gateway,
            config: Arc::new(config),
            limiters: Arc::new(limiters),
        }
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::audio::stream_audio,
        handlers::greeting::greet,
        handlers::admin::health_check,
        handlers::admin::reset_circuit_breaker,
        handlers::health::health_check,
    ),
    components(
        schemas(
            models::HealthResponse,
            models::AdminHealthResponse,
            models::ResetResponse,
            models::TestResponse,
            models::MetricsResponse,
            error::ApiErrorResponse,
            error::ErrorDetail,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "audio", description = "Protected audio streaming"),
        (name = "admin", description = "Operator endpoints (admin role)"),
        (name = "test", description = "Token smoke test"),
        (name = "health", description = "Health check endpoints"),
    ),
    info(
        title = "Audio Access Gateway API",
        version = "1.0.0",
        description = "Token-protected audio streaming with remote access checks",
    ),
)]
pub struct ApiDoc;

/// True if `origin` is allowed by `pattern`.
///
/// Patterns are exact origins, `*`, or `scheme://*.domain` which matches any
/// subdomain of `domain` (but not `domain` itself).
pub fn origin_matches(pattern: &str, origin: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.split_once("*.") {
        Some((scheme, domain)) => origin
            .strip_prefix(scheme)
            .and_then(|host| host.strip_suffix(domain))
            .map(|sub| sub.len() > 1 && sub.ends_with('.') && !sub.contains('/'))
            .unwrap_or(false),
        None => pattern == origin,
    }
}

/// CORS policy for the configured origins.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new();
    }
    let patterns = origins.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| patterns.iter().any(|p| origin_matches(p, o)))
                .unwrap_or(false)
        }))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::RANGE])
}

/// Create the main API router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/audio/stream/:resource_id",
            get(handlers::audio::stream_audio),
        )
        .route("/test", get(handlers::greeting::greet))
        .route("/admin/health-check", get(handlers::admin::health_check))
        .route(
            "/admin/reset-circuit-breaker",
            post(handlers::admin::reset_circuit_breaker),
        );

    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health_check))
        .nest("/api", api)
        .merge(SwaggerUi::new("/api/swagger").url("/api/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(middleware_hooks::request_middleware))
        .layer(middleware::from_fn(middleware_hooks::response_middleware))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
