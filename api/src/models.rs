use authz::MetricsSnapshot;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Service name reported by the health endpoints
pub const SERVICE_NAME: &str = "audio-resource-provider";

/// Public health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub application: String,
    pub version: String,
    /// Whether the authorization authority answered its health probe
    pub main_app_connectivity: bool,
    pub circuit_breaker_failures: u32,
    /// `closed` or `open`
    pub circuit_breaker_state: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub metrics: MetricsResponse,
}

/// Admin health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AdminHealthResponse {
    pub status: String,
    pub service: String,
    pub authenticated_user: String,
    pub access_service_failures: u32,
    pub circuit_breaker_threshold: u32,
    pub metrics: MetricsResponse,
}

/// Circuit breaker reset response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetResponse {
    pub status: String,
    pub message: String,
    pub previous_failures: u32,
}

/// Token smoke-test response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TestResponse {
    pub message: String,
    pub user: String,
    pub timestamp: i64,
}

/// Access counters and check duration totals
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema)]
pub struct MetricsResponse {
    pub access_requests_total: u64,
    pub access_granted_total: u64,
    pub access_denied_total: u64,
    pub unauthorized_access_attempts_total: u64,
    pub access_checks_total: u64,
    pub access_check_duration_seconds_sum: f64,
}

impl From<MetricsSnapshot> for MetricsResponse {
    fn from(snapshot: MetricsSnapshot) -> Self {
        Self {
            access_requests_total: snapshot.access_requests_total,
            access_granted_total: snapshot.access_granted_total,
            access_denied_total: snapshot.access_denied_total,
            unauthorized_access_attempts_total: snapshot.unauthorized_access_attempts_total,
            access_checks_total: snapshot.access_checks_total,
            access_check_duration_seconds_sum: snapshot.access_check_duration_seconds_sum,
        }
    }
}
