//! Prometheus access metrics.
//!
//! Counters and the access check histogram live in a [`Registry`] owned by the
//! gateway. Embedders can gather it; `/health` shows a [`MetricsSnapshot`].

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use serde::Serialize;
use std::time::Duration;

use crate::error::{AuthzError, Result};

/// Bucket bounds in seconds. Retries with backoff push slow checks well past
/// the single-call timeout.
const CHECK_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0,
];

/// Access metrics updated by the gateway on every evaluation.
#[derive(Clone)]
pub struct AccessMetrics {
    registry: Registry,
    access_requests: IntCounter,
    access_granted: IntCounter,
    access_denied: IntCounter,
    unauthorized_attempts: IntCounter,
    access_check_duration: Histogram,
}

/// Point-in-time view of [`AccessMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub access_requests_total: u64,
    pub access_granted_total: u64,
    pub access_denied_total: u64,
    pub unauthorized_access_attempts_total: u64,
    /// Remote access checks observed by the duration histogram
    pub access_checks_total: u64,
    pub access_check_duration_seconds_sum: f64,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, help)).map_err(registration_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(registration_error)?;
    Ok(counter)
}

fn registration_error(e: prometheus::Error) -> AuthzError {
    AuthzError::Internal(format!("metrics registration failed: {}", e))
}

impl AccessMetrics {
    /// Metrics in a fresh registry.
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    /// Register the access metrics in `registry`.
    pub fn with_registry(registry: Registry) -> Result<Self> {
        let access_requests = counter(
            &registry,
            "access_requests_total",
            "Access requests evaluated by the gateway",
        )?;
        let access_granted = counter(
            &registry,
            "access_granted_total",
            "Access requests granted",
        )?;
        let access_denied = counter(
            &registry,
            "access_denied_total",
            "Access requests denied after token verification",
        )?;
        let unauthorized_attempts = counter(
            &registry,
            "unauthorized_access_attempts_total",
            "Requests refused before the authority was consulted",
        )?;

        let access_check_duration = Histogram::with_opts(
            HistogramOpts::new(
                "access_check_duration_seconds",
                "Duration of remote access checks, retries included",
            )
            .buckets(CHECK_DURATION_BUCKETS.to_vec()),
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(access_check_duration.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            registry,
            access_requests,
            access_granted,
            access_denied,
            unauthorized_attempts,
            access_check_duration,
        })
    }

    pub fn record_request(&self) {
        self.access_requests.inc();
    }

    pub fn record_granted(&self) {
        self.access_granted.inc();
    }

    pub fn record_denied(&self) {
        self.access_denied.inc();
    }

    pub fn record_unauthorized(&self) {
        self.unauthorized_attempts.inc();
    }

    /// Observe the duration of one remote access check.
    pub fn record_check_duration(&self, elapsed: Duration) {
        self.access_check_duration.observe(elapsed.as_secs_f64());
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            access_requests_total: self.access_requests.get(),
            access_granted_total: self.access_granted.get(),
            access_denied_total: self.access_denied.get(),
            unauthorized_access_attempts_total: self.unauthorized_attempts.get(),
            access_checks_total: self.access_check_duration.get_sample_count(),
            access_check_duration_seconds_sum: self.access_check_duration.get_sample_sum(),
        }
    }
}

impl std::fmt::Debug for AccessMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
