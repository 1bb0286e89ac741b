//! Audit trail of access decisions.
//!
//! The gateway reports every terminal outcome, every failed authority attempt
//! and every pre-authority rejection as an [`AuditEvent`]. Persisting the
//! trail is the job of an [`AuditSink`]; the core ships a `tracing` sink, an
//! in-memory sink and a fan-out combinator. The `audit` crate provides a
//! hash-chained file sink.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use crate::error::{AuthzError, Result};
use crate::types::{DenyReason, RejectReason};

/// `tracing` target used for audit records.
pub const AUDIT_TARGET: &str = "audit";

/// One audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    AccessGranted {
        user_id: String,
        resource_id: String,
        client_ip: String,
    },
    AccessDenied {
        user_id: String,
        resource_id: String,
        client_ip: String,
        reason: DenyReason,
    },
    AuthorityAttemptFailed {
        user_id: String,
        resource_id: String,
        client_ip: String,
        /// 1-based attempt number
        attempt: u32,
        error_kind: String,
        error: String,
    },
    UnauthorizedAccessAttempt {
        resource_id: String,
        client_ip: String,
        reason: RejectReason,
    },
    CircuitBreakerReset {
        actor: String,
        previous_failures: u32,
    },
}

impl AuditEvent {
    pub fn attempt_failed(
        user_id: &str,
        resource_id: &str,
        client_ip: &str,
        attempt: u32,
        error: &AuthzError,
    ) -> Self {
        AuditEvent::AuthorityAttemptFailed {
            user_id: user_id.to_string(),
            resource_id: resource_id.to_string(),
            client_ip: client_ip.to_string(),
            attempt,
            error_kind: error.kind().to_string(),
            error: error.to_string(),
        }
    }

    /// Stable event tag, e.g. `ACCESS_DENIED`.
    pub fn tag(&self) -> &'static str {
        match self {
            AuditEvent::AccessGranted { .. } => "ACCESS_GRANTED",
            AuditEvent::AccessDenied { .. } => "ACCESS_DENIED",
            AuditEvent::AuthorityAttemptFailed { .. } => "AUTHORITY_ATTEMPT_FAILED",
            AuditEvent::UnauthorizedAccessAttempt { .. } => "UNAUTHORIZED_ACCESS_ATTEMPT",
            AuditEvent::CircuitBreakerReset { .. } => "CIRCUIT_BREAKER_RESET",
        }
    }

    /// Outcome column: `granted`, `denied`, `failed`, `rejected` or `admin`.
    pub fn outcome(&self) -> &'static str {
        match self {
            AuditEvent::AccessGranted { .. } => "granted",
            AuditEvent::AccessDenied { .. } => "denied",
            AuditEvent::AuthorityAttemptFailed { .. } => "failed",
            AuditEvent::UnauthorizedAccessAttempt { .. } => "rejected",
            AuditEvent::CircuitBreakerReset { .. } => "admin",
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuditEvent::AccessGranted { user_id, .. }
            | AuditEvent::AccessDenied { user_id, .. }
            | AuditEvent::AuthorityAttemptFailed { user_id, .. } => Some(user_id),
            AuditEvent::CircuitBreakerReset { actor, .. } => Some(actor),
            AuditEvent::UnauthorizedAccessAttempt { .. } => None,
        }
    }

    pub fn resource_id(&self) -> Option<&str> {
        match self {
            AuditEvent::AccessGranted { resource_id, .. }
            | AuditEvent::AccessDenied { resource_id, .. }
            | AuditEvent::AuthorityAttemptFailed { resource_id, .. }
            | AuditEvent::UnauthorizedAccessAttempt { resource_id, .. } => Some(resource_id),
            AuditEvent::CircuitBreakerReset { .. } => None,
        }
    }

    pub fn client_ip(&self) -> Option<&str> {
        match self {
            AuditEvent::AccessGranted { client_ip, .. }
            | AuditEvent::AccessDenied { client_ip, .. }
            | AuditEvent::AuthorityAttemptFailed { client_ip, .. }
            | AuditEvent::UnauthorizedAccessAttempt { client_ip, .. } => Some(client_ip),
            AuditEvent::CircuitBreakerReset { .. } => None,
        }
    }
}

/// Destination of audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Record `event`, falling back to an error log if the sink fails.
///
/// A failing sink never changes the access decision.
pub async fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(&event).await {
        error!(
            target: AUDIT_TARGET,
            event = ?event,
            "Failed to persist audit event: {}",
            e
        );
    }
}

/// Writes audit records as structured `tracing` events on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        match event {
            AuditEvent::AccessGranted {
                user_id,
                resource_id,
                client_ip,
            } => info!(
                target: AUDIT_TARGET,
                user = %user_id,
                resource = %resource_id,
                ip = %client_ip,
                "ACCESS_GRANTED"
            ),
            AuditEvent::AccessDenied {
                user_id,
                resource_id,
                client_ip,
                reason,
            } => warn!(
                target: AUDIT_TARGET,
                user = %user_id,
                resource = %resource_id,
                ip = %client_ip,
                reason = %reason,
                "ACCESS_DENIED"
            ),
            AuditEvent::AuthorityAttemptFailed {
                user_id,
                resource_id,
                client_ip,
                attempt,
                error_kind,
                error,
            } => error!(
                target: AUDIT_TARGET,
                user = %user_id,
                resource = %resource_id,
                ip = %client_ip,
                attempt = *attempt,
                kind = %error_kind,
                error = %error,
                "AUTHORITY_ATTEMPT_FAILED"
            ),
            AuditEvent::UnauthorizedAccessAttempt {
                resource_id,
                client_ip,
                reason,
            } => warn!(
                target: AUDIT_TARGET,
                resource = %resource_id,
                ip = %client_ip,
                reason = %reason,
                "UNAUTHORIZED_ACCESS_ATTEMPT"
            ),
            AuditEvent::CircuitBreakerReset {
                actor,
                previous_failures,
            } => info!(
                target: AUDIT_TARGET,
                actor = %actor,
                previous_failures = *previous_failures,
                "CIRCUIT_BREAKER_RESET"
            ),
        }
        Ok(())
    }
}

/// Keeps audit records in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded events, in order.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Tags of the recorded events, in order.
    pub fn tags(&self) -> Vec<&'static str> {
        self.events().iter().map(AuditEvent::tag).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| AuthzError::Audit("memory sink poisoned".to_string()))?
            .push(event.clone());
        Ok(())
    }
}

/// Forwards every record to each inner sink.
///
/// All sinks are attempted; the first error is returned after the others ran.
#[derive(Clone, Default)]
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.record(event).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
