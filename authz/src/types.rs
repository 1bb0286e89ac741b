//! Core types flowing through the access gateway.
//!
//! # Security Considerations
//!
//! ## 1. Identity
//! - An [`Identity`] is only ever built by the token verifier from a token whose
//!   signature, issuer, audience and expiry have been checked
//! - Identities are passed explicitly down the call chain; nothing reads them
//!   from ambient request context
//!
//! ## 2. Resource Access Control
//! - Resource ids are validated before any file-system or network interaction
//! - Invalid formats are rejected, never "sanitized" into something else
//!
//! ## 3. Decisions & Information Disclosure
//! - Every [`DenyReason`] is visible in the audit trail
//! - Externally, all denials render identically
//!
//! ## 4. Logging & Auditing
//! - Every terminal outcome emits exactly one audit record
//! - Failed authority attempts emit one record each

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::resource_id::ResourceId;

/// A verified caller identity extracted from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// The token subject (never empty)
    pub user_id: String,

    /// Optional role claim (e.g. "admin")
    pub role: Option<String>,

    /// Optional permission set claim
    pub permissions: Vec<String>,

    /// `iat` claim, if present
    pub issued_at: Option<DateTime<Utc>>,

    /// `exp` claim
    pub expires_at: DateTime<Utc>,
}

impl Identity {
    /// Role claim value that grants access to administrative operations.
    pub const ADMIN_ROLE: &'static str = "admin";

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(Self::ADMIN_ROLE)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Why a request that reached the breaker gate was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The breaker was open; the authority was not called.
    CircuitBreakerOpen,
    /// The authority answered `false`.
    RemoteDenied,
    /// The authority answered 2xx without a verdict in the body.
    MalformedResponse,
    /// Every attempt of the retry budget failed.
    RetriesExhausted,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::CircuitBreakerOpen => "circuit_breaker_open",
            DenyReason::RemoteDenied => "remote_denied",
            DenyReason::MalformedResponse => "malformed_response",
            DenyReason::RetriesExhausted => "retries_exhausted",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was rejected before reaching the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The resource id failed validation.
    BadFormat,
    /// The bearer token was missing or failed verification.
    BadToken,
    /// The routing layer's rate limiter refused the request.
    RateLimited,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::BadFormat => "bad_format",
            RejectReason::BadToken => "bad_token",
            RejectReason::RateLimited => "rate_limited",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one authorization client call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub user_id: String,
    pub resource_id: ResourceId,
    pub client_ip: String,
    pub granted: bool,
    /// `None` when granted.
    pub reason: Option<DenyReason>,
}

impl AccessDecision {
    pub fn granted(user_id: &str, resource_id: &ResourceId, client_ip: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            resource_id: resource_id.clone(),
            client_ip: client_ip.to_string(),
            granted: true,
            reason: None,
        }
    }

    pub fn denied(
        user_id: &str,
        resource_id: &ResourceId,
        client_ip: &str,
        reason: DenyReason,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            resource_id: resource_id.clone(),
            client_ip: client_ip.to_string(),
            granted: false,
            reason: Some(reason),
        }
    }
}

/// Inputs of one gateway evaluation, as extracted by the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    /// Raw bearer token, without the `Bearer ` prefix. `None` if absent.
    pub token: Option<String>,
    /// Raw resource id from the request path.
    pub resource_id: String,
    /// Best-effort client address.
    pub client_ip: String,
}

impl AccessRequest {
    pub fn new(
        token: Option<String>,
        resource_id: impl Into<String>,
        client_ip: impl Into<String>,
    ) -> Self {
        Self {
            token,
            resource_id: resource_id.into(),
            client_ip: client_ip.into(),
        }
    }
}

/// Three-way gateway verdict handed back to the routing layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Granted {
        identity: Identity,
        resource_id: ResourceId,
    },
    Denied(DenyReason),
    Rejected(RejectReason),
}

impl Verdict {
    pub fn is_granted(&self) -> bool {
        matches!(self, Verdict::Granted { .. })
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Granted { .. } => f.write_str("granted"),
            Verdict::Denied(reason) => write!(f, "denied:{reason}"),
            Verdict::Rejected(reason) => write!(f, "rejected:{reason}"),
        }
    }
}
