//! Access control core of the audio streaming gateway.
//!
//! This crate decides whether a caller may stream a protected audio resource.
//! It verifies the caller's bearer token locally, validates the requested
//! resource id, and asks a remote authorization authority for the verdict,
//! protected by a retry loop and a consecutive-failure circuit breaker.
//!
//! # Architecture Overview
//!
//! The access flow follows this pattern:
//!
//! 1. **Request arrives** at the API layer, which extracts token, resource id and client IP
//! 2. **Resource id** is validated (`resource_id`)
//! 3. **Token** is verified and turned into an [`Identity`] (`token`)
//! 4. **Circuit breaker** gates the remote call (`circuit_breaker`)
//! 5. **Authorization client** asks the authority, retrying with backoff (`client`)
//! 6. **Verdict** is returned: granted, denied or rejected (`gateway`)
//!
//! Every terminal outcome is written to the audit trail (`audit`) and counted
//! (`metrics`).
//!
//! # Security Architecture
//!
//! See `types.rs` for the security considerations covering identity,
//! resource access control, information disclosure and auditing.

pub mod audit;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod resource_id;
pub mod token;
pub mod types;

pub use audit::{AuditEvent, AuditSink};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use client::{Authority, AuthorizationClient, HttpAuthority, RetryPolicy, Sleeper};
pub use config::GatewayConfig;
pub use error::{AuthzError, Result};
pub use gateway::{AccessGateway, GatewayBuilder};
pub use metrics::{AccessMetrics, MetricsSnapshot};
pub use resource_id::ResourceId;
pub use token::{SigningKey, TokenIssuer, TokenVerifier};
pub use types::{AccessDecision, AccessRequest, DenyReason, Identity, RejectReason, Verdict};
