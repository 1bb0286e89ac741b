//! Error types for the access gateway.
//!
//! # Security Note
//! Error messages must balance providing useful information for debugging while
//! not leaking authorization details to callers. The variants below are fully
//! distinguishable in logs and the audit trail, while the HTTP layer collapses
//! every denial into a generic "Forbidden".

use thiserror::Error;

/// Errors that can occur while verifying tokens, validating resource ids or
/// talking to the remote authority.
///
/// # Propagation
/// - Token and resource id errors are terminal and resolved before the remote
///   authority is ever contacted.
/// - Authority errors are retried inside the authorization client and are only
///   observed through the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    /// The token could not be parsed (wrong segment count, bad base64, bad JSON).
    #[error("Malformed token")]
    TokenMalformed,

    /// The token signature did not verify against the configured key.
    #[error("Token signature is invalid")]
    TokenSignatureInvalid,

    /// The token's `exp` claim is not in the future.
    #[error("Token has expired")]
    TokenExpired,

    /// The `iss` claim does not equal the configured issuer.
    #[error("Token issuer mismatch")]
    TokenIssuerMismatch,

    /// The `aud` claim does not equal the configured audience.
    #[error("Token audience mismatch")]
    TokenAudienceMismatch,

    /// The `sub` claim is missing or empty.
    #[error("Token has no subject")]
    TokenNoSubject,

    /// The client supplied resource identifier failed syntactic validation.
    #[error("Invalid resource identifier")]
    ResourceIdInvalid,

    /// The circuit breaker is open; no remote call was made.
    #[error("Circuit breaker is open")]
    CircuitOpen,

    /// The remote authority could not be reached (connect/DNS/IO failure).
    #[error("Authority unreachable: {0}")]
    AuthorityUnreachable(String),

    /// The remote authority did not answer within the configured timeout.
    #[error("Authority request timed out")]
    AuthorityTimeout,

    /// The remote authority answered with a non-2xx status.
    #[error("Authority returned HTTP {0}")]
    AuthorityHttpError(u16),

    /// The remote authority answered 2xx with a body that is not a boolean.
    #[error("Authority returned a malformed response: {0}")]
    AuthorityMalformedResponse(String),

    /// Every attempt allowed by the retry budget failed.
    #[error("Authority retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An audit sink failed to persist an event.
    #[error("Audit sink error: {0}")]
    Audit(String),

    /// An internal error occurred (e.g. a detached evaluation task panicked).
    #[error("Internal authorization error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// True for every error produced by the token verifier.
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AuthzError::TokenMalformed
                | AuthzError::TokenSignatureInvalid
                | AuthzError::TokenExpired
                | AuthzError::TokenIssuerMismatch
                | AuthzError::TokenAudienceMismatch
                | AuthzError::TokenNoSubject
        )
    }

    /// True for authority failures that consume one retry attempt and count
    /// against the circuit breaker.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthzError::AuthorityUnreachable(_)
                | AuthzError::AuthorityTimeout
                | AuthzError::AuthorityHttpError(_)
                | AuthzError::AuthorityMalformedResponse(_)
        )
    }

    /// Short machine-readable kind, used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthzError::TokenMalformed => "token_malformed",
            AuthzError::TokenSignatureInvalid => "token_signature_invalid",
            AuthzError::TokenExpired => "token_expired",
            AuthzError::TokenIssuerMismatch => "token_issuer_mismatch",
            AuthzError::TokenAudienceMismatch => "token_audience_mismatch",
            AuthzError::TokenNoSubject => "token_no_subject",
            AuthzError::ResourceIdInvalid => "resource_id_invalid",
            AuthzError::CircuitOpen => "circuit_open",
            AuthzError::AuthorityUnreachable(_) => "authority_unreachable",
            AuthzError::AuthorityTimeout => "authority_timeout",
            AuthzError::AuthorityHttpError(_) => "authority_http_error",
            AuthzError::AuthorityMalformedResponse(_) => "authority_malformed_response",
            AuthzError::RetriesExhausted { .. } => "retries_exhausted",
            AuthzError::Configuration(_) => "configuration",
            AuthzError::Audit(_) => "audit",
            AuthzError::Internal(_) => "internal",
        }
    }
}

/// A specialized Result type for gateway operations.
pub type Result<T> = std::result::Result<T, AuthzError>;
