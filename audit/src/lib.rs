//! Tamper-evident audit log for the access gateway.
//!
//! [`SecureLogger`] appends every [`authz::AuditEvent`] to a JSON-lines file.
//! Each entry carries the SHA-256 hash of its predecessor, so editing or
//! deleting a line breaks the chain and is caught by
//! [`SecureLogger::verify_log_chain`].

pub mod error;
pub mod secure_log;

pub use error::{AuditError, Result};
pub use secure_log::{ChainReport, SecureLogConfig, SecureLogEntry, SecureLogger};
