use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Hash verification failed at line {line}")]
    HashVerificationFailed { line: usize },

    #[error("Backup file not found: {0}")]
    BackupNotFound(PathBuf),

    #[error("Audit write task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, AuditError>;

impl From<AuditError> for authz::AuthzError {
    fn from(e: AuditError) -> Self {
        authz::AuthzError::Audit(e.to_string())
    }
}
