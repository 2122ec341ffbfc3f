use thiserror::Error;

use super::CertStatus;

/// Revocation repository errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Certificate {0} not found")]
    NotFound(String),

    #[error("Certificate {0} already exists")]
    Duplicate(String),

    #[error("Certificate {0} is already revoked")]
    AlreadyRevoked(String),

    #[error("Invalid status transition for {serial}: {from} -> {to}")]
    InvalidTransition {
        serial: String,
        from: CertStatus,
        to: CertStatus,
    },

    #[error("Repository scan timed out after {0} ms")]
    Timeout(u64),

    #[error("Repository I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Repository backend error: {0}")]
    Backend(String),
}

/// Convenient Result type alias
pub type RepositoryResult<T> = Result<T, RepositoryError>;
