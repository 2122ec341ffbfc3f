use thiserror::Error;

use super::SigningAlgorithm;

/// Errors raised by the signing collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Unknown signing algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Signing algorithm {0} is not supported by the signing key")]
    UnsupportedAlgorithm(SigningAlgorithm),

    #[error("Signing key rejected: {0}")]
    KeyRejected(String),

    #[error("Invalid CA certificate: {0}")]
    InvalidCertificate(String),

    #[error("Signature generation failed: {0}")]
    Failed(String),
}
