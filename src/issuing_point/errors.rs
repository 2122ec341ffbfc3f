use thiserror::Error;

use crate::config::ConfigurationError;
use crate::publisher::PublishError;
use crate::repository::RepositoryError;
use crate::signing::SigningError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IssuingPointError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Publishing error: {0}")]
    Publish(#[from] PublishError),

    #[error("Issuing point store error: {0}")]
    Store(#[from] StoreError),

    #[error("Another CRL update is in progress")]
    ConcurrencyConflict,

    #[error("CRL issuing point {0} is not initialized")]
    NotInitialized(String),

    #[error("CRL issuing point {0} is disabled")]
    Disabled(String),

    #[error("Certificate {0} is not on hold and cannot be taken off the CRL")]
    UnrevokeNotAllowed(String),

    #[error("Unknown CRL issuing point: {0}")]
    UnknownIssuingPoint(String),

    #[error("No CRL has been generated yet")]
    NothingToPublish,
}

pub type IssuingPointResult<T> = Result<T, IssuingPointError>;
