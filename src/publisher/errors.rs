use thiserror::Error;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Publishing target rejected the CRL: HTTP {0}")]
    Rejected(u16),

    #[error("Timeout while publishing CRL")]
    Timeout,

    #[error("Invalid publishing URL: {0}")]
    InvalidUrl(String),

    #[error("{publisher}: {message}")]
    Failed { publisher: String, message: String },
}
