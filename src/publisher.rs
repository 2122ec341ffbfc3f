//! CRL publishing
//!
//! Publishers push generated CRL bytes to their destinations. They may be
//! invoked repeatedly with the same publication and must tolerate it.

mod errors;
mod file;
mod http;

pub use errors::PublishError;
pub use file::FilePublisher;
pub use http::HttpPublisher;

use async_trait::async_trait;
use time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;

/// A signed CRL ready to be pushed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrlPublication {
    pub issuing_point: String,
    pub der: Vec<u8>,
    pub is_delta: bool,
    pub crl_number: BigUint,
    pub this_update: OffsetDateTime,
}

#[async_trait]
pub trait CrlPublisher: Send + Sync {
    /// Short name used in logs and publish error strings.
    fn name(&self) -> &str;

    async fn publish(&self, publication: &CrlPublication) -> Result<(), PublishError>;
}
