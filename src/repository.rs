//! Revocation repository
//!
//! Durable store of certificate records and their revocation state. The
//! repository may be shared by several issuing points, so every
//! implementation must be safe under arbitrary interleaving, and every
//! mutation must be atomic per serial number.

mod errors;
mod memory;
mod query;
mod types;

pub use errors::{RepositoryError, RepositoryResult};
pub use memory::MemoryRepository;
pub use query::RecordQuery;
pub use types::{
    CertStatus, CertificateInfo, CertificateRecord, META_PROFILE_ID, META_REQUEST_ID,
    RevocationInfo,
};
pub use x509_parser::num_bigint::BigUint;

use async_trait::async_trait;

/// Abstract interface for certificate record storage backends.
#[async_trait]
pub trait CertificateRepository: Send + Sync {
    /// Adds a newly issued certificate.
    async fn insert(&self, record: CertificateRecord) -> RepositoryResult<()>;

    async fn get(&self, serial: &BigUint) -> RepositoryResult<Option<CertificateRecord>>;

    /// Returns all records matching `query`, in increasing serial number order.
    async fn find(&self, query: &RecordQuery) -> RepositoryResult<Vec<CertificateRecord>>;

    /// Fails with [`RepositoryError::NotFound`] for unknown serials and
    /// [`RepositoryError::AlreadyRevoked`] if the certificate is already
    /// `REVOKED` or `REVOKED_EXPIRED`.
    async fn mark_revoked(
        &self,
        serial: &BigUint,
        info: RevocationInfo,
        revoked_by: &str,
    ) -> RepositoryResult<CertificateRecord>;

    /// Takes a certificate off the revocation list.
    ///
    /// Returns `Ok(None)` without touching the record when the certificate is
    /// not currently revoked.
    async fn mark_unrevoked(&self, serial: &BigUint) -> RepositoryResult<Option<CertificateRecord>>;

    /// Time driven transitions: `VALID <-> EXPIRED` and `REVOKED -> REVOKED_EXPIRED`.
    async fn update_status(&self, serial: &BigUint, status: CertStatus) -> RepositoryResult<()>;

    /// Administrative purge of the inclusive serial range. Returns the number of removed records.
    async fn purge_range(&self, from: &BigUint, to: &BigUint) -> RepositoryResult<usize>;
}
