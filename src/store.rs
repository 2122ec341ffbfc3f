//! Durable issuing point state.
//!
//! CRL counters, timestamps and the last generated CRLs are kept per issuing
//! point so a restart resumes from the last *persisted* numbers.

mod errors;
mod file;
mod memory;
mod record;

pub use errors::{StoreError, StoreResult};
pub use file::FileCrlStore;
pub use memory::MemoryCrlStore;
pub use record::{CounterKind, IssuingPointRecord};

use async_trait::async_trait;
use x509_parser::num_bigint::BigUint;

#[async_trait]
pub trait CrlStore: Send + Sync {
    async fn load(&self, issuing_point: &str) -> StoreResult<Option<IssuingPointRecord>>;

    async fn save(&self, record: &IssuingPointRecord) -> StoreResult<()>;

    /// Durably advances the next value of one counter.
    ///
    /// Must not return before the new value is persisted; callers treat
    /// success as the commit point of a number allocation.
    async fn reserve_number(
        &self,
        issuing_point: &str,
        counter: CounterKind,
        next: &BigUint,
    ) -> StoreResult<()>;
}
