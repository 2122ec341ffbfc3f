//! CRL number allocation.
//!
//! Full and delta CRLs draw from one sequence (RFC 5280 §5.2.3): every
//! allocation returns the larger of the two persisted counters and moves
//! both past it. A number is handed out only after the advanced counter has
//! been persisted, so a crash can at worst skip a number, never reuse one.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use x509_parser::num_bigint::BigUint;

use crate::store::{CounterKind, CrlStore, IssuingPointRecord, StoreResult};

#[derive(Debug)]
struct Counters {
    next_full: BigUint,
    next_delta: BigUint,
}

impl Counters {
    fn next(&self) -> BigUint {
        (&self.next_full).max(&self.next_delta).clone()
    }

    fn slot(&mut self, counter: CounterKind) -> &mut BigUint {
        match counter {
            CounterKind::Full => &mut self.next_full,
            CounterKind::Delta => &mut self.next_delta,
        }
    }
}

pub struct CrlNumberAllocator {
    issuing_point: String,
    store: Arc<dyn CrlStore>,
    counters: Mutex<Counters>,
}

impl CrlNumberAllocator {
    /// Resumes from the counters of a persisted record.
    pub fn new(store: Arc<dyn CrlStore>, record: &IssuingPointRecord) -> Self {
        Self {
            issuing_point: record.id.clone(),
            store,
            counters: Mutex::new(Counters {
                next_full: record.next_crl_number.clone(),
                next_delta: record.next_delta_crl_number.clone(),
            }),
        }
    }

    pub async fn next_crl_number(&self) -> StoreResult<BigUint> {
        self.allocate(CounterKind::Full).await
    }

    pub async fn next_delta_crl_number(&self) -> StoreResult<BigUint> {
        self.allocate(CounterKind::Delta).await
    }

    /// The number the next allocation will return, whatever its kind.
    pub async fn peek(&self) -> BigUint {
        self.counters.lock().await.next()
    }

    async fn allocate(&self, counter: CounterKind) -> StoreResult<BigUint> {
        let mut counters = self.counters.lock().await;

        let allocated = counters.next();
        let advanced = &allocated + 1u8;
        self.store
            .reserve_number(&self.issuing_point, counter, &advanced)
            .await?;
        *counters.slot(counter) = advanced.clone();

        // the allocated counter is durable, the other one only catches up
        let other = match counter {
            CounterKind::Full => CounterKind::Delta,
            CounterKind::Delta => CounterKind::Full,
        };
        match self
            .store
            .reserve_number(&self.issuing_point, other, &advanced)
            .await
        {
            Ok(()) => *counters.slot(other) = advanced,
            Err(e) => warn!(
                issuing_point = %self.issuing_point,
                counter = ?other,
                "Failed to advance CRL counter: {}",
                e
            ),
        }

        debug!(
            issuing_point = %self.issuing_point,
            counter = ?counter,
            number = %allocated,
            "Allocated CRL number"
        );
        Ok(allocated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryCrlStore, StoreError};
    use async_trait::async_trait;
    use mockall::mock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        Store {}

        #[async_trait]
        impl CrlStore for Store {
            async fn load(&self, issuing_point: &str) -> StoreResult<Option<IssuingPointRecord>>;
            async fn save(&self, record: &IssuingPointRecord) -> StoreResult<()>;
            async fn reserve_number(
                &self,
                issuing_point: &str,
                counter: CounterKind,
                next: &BigUint,
            ) -> StoreResult<()>;
        }
    }

    #[tokio::test]
    async fn test_numbers_increase_and_persist() {
        let store = Arc::new(MemoryCrlStore::new());
        let record = IssuingPointRecord::new("MasterCRL");
        let allocator = CrlNumberAllocator::new(store.clone(), &record);

        assert_eq!(allocator.next_crl_number().await.unwrap(), BigUint::from(1u8));
        assert_eq!(allocator.next_crl_number().await.unwrap(), BigUint::from(2u8));
        assert_eq!(allocator.next_delta_crl_number().await.unwrap(), BigUint::from(3u8));

        let persisted = store.load("MasterCRL").await.unwrap().unwrap();
        assert_eq!(persisted.next_crl_number, BigUint::from(4u8));
        assert_eq!(persisted.next_delta_crl_number, BigUint::from(4u8));

        // a restarted allocator resumes after the persisted numbers
        let resumed = CrlNumberAllocator::new(store, &persisted);
        assert_eq!(resumed.next_crl_number().await.unwrap(), BigUint::from(4u8));
    }

    #[tokio::test]
    async fn test_full_and_delta_share_one_sequence() {
        let store = Arc::new(MemoryCrlStore::new());
        let mut record = IssuingPointRecord::new("MasterCRL");
        // counters persisted before both kinds shared a sequence
        record.next_crl_number = BigUint::from(4u8);
        record.next_delta_crl_number = BigUint::from(2u8);
        let allocator = CrlNumberAllocator::new(store, &record);

        let base = allocator.next_crl_number().await.unwrap();
        let delta = allocator.next_delta_crl_number().await.unwrap();
        let next_base = allocator.next_crl_number().await.unwrap();

        assert_eq!(base, BigUint::from(4u8));
        assert!(delta > base);
        assert!(next_base > delta);
        assert_eq!(allocator.peek().await, BigUint::from(7u8));
    }

    #[tokio::test]
    async fn test_failed_persist_does_not_consume() {
        let attempts = AtomicUsize::new(0);
        let mut store = MockStore::new();
        store.expect_reserve_number().returning(move |_, _, _| {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StoreError::Unavailable("disk full".to_string()))
            } else {
                Ok(())
            }
        });

        let allocator = CrlNumberAllocator::new(Arc::new(store), &IssuingPointRecord::new("MasterCRL"));

        assert!(allocator.next_crl_number().await.is_err());
        assert_eq!(allocator.peek().await, BigUint::from(1u8));
        assert_eq!(allocator.next_crl_number().await.unwrap(), BigUint::from(1u8));
    }
}
