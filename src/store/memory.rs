use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use x509_parser::num_bigint::BigUint;

use super::{CounterKind, CrlStore, IssuingPointRecord, StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryCrlStore {
    records: Arc<DashMap<String, IssuingPointRecord>>,
}

impl MemoryCrlStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CrlStore for MemoryCrlStore {
    async fn load(&self, issuing_point: &str) -> StoreResult<Option<IssuingPointRecord>> {
        Ok(self.records.get(issuing_point).map(|r| r.value().clone()))
    }

    async fn save(&self, record: &IssuingPointRecord) -> StoreResult<()> {
        let mut merged = record.clone();
        if let Some(existing) = self.records.get(&record.id) {
            merged.merge_counters(existing.value());
        }
        self.records.insert(record.id.clone(), merged);
        Ok(())
    }

    async fn reserve_number(
        &self,
        issuing_point: &str,
        counter: CounterKind,
        next: &BigUint,
    ) -> StoreResult<()> {
        let mut entry = self
            .records
            .entry(issuing_point.to_string())
            .or_insert_with(|| IssuingPointRecord::new(issuing_point));
        if !entry.advance(counter, next) {
            return Err(StoreError::CounterRegression {
                issuing_point: issuing_point.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_keeps_reserved_counters() {
        let store = MemoryCrlStore::new();
        let stale = IssuingPointRecord::new("MasterCRL");

        store
            .reserve_number("MasterCRL", CounterKind::Full, &BigUint::from(5u8))
            .await
            .unwrap();
        store.save(&stale).await.unwrap();

        let loaded = store.load("MasterCRL").await.unwrap().unwrap();
        assert_eq!(loaded.next_crl_number, BigUint::from(5u8));
    }

    #[tokio::test]
    async fn test_reserve_rejects_regression() {
        let store = MemoryCrlStore::new();
        store
            .reserve_number("MasterCRL", CounterKind::Delta, &BigUint::from(3u8))
            .await
            .unwrap();
        let result = store
            .reserve_number("MasterCRL", CounterKind::Delta, &BigUint::from(2u8))
            .await;
        assert!(matches!(result, Err(StoreError::CounterRegression { .. })));
    }
}
