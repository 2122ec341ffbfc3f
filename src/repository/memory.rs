use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;

use super::{
    CertStatus, CertificateRecord, CertificateRepository, RecordQuery, RepositoryError,
    RepositoryResult, RevocationInfo,
};
use crate::clock::{Clock, SystemClock};

fn serial_hex(serial: &BigUint) -> String {
    hex::encode(serial.to_bytes_be())
}

/// In-memory repository.
///
/// Each mutation happens under the map shard lock of its serial, so
/// concurrent readers never observe a half-written record.
#[derive(Debug, Clone)]
pub struct MemoryRepository {
    records: Arc<DashMap<BigUint, CertificateRecord>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }
}

#[async_trait]
impl CertificateRepository for MemoryRepository {
    async fn insert(&self, record: CertificateRecord) -> RepositoryResult<()> {
        match self.records.entry(record.serial.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Duplicate(serial_hex(&record.serial))),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get(&self, serial: &BigUint) -> RepositoryResult<Option<CertificateRecord>> {
        Ok(self.records.get(serial).map(|r| r.value().clone()))
    }

    async fn find(&self, query: &RecordQuery) -> RepositoryResult<Vec<CertificateRecord>> {
        let mut found: Vec<CertificateRecord> = self
            .records
            .iter()
            .filter(|r| query.matches(r.value()))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(found)
    }

    async fn mark_revoked(
        &self,
        serial: &BigUint,
        info: RevocationInfo,
        revoked_by: &str,
    ) -> RepositoryResult<CertificateRecord> {
        let now = self.now();
        let mut record = self
            .records
            .get_mut(serial)
            .ok_or_else(|| RepositoryError::NotFound(serial_hex(serial)))?;

        if record.status.is_revoked() {
            return Err(RepositoryError::AlreadyRevoked(serial_hex(serial)));
        }
        if record.status == CertStatus::Invalid {
            return Err(RepositoryError::InvalidTransition {
                serial: serial_hex(serial),
                from: record.status,
                to: CertStatus::Revoked,
            });
        }

        record.status = if record.status == CertStatus::Expired {
            CertStatus::RevokedExpired
        } else {
            CertStatus::Revoked
        };
        record.revoked_by = Some(revoked_by.to_string());
        record.revoked_on = Some(now);
        record.revocation_info = Some(info);
        record.modified_at = now;

        Ok(record.value().clone())
    }

    async fn mark_unrevoked(&self, serial: &BigUint) -> RepositoryResult<Option<CertificateRecord>> {
        let now = self.now();
        let mut record = self
            .records
            .get_mut(serial)
            .ok_or_else(|| RepositoryError::NotFound(serial_hex(serial)))?;

        let restored = match record.status {
            CertStatus::Revoked => CertStatus::Valid,
            CertStatus::RevokedExpired => CertStatus::Expired,
            _ => return Ok(None),
        };

        record.status = restored;
        record.revoked_by = None;
        record.revoked_on = None;
        record.revocation_info = None;
        record.modified_at = now;

        Ok(Some(record.value().clone()))
    }

    async fn update_status(&self, serial: &BigUint, status: CertStatus) -> RepositoryResult<()> {
        let now = self.now();
        let mut record = self
            .records
            .get_mut(serial)
            .ok_or_else(|| RepositoryError::NotFound(serial_hex(serial)))?;

        let allowed = matches!(
            (record.status, status),
            (CertStatus::Valid, CertStatus::Expired)
                | (CertStatus::Expired, CertStatus::Valid)
                | (CertStatus::Revoked, CertStatus::RevokedExpired)
        );
        if !allowed {
            return Err(RepositoryError::InvalidTransition {
                serial: serial_hex(serial),
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        record.modified_at = now;
        Ok(())
    }

    async fn purge_range(&self, from: &BigUint, to: &BigUint) -> RepositoryResult<usize> {
        let before = self.records.len();
        self.records.retain(|serial, _| serial < from || serial > to);
        Ok(before - self.records.len())
    }
}
