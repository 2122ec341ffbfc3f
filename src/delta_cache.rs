//! Changes accumulated since the last full CRL.
//!
//! Every revocation, unrevocation or expiry observed by an issuing point is
//! recorded here keyed by serial number; the latest change for a serial
//! wins. Delta CRLs are cumulative, so reading for a delta never clears the
//! cache. Only a completed full CRL consumes it through
//! [`DeltaCache::snapshot_and_clear`].

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::debug;
use x509_parser::num_bigint::BigUint;

use crate::clock::{Clock, SystemClock};
use crate::repository::RevocationInfo;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaChange {
    Revoked(RevocationInfo),
    Unrevoked,
    Expired,
}

impl DeltaChange {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Revoked(_) => "revoked",
            Self::Unrevoked => "unrevoked",
            Self::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaCacheEntry {
    pub serial: BigUint,
    pub change: DeltaChange,
    pub request_id: Option<String>,
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug)]
pub struct DeltaCache {
    entries: DashMap<BigUint, DeltaCacheEntry>,
    // writers share it, snapshot_and_clear takes it exclusively
    barrier: RwLock<()>,
    clock: Arc<dyn Clock>,
}

impl Default for DeltaCache {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl DeltaCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            barrier: RwLock::new(()),
            clock,
        }
    }

    pub fn record_revoked(&self, serial: BigUint, info: RevocationInfo, request_id: Option<String>) {
        self.record(serial, DeltaChange::Revoked(info), request_id);
    }

    pub fn record_unrevoked(&self, serial: BigUint, request_id: Option<String>) {
        self.record(serial, DeltaChange::Unrevoked, request_id);
    }

    pub fn record_expired(&self, serial: BigUint) {
        self.record(serial, DeltaChange::Expired, None);
    }

    fn record(&self, serial: BigUint, change: DeltaChange, request_id: Option<String>) {
        let _shared = self.barrier.read().unwrap_or_else(PoisonError::into_inner);

        debug!(
            serial = %hex::encode(serial.to_bytes_be()),
            change = change.kind(),
            "Recording delta cache change"
        );
        let entry = DeltaCacheEntry {
            serial: serial.clone(),
            change,
            request_id,
            recorded_at: self.clock.now(),
        };
        self.entries.insert(serial, entry);
    }

    /// Returns every pending change, ordered by serial, and empties the cache.
    pub fn snapshot_and_clear(&self) -> Vec<DeltaCacheEntry> {
        let _exclusive = self.barrier.write().unwrap_or_else(PoisonError::into_inner);

        let serials: Vec<BigUint> = self.entries.iter().map(|e| e.key().clone()).collect();
        let mut snapshot: Vec<DeltaCacheEntry> = serials
            .iter()
            .filter_map(|serial| self.entries.remove(serial).map(|(_, entry)| entry))
            .collect();
        snapshot.sort_by(|a, b| a.serial.cmp(&b.serial));
        snapshot
    }

    /// Puts back entries taken by a snapshot whose CRL was never produced.
    ///
    /// Changes recorded since the snapshot are newer and win.
    pub fn restore(&self, entries: Vec<DeltaCacheEntry>) {
        let _shared = self.barrier.read().unwrap_or_else(PoisonError::into_inner);
        for entry in entries {
            self.entries.entry(entry.serial.clone()).or_insert(entry);
        }
    }

    /// Non-destructive read of the pending changes, ordered by serial.
    pub fn peek_for_delta_crl(&self) -> Vec<DeltaCacheEntry> {
        let mut entries: Vec<DeltaCacheEntry> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));
        entries
    }

    pub fn get(&self, serial: &BigUint) -> Option<DeltaCacheEntry> {
        self.entries.get(serial).map(|e| e.value().clone())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&self) {
        let _exclusive = self.barrier.write().unwrap_or_else(PoisonError::into_inner);
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::crl::RevocationReason;
    use time::macros::datetime;

    fn cache() -> DeltaCache {
        DeltaCache::new(Arc::new(ManualClock::new(datetime!(2024-06-17 12:00 UTC))))
    }

    fn revocation() -> RevocationInfo {
        RevocationInfo::new(datetime!(2024-06-17 11:00 UTC))
            .with_reason(RevocationReason::KeyCompromise)
    }

    #[test]
    fn test_latest_change_wins() {
        let cache = cache();
        let serial = BigUint::from(0x64u32);

        cache.record_revoked(serial.clone(), revocation(), Some("7".to_string()));
        cache.record_unrevoked(serial.clone(), Some("8".to_string()));

        assert_eq!(cache.len(), 1);
        let entry = cache.get(&serial).unwrap();
        assert_eq!(entry.change, DeltaChange::Unrevoked);
        assert_eq!(entry.request_id.as_deref(), Some("8"));
    }

    #[test]
    fn test_snapshot_and_clear_twice() {
        let cache = cache();
        for serial in [9u32, 3, 5] {
            cache.record_revoked(BigUint::from(serial), revocation(), None);
        }
        cache.record_expired(BigUint::from(4u32));

        let first = cache.snapshot_and_clear();
        let serials: Vec<BigUint> = first.iter().map(|e| e.serial.clone()).collect();
        let expected: Vec<BigUint> = [3u32, 4, 5, 9].into_iter().map(BigUint::from).collect();
        assert_eq!(serials, expected);

        assert!(cache.snapshot_and_clear().is_empty());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_restore_keeps_newer_changes() {
        let cache = cache();
        cache.record_revoked(BigUint::from(1u8), revocation(), None);
        cache.record_revoked(BigUint::from(2u8), revocation(), None);
        let snapshot = cache.snapshot_and_clear();

        cache.record_unrevoked(BigUint::from(2u8), None);
        cache.restore(snapshot);

        assert_eq!(cache.len(), 2);
        assert!(matches!(
            cache.get(&BigUint::from(1u8)).unwrap().change,
            DeltaChange::Revoked(_)
        ));
        assert_eq!(
            cache.get(&BigUint::from(2u8)).unwrap().change,
            DeltaChange::Unrevoked
        );
    }

    #[test]
    fn test_peek_does_not_clear() {
        let cache = cache();
        cache.record_expired(BigUint::from(1u8));

        assert_eq!(cache.peek_for_delta_crl().len(), 1);
        assert_eq!(cache.peek_for_delta_crl().len(), 1);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_concurrent_writers_and_snapshot() {
        let cache = Arc::new(cache());
        let writers: Vec<_> = (0..4u32)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..250u32 {
                        cache.record_expired(BigUint::from(t * 1000 + i));
                    }
                })
            })
            .collect();

        let mut collected = Vec::new();
        for _ in 0..10 {
            collected.extend(cache.snapshot_and_clear());
        }
        for writer in writers {
            writer.join().unwrap();
        }
        collected.extend(cache.snapshot_and_clear());

        collected.sort_by(|a, b| a.serial.cmp(&b.serial));
        collected.dedup_by(|a, b| a.serial == b.serial);
        assert_eq!(collected.len(), 1000);
    }
}
