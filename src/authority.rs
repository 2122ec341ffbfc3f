//! Certificate authority front for CRL generation
//!
//! Several issuing points may share one revocation repository. The
//! authority commits revocation changes to the repository first, then
//! reports them to every issuing point, which decides by its own scope
//! whether the change concerns it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use x509_parser::num_bigint::BigUint;

use crate::crl::RevocationReason;
use crate::issuing_point::{IssuingPoint, IssuingPointError, IssuingPointResult};
use crate::repository::{
    CertStatus, CertificateRecord, CertificateRepository, RepositoryError, RevocationInfo,
};
use crate::scheduler::{CrlScheduler, CrlSchedulerConfig};

pub struct CrlAuthority {
    repository: Arc<dyn CertificateRepository>,
    issuing_points: BTreeMap<String, Arc<IssuingPoint>>,
    scheduler_config: CrlSchedulerConfig,
    schedulers: Mutex<Vec<(CrlScheduler, JoinHandle<()>)>>,
}

impl CrlAuthority {
    pub fn new(repository: Arc<dyn CertificateRepository>) -> Self {
        Self {
            repository,
            issuing_points: BTreeMap::new(),
            scheduler_config: CrlSchedulerConfig::default(),
            schedulers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scheduler_config(mut self, config: CrlSchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Registers an issuing point; one with the same id is replaced.
    pub fn add_issuing_point(&mut self, issuing_point: IssuingPoint) -> Arc<IssuingPoint> {
        let issuing_point = Arc::new(issuing_point);
        self.issuing_points
            .insert(issuing_point.id().to_string(), issuing_point.clone());
        issuing_point
    }

    pub fn issuing_point(&self, id: &str) -> IssuingPointResult<&Arc<IssuingPoint>> {
        self.issuing_points
            .get(id)
            .ok_or_else(|| IssuingPointError::UnknownIssuingPoint(id.to_string()))
    }

    pub fn issuing_points(&self) -> impl Iterator<Item = &Arc<IssuingPoint>> {
        self.issuing_points.values()
    }

    pub fn repository(&self) -> &Arc<dyn CertificateRepository> {
        &self.repository
    }

    /// Initializes every issuing point. Failed ones stay uninitialized and
    /// are reported after the others were tried.
    pub async fn init_all(&self) -> IssuingPointResult<()> {
        let mut first_error = None;
        for issuing_point in self.issuing_points.values() {
            if let Err(e) = issuing_point.init().await {
                error!(
                    issuing_point = %issuing_point.id(),
                    "Failed to initialize CRL issuing point: {}", e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn register_certificate(&self, record: CertificateRecord) -> IssuingPointResult<()> {
        debug!(serial = %record.serial_hex(), "Registering issued certificate");
        self.repository.insert(record).await?;
        Ok(())
    }

    /// Revokes a certificate and notifies every issuing point.
    ///
    /// Fails with [`RepositoryError::AlreadyRevoked`] if the certificate is
    /// already revoked; the stored revocation is left untouched.
    pub async fn revoke(
        &self,
        serial: &BigUint,
        info: RevocationInfo,
        revoked_by: &str,
        request_id: Option<String>,
    ) -> IssuingPointResult<CertificateRecord> {
        let record = self.repository.mark_revoked(serial, info, revoked_by).await?;
        info!(
            serial = %record.serial_hex(),
            reason = ?record.revocation_info.as_ref().and_then(RevocationInfo::reason),
            "Certificate revoked"
        );

        for issuing_point in self.issuing_points.values() {
            self.notify(issuing_point, issuing_point.add_revoked_cert(&record, request_id.clone()));
        }
        Ok(record)
    }

    /// Takes a certificate on hold off the CRL.
    ///
    /// Returns `Ok(None)` when the certificate is not revoked. Certificates
    /// revoked for any reason other than `certificateHold` are rejected.
    pub async fn unrevoke(
        &self,
        serial: &BigUint,
        request_id: Option<String>,
    ) -> IssuingPointResult<Option<CertificateRecord>> {
        let current = self
            .repository
            .get(serial)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(hex::encode(serial.to_bytes_be())))?;

        if current.status.is_revoked() {
            let reason = current
                .revocation_info
                .as_ref()
                .and_then(RevocationInfo::reason);
            if reason != Some(RevocationReason::CertificateHold) {
                return Err(IssuingPointError::UnrevokeNotAllowed(current.serial_hex()));
            }
        }

        let Some(record) = self.repository.mark_unrevoked(serial).await? else {
            debug!(serial = %current.serial_hex(), "Certificate is not revoked, nothing to do");
            return Ok(None);
        };
        info!(serial = %record.serial_hex(), "Certificate taken off hold");

        for issuing_point in self.issuing_points.values() {
            self.notify(
                issuing_point,
                issuing_point.add_unrevoked_cert(&record, request_id.clone()),
            );
        }
        Ok(Some(record))
    }

    /// Records an expiry detected outside an update cycle.
    pub async fn expire(&self, serial: &BigUint) -> IssuingPointResult<()> {
        let Some(record) = self.repository.get(serial).await? else {
            return Err(RepositoryError::NotFound(hex::encode(serial.to_bytes_be())).into());
        };
        let status = match record.status {
            CertStatus::Revoked => CertStatus::RevokedExpired,
            CertStatus::Valid => CertStatus::Expired,
            _ => return Ok(()),
        };
        self.repository.update_status(serial, status).await?;

        if status == CertStatus::RevokedExpired {
            for issuing_point in self.issuing_points.values() {
                self.notify(issuing_point, issuing_point.add_expired_cert(&record));
            }
        }
        Ok(())
    }

    /// The repository change is committed; an issuing point that cannot take
    /// the event recovers it from the repository at its next initialization.
    fn notify(&self, issuing_point: &IssuingPoint, result: IssuingPointResult<bool>) {
        match result {
            Ok(true) => debug!(issuing_point = %issuing_point.id(), "Revocation change recorded"),
            Ok(false) => {}
            Err(e) => error!(
                issuing_point = %issuing_point.id(),
                "Failed to record revocation change: {}", e
            ),
        }
    }

    /// Starts one scheduler per issuing point.
    pub async fn start_schedulers(&self) {
        let mut schedulers = self.schedulers.lock().await;
        for issuing_point in self.issuing_points.values() {
            let scheduler = CrlScheduler::new(issuing_point.clone(), self.scheduler_config.clone());
            let handle = scheduler.start();
            schedulers.push((scheduler, handle));
        }
    }

    /// Stops the schedulers and persists every issuing point.
    pub async fn shutdown(&self) -> IssuingPointResult<()> {
        let schedulers: Vec<_> = self.schedulers.lock().await.drain(..).collect();
        for (scheduler, handle) in schedulers {
            scheduler.stop();
            if let Err(e) = handle.await {
                error!("CRL scheduler task failed: {}", e);
            }
        }

        let mut first_error = None;
        for issuing_point in self.issuing_points.values() {
            if let Err(e) = issuing_point.shutdown().await {
                error!(
                    issuing_point = %issuing_point.id(),
                    "Failed to shut down CRL issuing point: {}", e
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::IssuingPointConfig;
    use crate::issuing_point::Collaborators;
    use crate::repository::{CertificateInfo, MemoryRepository};
    use crate::signing::{CaIdentity, RingSigner, SigningAlgorithm};
    use crate::store::MemoryCrlStore;
    use time::macros::datetime;

    fn authority() -> CrlAuthority {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-17 12:00 UTC)));
        let repository = Arc::new(MemoryRepository::with_clock(clock.clone()));
        let (signer, _) = RingSigner::generate("test", SigningAlgorithm::Ed25519).unwrap();
        let identity = CaIdentity::from_common_name("Test CA", signer.public_key().as_deref());
        let collaborators = Collaborators {
            repository: repository.clone(),
            store: Arc::new(MemoryCrlStore::new()),
            signer: Arc::new(signer),
            identity,
        };

        let mut authority = CrlAuthority::new(repository);
        for (id, ca_certs_only) in [("MasterCRL", false), ("CaCRL", true)] {
            let config = IssuingPointConfig {
                ca_certs_only,
                ..IssuingPointConfig::default()
            };
            let ip = IssuingPoint::new(id, config, collaborators.clone())
                .unwrap()
                .with_clock(clock.clone());
            authority.add_issuing_point(ip);
        }
        authority
    }

    fn record(serial: u32) -> CertificateRecord {
        CertificateRecord::new(
            BigUint::from(serial),
            CertificateInfo {
                subject: format!("CN=leaf {serial}"),
                issuer: "CN=Test CA".to_string(),
                not_before: datetime!(2024-01-01 0:00 UTC),
                not_after: datetime!(2030-01-01 0:00 UTC),
                is_ca: false,
                der: None,
            },
            "admin",
            datetime!(2024-06-01 0:00 UTC),
        )
    }

    #[tokio::test]
    async fn test_revocation_fans_out_by_scope() {
        let authority = authority();
        authority.init_all().await.unwrap();
        authority.register_certificate(record(0x64)).await.unwrap();

        let info = RevocationInfo::new(datetime!(2024-06-17 12:00 UTC))
            .with_reason(RevocationReason::KeyCompromise);
        authority
            .revoke(&BigUint::from(0x64u32), info.clone(), "agent", Some("req-1".into()))
            .await
            .unwrap();

        let master = authority.issuing_point("MasterCRL").unwrap();
        let entry = master.delta_cache().get(&BigUint::from(0x64u32)).unwrap();
        assert_eq!(entry.request_id.as_deref(), Some("req-1"));
        assert!(authority.issuing_point("CaCRL").unwrap().delta_cache().is_empty());

        let again = authority
            .revoke(&BigUint::from(0x64u32), info, "agent", None)
            .await;
        assert!(matches!(
            again,
            Err(IssuingPointError::Repository(RepositoryError::AlreadyRevoked(_)))
        ));
    }

    #[tokio::test]
    async fn test_unrevoke_only_for_hold() {
        let authority = authority();
        authority.init_all().await.unwrap();
        authority.register_certificate(record(1)).await.unwrap();
        authority.register_certificate(record(2)).await.unwrap();
        let now = datetime!(2024-06-17 12:00 UTC);

        authority
            .revoke(
                &BigUint::from(1u8),
                RevocationInfo::new(now).with_reason(RevocationReason::KeyCompromise),
                "agent",
                None,
            )
            .await
            .unwrap();
        assert!(matches!(
            authority.unrevoke(&BigUint::from(1u8), None).await,
            Err(IssuingPointError::UnrevokeNotAllowed(_))
        ));

        authority
            .revoke(
                &BigUint::from(2u8),
                RevocationInfo::new(now).with_reason(RevocationReason::CertificateHold),
                "agent",
                None,
            )
            .await
            .unwrap();
        let released = authority.unrevoke(&BigUint::from(2u8), None).await.unwrap();
        assert_eq!(released.unwrap().status, CertStatus::Valid);

        let master = authority.issuing_point("MasterCRL").unwrap();
        let entry = master.delta_cache().get(&BigUint::from(2u8)).unwrap();
        assert_eq!(entry.change, crate::delta_cache::DeltaChange::Unrevoked);

        // already valid: explicit no-op
        assert!(authority.unrevoke(&BigUint::from(2u8), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_issuing_point() {
        let authority = authority();
        assert!(matches!(
            authority.issuing_point("nope"),
            Err(IssuingPointError::UnknownIssuingPoint(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_stops_schedulers() {
        let authority = authority();
        authority.init_all().await.unwrap();
        authority.start_schedulers().await;
        authority.shutdown().await.unwrap();
        assert!(authority.schedulers.lock().await.is_empty());
    }
}
