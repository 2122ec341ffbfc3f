#![allow(dead_code)]

use std::sync::Arc;

use crl_issuing_point::{
    audit::MemoryAuditLog,
    clock::{Clock, ManualClock},
    config::IssuingPointConfig,
    crl::{CrlExtensionConfig, CrlExtensionKind, RevocationReason, default_extensions},
    issuing_point::{Collaborators, IssuingPoint},
    repository::{
        BigUint, CertificateInfo, CertificateRecord, CertificateRepository, MemoryRepository,
        RevocationInfo,
    },
    signing::{CaIdentity, RingSigner, SigningAlgorithm},
    store::{CrlStore, MemoryCrlStore},
};
use ring::signature::{ED25519, UnparsedPublicKey};
use time::OffsetDateTime;
use time::macros::datetime;

pub const T0: OffsetDateTime = datetime!(2024-06-17 12:00 UTC);

pub const DELTA_CRL_INDICATOR: &str = "2.5.29.27";

/// A CA with in-memory collaborators and a clock that only moves when told to.
pub struct TestCa {
    pub clock: Arc<ManualClock>,
    pub repository: Arc<MemoryRepository>,
    pub store: Arc<dyn CrlStore>,
    pub signer: Arc<RingSigner>,
    pub identity: CaIdentity,
    pub audit: Arc<MemoryAuditLog>,
}

impl TestCa {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryCrlStore::new()))
    }

    pub fn with_store(store: Arc<dyn CrlStore>) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let (signer, _) = RingSigner::generate("test", SigningAlgorithm::Ed25519).unwrap();
        let identity = CaIdentity::from_common_name("Test CA", signer.public_key().as_deref());
        Self {
            repository: Arc::new(MemoryRepository::with_clock(clock.clone())),
            clock,
            store,
            signer: Arc::new(signer),
            identity,
            audit: Arc::new(MemoryAuditLog::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            repository: self.repository.clone(),
            store: self.store.clone(),
            signer: self.signer.clone(),
            identity: self.identity.clone(),
        }
    }

    pub fn issuing_point(&self, config: IssuingPointConfig) -> IssuingPoint {
        IssuingPoint::new("MasterCRL", config, self.collaborators())
            .unwrap()
            .with_clock(self.clock.clone())
            .with_audit(self.audit.clone())
    }

    pub async fn issue(&self, serial: u64) -> CertificateRecord {
        let record = leaf(serial, self.clock.now());
        self.repository.insert(record.clone()).await.unwrap();
        record
    }

    /// Issues and revokes a certificate, then reports the revocation to `ip`.
    pub async fn revoke(
        &self,
        ip: &IssuingPoint,
        serial: u64,
        reason: RevocationReason,
    ) -> CertificateRecord {
        self.issue(serial).await;
        let info = RevocationInfo::new(self.clock.now()).with_reason(reason);
        let record = self
            .repository
            .mark_revoked(&BigUint::from(serial), info, "agent")
            .await
            .unwrap();
        ip.add_revoked_cert(&record, Some(format!("req-{serial}")))
            .unwrap();
        record
    }

    /// Checks the CRL signature with the CA's current public key.
    pub fn verify(&self, der: &[u8]) {
        let (tbs, signature) = split_certificate_list(der);
        let public_key = self.signer.public_key().unwrap();
        UnparsedPublicKey::new(&ED25519, public_key)
            .verify(&tbs, &signature)
            .expect("CRL signature should verify");
    }
}

pub fn leaf(serial: u64, created_at: OffsetDateTime) -> CertificateRecord {
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
        created_at,
    )
}

/// An issuing point configuration that emits delta CRLs between full ones.
pub fn delta_config(update_schema: u32) -> IssuingPointConfig {
    let extensions = default_extensions()
        .into_iter()
        .map(|extension| match extension.kind {
            CrlExtensionKind::DeltaCrlIndicator => {
                CrlExtensionConfig::new(CrlExtensionKind::DeltaCrlIndicator)
            }
            _ => extension,
        })
        .collect();
    IssuingPointConfig {
        update_schema,
        auto_update_interval_ms: 60 * 60 * 1000,
        extensions,
        ..IssuingPointConfig::default()
    }
}

/// The fields of a generated CRL the tests look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCrl {
    pub issuer: String,
    pub this_update: i64,
    pub next_update: Option<i64>,
    pub crl_number: Option<BigUint>,
    pub base_crl_number: Option<u64>,
    pub entries: Vec<(BigUint, Option<u8>)>,
    pub extension_oids: Vec<String>,
}

pub fn parse_crl(der: &[u8]) -> ParsedCrl {
    let (rest, crl) = x509_parser::parse_x509_crl(der).expect("CRL should parse");
    assert!(rest.is_empty());

    let entries = crl
        .iter_revoked_certificates()
        .map(|revoked| {
            let reason = revoked.reason_code().map(|(_, code)| code.0);
            (revoked.serial().clone(), reason)
        })
        .collect();

    let base_crl_number = crl
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == DELTA_CRL_INDICATOR)
        .map(|ext| yasna::parse_der(ext.value, |reader| reader.read_u64()).unwrap());

    ParsedCrl {
        issuer: crl.issuer().to_string(),
        this_update: crl.last_update().timestamp(),
        next_update: crl.next_update().map(|time| time.timestamp()),
        crl_number: crl.crl_number().cloned(),
        base_crl_number,
        entries,
        extension_oids: crl
            .extensions()
            .iter()
            .map(|ext| ext.oid.to_id_string())
            .collect(),
    }
}

/// Splits a `CertificateList` into the encoded `tbsCertList` and the signature bits.
pub fn split_certificate_list(der: &[u8]) -> (Vec<u8>, Vec<u8>) {
    yasna::parse_der(der, |reader| {
        reader.read_sequence(|reader| {
            let tbs = reader.next().read_der()?;
            let _algorithm = reader.next().read_der()?;
            let (signature, _) = reader.next().read_bitvec_bytes()?;
            Ok((tbs, signature))
        })
    })
    .expect("CertificateList should decode")
}
