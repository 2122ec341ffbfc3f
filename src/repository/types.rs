use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;

use crate::crl::{RevocationReason, StoredExtension};

pub const META_REQUEST_ID: &str = "requestId";
pub const META_PROFILE_ID: &str = "profileId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CertStatus {
    Valid,
    Invalid,
    Revoked,
    Expired,
    RevokedExpired,
}

impl CertStatus {
    pub fn is_revoked(self) -> bool {
        matches!(self, Self::Revoked | Self::RevokedExpired)
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
            Self::RevokedExpired => "REVOKED_EXPIRED",
        };
        f.write_str(status)
    }
}

/// Revocation date plus the CRL entry extensions recorded at revocation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationInfo {
    #[serde(with = "time::serde::rfc3339")]
    pub revocation_date: OffsetDateTime,
    #[serde(default)]
    pub crl_entry_extensions: Vec<StoredExtension>,
}

impl RevocationInfo {
    pub fn new(revocation_date: OffsetDateTime) -> Self {
        Self {
            revocation_date,
            crl_entry_extensions: Vec::new(),
        }
    }

    pub fn with_reason(mut self, reason: RevocationReason) -> Self {
        self.crl_entry_extensions.push(StoredExtension::reason(reason));
        self
    }

    pub fn with_invalidity_date(mut self, date: OffsetDateTime) -> Self {
        self.crl_entry_extensions
            .push(StoredExtension::invalidity_date(date));
        self
    }

    pub fn with_extension(mut self, extension: StoredExtension) -> Self {
        self.crl_entry_extensions.push(extension);
        self
    }

    /// The recorded reason code, `None` when absent or malformed.
    pub fn reason(&self) -> Option<RevocationReason> {
        self.crl_entry_extensions
            .iter()
            .find_map(StoredExtension::as_reason)
    }
}

/// The embedded certificate, reduced to what revocation processing needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    #[serde(default)]
    pub is_ca: bool,
    /// The full certificate (public key, extensions), when available.
    #[serde(default, with = "crate::encoding::option_base64_bytes")]
    pub der: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    #[serde(with = "crate::encoding::biguint")]
    pub serial: BigUint,
    pub status: CertStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified_at: OffsetDateTime,
    pub issued_by: String,
    pub revoked_by: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub revoked_on: Option<OffsetDateTime>,
    #[serde(default)]
    pub meta_info: BTreeMap<String, String>,
    pub certificate: CertificateInfo,
    pub revocation_info: Option<RevocationInfo>,
}

impl CertificateRecord {
    /// A freshly issued, valid certificate.
    pub fn new(
        serial: BigUint,
        certificate: CertificateInfo,
        issued_by: impl Into<String>,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            serial,
            status: CertStatus::Valid,
            created_at,
            modified_at: created_at,
            issued_by: issued_by.into(),
            revoked_by: None,
            revoked_on: None,
            meta_info: BTreeMap::new(),
            certificate,
            revocation_info: None,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta_info.insert(key.into(), value.into());
        self
    }

    pub fn request_id(&self) -> Option<&str> {
        self.meta_info.get(META_REQUEST_ID).map(String::as_str)
    }

    pub fn profile_id(&self) -> Option<&str> {
        self.meta_info.get(META_PROFILE_ID).map(String::as_str)
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(self.serial.to_bytes_be())
    }

    /// `REVOKED`/`REVOKED_EXPIRED` if and only if revocation info is present.
    pub fn is_consistent(&self) -> bool {
        self.status.is_revoked() == self.revocation_info.is_some()
            && self.status.is_revoked() == self.revoked_on.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_revocation_info_reason() {
        let info = RevocationInfo::new(datetime!(2024-06-17 0:00 UTC))
            .with_invalidity_date(datetime!(2024-06-01 0:00 UTC))
            .with_reason(RevocationReason::CertificateHold);
        assert_eq!(info.reason(), Some(RevocationReason::CertificateHold));
        assert_eq!(RevocationInfo::new(datetime!(2024-06-17 0:00 UTC)).reason(), None);
    }

    #[test]
    fn test_record_json_round_trip() {
        let record = CertificateRecord::new(
            BigUint::from(0x64u32),
            CertificateInfo {
                subject: "CN=leaf".to_string(),
                issuer: "CN=Test CA".to_string(),
                not_before: datetime!(2024-01-01 0:00 UTC),
                not_after: datetime!(2025-01-01 0:00 UTC),
                is_ca: false,
                der: None,
            },
            "admin",
            datetime!(2024-01-01 0:00 UTC),
        )
        .with_meta(META_REQUEST_ID, "42");

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""serial":"100""#));
        assert!(json.contains(r#""status":"VALID""#));
        let decoded: CertificateRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.request_id(), Some("42"));
        assert!(decoded.is_consistent());
    }
}
