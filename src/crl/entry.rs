//! CRL entry extensions (RFC 5280 §5.3).
//!
//! Revocation records carry their entry extensions in stored, already
//! DER-encoded form. Before they are emitted into a CRL they are filtered
//! down to the kinds an issuing point is configured for, and each value is
//! checked to be well formed. Malformed values are skipped, never fatal.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, warn};
use x509_parser::num_bigint::BigUint;
use yasna::models::ObjectIdentifier;

use super::der::{Extension, RevokedEntry, write_generalized_time};
use super::oid;
use super::reason::RevocationReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryExtensionKind {
    CrlReason,
    InvalidityDate,
    HoldInstruction,
    CertificateIssuer,
}

impl EntryExtensionKind {
    pub fn oid(self) -> &'static [u64] {
        match self {
            Self::CrlReason => oid::CRL_REASON,
            Self::InvalidityDate => oid::INVALIDITY_DATE,
            Self::HoldInstruction => oid::HOLD_INSTRUCTION_CODE,
            Self::CertificateIssuer => oid::CERTIFICATE_ISSUER,
        }
    }

    pub fn from_oid(arcs: &[u64]) -> Option<Self> {
        [
            Self::CrlReason,
            Self::InvalidityDate,
            Self::HoldInstruction,
            Self::CertificateIssuer,
        ]
        .into_iter()
        .find(|kind| kind.oid() == arcs)
    }

    /// Checks that `value` is a well-formed encoding for this kind.
    fn validate(self, value: &[u8]) -> Result<(), String> {
        match self {
            Self::CrlReason => {
                let code = yasna::parse_der(value, |reader| reader.read_enum())
                    .map_err(|e| format!("reason code is not an ENUMERATED: {e}"))?;
                RevocationReason::from_code(code)
                    .map(|_| ())
                    .ok_or_else(|| format!("reason code {code} is not defined"))
            }
            Self::InvalidityDate => yasna::parse_der(value, |reader| reader.read_generalized_time())
                .map(|_| ())
                .map_err(|e| format!("invalidity date is not a GeneralizedTime: {e}")),
            Self::HoldInstruction => yasna::parse_der(value, |reader| reader.read_oid())
                .map(|_| ())
                .map_err(|e| format!("hold instruction is not an OID: {e}")),
            Self::CertificateIssuer => yasna::parse_der(value, |reader| reader.read_der())
                .map(|_| ())
                .map_err(|e| format!("certificate issuer is not valid DER: {e}")),
        }
    }
}

/// An entry extension as persisted with a revocation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredExtension {
    /// Dotted decimal OID.
    pub oid: String,
    #[serde(default)]
    pub critical: bool,
    /// DER encoding of the extension value.
    #[serde(with = "crate::encoding::base64_bytes")]
    pub value: Vec<u8>,
}

impl StoredExtension {
    pub fn reason(reason: RevocationReason) -> Self {
        Self {
            oid: oid::to_dotted(oid::CRL_REASON),
            critical: false,
            value: yasna::construct_der(|writer| writer.write_enum(reason.code())),
        }
    }

    pub fn invalidity_date(date: OffsetDateTime) -> Self {
        Self {
            oid: oid::to_dotted(oid::INVALIDITY_DATE),
            critical: false,
            value: yasna::construct_der(|writer| write_generalized_time(writer, date)),
        }
    }

    pub fn hold_instruction(instruction: &[u64]) -> Self {
        Self {
            oid: oid::to_dotted(oid::HOLD_INSTRUCTION_CODE),
            critical: false,
            value: yasna::construct_der(|writer| {
                writer.write_oid(&ObjectIdentifier::from_slice(instruction))
            }),
        }
    }

    pub fn kind(&self) -> Option<EntryExtensionKind> {
        oid::parse_dotted(&self.oid).and_then(|arcs| EntryExtensionKind::from_oid(&arcs))
    }

    /// Decodes the value as a reason code, if this is a well-formed reason extension.
    pub fn as_reason(&self) -> Option<RevocationReason> {
        if self.kind()? != EntryExtensionKind::CrlReason {
            return None;
        }
        yasna::parse_der(&self.value, |reader| reader.read_enum())
            .ok()
            .and_then(RevocationReason::from_code)
    }
}

/// Restricts stored entry extensions to the configured subset.
#[derive(Debug, Clone)]
pub struct EntryExtensionFilter {
    allowed: Vec<EntryExtensionKind>,
}

impl Default for EntryExtensionFilter {
    fn default() -> Self {
        Self::new(vec![
            EntryExtensionKind::CrlReason,
            EntryExtensionKind::InvalidityDate,
        ])
    }
}

impl EntryExtensionFilter {
    pub fn new(allowed: Vec<EntryExtensionKind>) -> Self {
        Self { allowed }
    }

    pub fn allows(&self, kind: EntryExtensionKind) -> bool {
        self.allowed.contains(&kind)
    }

    pub fn filter(&self, serial: &BigUint, stored: &[StoredExtension]) -> Vec<Extension> {
        let mut emitted: Vec<Extension> = Vec::with_capacity(stored.len());

        for extension in stored {
            let Some(kind) = extension.kind() else {
                debug!(
                    serial = %hex::encode(serial.to_bytes_be()),
                    oid = %extension.oid,
                    "Dropping unsupported CRL entry extension"
                );
                continue;
            };

            if !self.allows(kind) {
                continue;
            }

            if emitted.iter().any(|e| e.oid == kind.oid()) {
                warn!(
                    serial = %hex::encode(serial.to_bytes_be()),
                    oid = %extension.oid,
                    "Duplicate CRL entry extension, keeping the first one"
                );
                continue;
            }

            if let Err(reason) = kind.validate(&extension.value) {
                warn!(
                    serial = %hex::encode(serial.to_bytes_be()),
                    oid = %extension.oid,
                    "Skipping malformed CRL entry extension: {}",
                    reason
                );
                continue;
            }

            // unspecified is expressed by leaving the reason code out
            if extension.as_reason() == Some(RevocationReason::Unspecified) {
                continue;
            }

            emitted.push(Extension::new(kind.oid(), extension.critical, extension.value.clone()));
        }

        emitted
    }

    pub fn entry(
        &self,
        serial: &BigUint,
        revocation_date: OffsetDateTime,
        stored: &[StoredExtension],
    ) -> RevokedEntry {
        RevokedEntry {
            serial: serial.clone(),
            revocation_date,
            extensions: self.filter(serial, stored),
        }
    }
}

/// A delta CRL entry telling relying parties to drop `serial` from their base CRL.
pub fn remove_from_crl_entry(serial: &BigUint, date: OffsetDateTime) -> RevokedEntry {
    let reason = StoredExtension::reason(RevocationReason::RemoveFromCrl);
    RevokedEntry {
        serial: serial.clone(),
        revocation_date: date,
        extensions: vec![Extension::new(oid::CRL_REASON, false, reason.value)],
    }
}
