//! DER encoding of `CertificateList` structures (RFC 5280 §5.1).

use time::{OffsetDateTime, UtcOffset};
use x509_parser::num_bigint::BigUint;
use yasna::models::{GeneralizedTime, ObjectIdentifier, UTCTime};
use yasna::{DERWriter, Tag};

use crate::signing::SigningAlgorithm;

/// An encoded X.509 extension, ready to be written into a CRL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub oid: &'static [u64],
    pub critical: bool,
    /// DER encoding of the value carried inside `extnValue`.
    pub value: Vec<u8>,
}

impl Extension {
    pub fn new(oid: &'static [u64], critical: bool, value: Vec<u8>) -> Self {
        Self {
            oid,
            critical,
            value,
        }
    }

    fn write_der(&self, writer: DERWriter) {
        writer.write_sequence(|writer| {
            writer
                .next()
                .write_oid(&ObjectIdentifier::from_slice(self.oid));
            // critical BOOLEAN DEFAULT FALSE, so only the TRUE value is encoded
            if self.critical {
                writer.next().write_bool(true);
            }
            writer.next().write_bytes(&self.value);
        })
    }
}

/// One entry of the `revokedCertificates` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevokedEntry {
    pub serial: BigUint,
    pub revocation_date: OffsetDateTime,
    pub extensions: Vec<Extension>,
}

impl RevokedEntry {
    fn write_der(&self, writer: DERWriter) {
        writer.write_sequence(|writer| {
            writer
                .next()
                .write_bigint_bytes(&self.serial.to_bytes_be(), true);
            write_time(writer.next(), self.revocation_date);
            if !self.extensions.is_empty() {
                writer.next().write_sequence(|writer| {
                    for extension in &self.extensions {
                        extension.write_der(writer.next());
                    }
                });
            }
        })
    }
}

/// The to-be-signed portion of a CRL.
#[derive(Debug, Clone)]
pub struct TbsCertList<'a> {
    pub algorithm: SigningAlgorithm,
    /// DER encoded issuer `Name`.
    pub issuer: &'a [u8],
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
    pub revoked: &'a [RevokedEntry],
    pub extensions: &'a [Extension],
}

impl TbsCertList<'_> {
    pub fn to_der(&self) -> Vec<u8> {
        yasna::construct_der(|writer| {
            writer.write_sequence(|writer| {
                // v2, required as soon as any extension is present
                writer.next().write_u8(1);
                write_algorithm_identifier(writer.next(), self.algorithm);
                writer.next().write_der(self.issuer);
                write_time(writer.next(), self.this_update);
                if let Some(next_update) = self.next_update {
                    write_time(writer.next(), next_update);
                }
                // revokedCertificates must be absent when empty
                if !self.revoked.is_empty() {
                    writer.next().write_sequence(|writer| {
                        for entry in self.revoked {
                            entry.write_der(writer.next());
                        }
                    });
                }
                if !self.extensions.is_empty() {
                    writer.next().write_tagged(Tag::context(0), |writer| {
                        writer.write_sequence(|writer| {
                            for extension in self.extensions {
                                extension.write_der(writer.next());
                            }
                        });
                    });
                }
            })
        })
    }
}

/// Wraps a signed `tbsCertList` into the outer `CertificateList`.
pub fn certificate_list(tbs_der: &[u8], algorithm: SigningAlgorithm, signature: &[u8]) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_der(tbs_der);
            write_algorithm_identifier(writer.next(), algorithm);
            writer
                .next()
                .write_bitvec_bytes(signature, signature.len() * 8);
        })
    })
}

pub(crate) fn write_algorithm_identifier(writer: DERWriter, algorithm: SigningAlgorithm) {
    writer.write_sequence(|writer| {
        writer
            .next()
            .write_oid(&ObjectIdentifier::from_slice(algorithm.oid()));
        if algorithm.has_null_parameters() {
            writer.next().write_null();
        }
    })
}

/// UTCTime up to 2049, GeneralizedTime outside of that window (RFC 5280 §5.1.2.4).
pub(crate) fn write_time(writer: DERWriter, dt: OffsetDateTime) {
    let dt = strip_subseconds(dt);
    if (1950..2050).contains(&dt.year()) {
        writer.write_utctime(&UTCTime::from_datetime(dt));
    } else {
        writer.write_generalized_time(&GeneralizedTime::from_datetime(dt));
    }
}

pub(crate) fn write_generalized_time(writer: DERWriter, dt: OffsetDateTime) {
    writer.write_generalized_time(&GeneralizedTime::from_datetime(strip_subseconds(dt)));
}

/// Encodes a DER `Name` holding a single common name.
pub fn common_name(cn: &str) -> Vec<u8> {
    yasna::construct_der(|writer| {
        writer.write_sequence(|writer| {
            writer.next().write_set(|writer| {
                writer.next().write_sequence(|writer| {
                    writer
                        .next()
                        .write_oid(&ObjectIdentifier::from_slice(super::oid::COMMON_NAME));
                    writer.next().write_utf8_string(cn);
                });
            });
        })
    })
}

fn strip_subseconds(dt: OffsetDateTime) -> OffsetDateTime {
    let dt = dt.to_offset(UtcOffset::UTC);
    dt.replace_nanosecond(0).unwrap_or(dt)
}
