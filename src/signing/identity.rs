use ring::digest::{SHA1_FOR_LEGACY_USE_ONLY, digest};
use x509_parser::extensions::ParsedExtension;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::{FromDer, X509Certificate};

use super::SigningError;
use crate::crl::der;

/// The parts of the CA certificate a CRL is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaIdentity {
    /// DER encoded subject `Name`, written as the CRL issuer.
    pub subject: Vec<u8>,
    /// Key identifier written into the authority key identifier extension.
    pub key_identifier: Option<Vec<u8>>,
}

impl CaIdentity {
    pub fn new(subject: Vec<u8>, key_identifier: Option<Vec<u8>>) -> Self {
        Self {
            subject,
            key_identifier,
        }
    }

    /// Builds an identity from a bare common name, deriving the key identifier
    /// from the public key (RFC 5280 §4.2.1.2, method 1) when one is provided.
    pub fn from_common_name(cn: &str, public_key: Option<&[u8]>) -> Self {
        Self {
            subject: der::common_name(cn),
            key_identifier: public_key.map(key_identifier_for),
        }
    }

    pub fn from_certificate_der(der_bytes: &[u8]) -> Result<Self, SigningError> {
        let (_, cert) = X509Certificate::from_der(der_bytes)
            .map_err(|e| SigningError::InvalidCertificate(e.to_string()))?;

        let subject_key_identifier = cert.extensions().iter().find_map(|ext| {
            match ext.parsed_extension() {
                ParsedExtension::SubjectKeyIdentifier(kid) => Some(kid.0.to_vec()),
                _ => None,
            }
        });

        let key_identifier = subject_key_identifier.unwrap_or_else(|| {
            let spki = cert.public_key();
            let bits: &[u8] = &spki.subject_public_key.data;
            key_identifier_for(bits)
        });

        Ok(Self {
            subject: cert.subject().as_raw().to_vec(),
            key_identifier: Some(key_identifier),
        })
    }

    /// Accepts either a PEM (`CERTIFICATE`) or a DER encoded certificate.
    pub fn from_certificate_bytes(bytes: &[u8]) -> Result<Self, SigningError> {
        match parse_x509_pem(bytes) {
            Ok((_, pem)) => Self::from_certificate_der(&pem.contents),
            Err(_) => Self::from_certificate_der(bytes),
        }
    }
}

fn key_identifier_for(public_key: &[u8]) -> Vec<u8> {
    digest(&SHA1_FOR_LEGACY_USE_ONLY, public_key).as_ref().to_vec()
}
