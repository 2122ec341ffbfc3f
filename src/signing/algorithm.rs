use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::SigningError;
use crate::crl::oid;

/// CRL signature algorithms, named the way CA administrators configure them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SigningAlgorithm {
    Sha256WithRsa,
    Sha384WithRsa,
    Sha512WithRsa,
    Sha256WithEc,
    Sha384WithEc,
    Ed25519,
}

impl SigningAlgorithm {
    pub const ALL: [SigningAlgorithm; 6] = [
        Self::Sha256WithRsa,
        Self::Sha384WithRsa,
        Self::Sha512WithRsa,
        Self::Sha256WithEc,
        Self::Sha384WithEc,
        Self::Ed25519,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sha256WithRsa => "SHA256withRSA",
            Self::Sha384WithRsa => "SHA384withRSA",
            Self::Sha512WithRsa => "SHA512withRSA",
            Self::Sha256WithEc => "SHA256withEC",
            Self::Sha384WithEc => "SHA384withEC",
            Self::Ed25519 => "Ed25519",
        }
    }

    pub fn oid(self) -> &'static [u64] {
        match self {
            Self::Sha256WithRsa => oid::SHA256_WITH_RSA,
            Self::Sha384WithRsa => oid::SHA384_WITH_RSA,
            Self::Sha512WithRsa => oid::SHA512_WITH_RSA,
            Self::Sha256WithEc => oid::ECDSA_WITH_SHA256,
            Self::Sha384WithEc => oid::ECDSA_WITH_SHA384,
            Self::Ed25519 => oid::ED25519,
        }
    }

    /// RSA algorithm identifiers carry an explicit NULL parameter, the others none.
    pub fn has_null_parameters(self) -> bool {
        matches!(
            self,
            Self::Sha256WithRsa | Self::Sha384WithRsa | Self::Sha512WithRsa
        )
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = SigningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| SigningError::UnknownAlgorithm(s.to_string()))
    }
}

impl TryFrom<String> for SigningAlgorithm {
    type Error = SigningError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SigningAlgorithm> for String {
    fn from(value: SigningAlgorithm) -> Self {
        value.name().to_string()
    }
}
