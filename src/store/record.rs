use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use x509_parser::num_bigint::BigUint;

use crate::signing::SigningAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterKind {
    Full,
    Delta,
}

/// Persisted state of one issuing point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuingPointRecord {
    pub id: String,

    /// Number of the last full CRL, absent until one has been generated.
    #[serde(default, with = "crate::encoding::option_biguint")]
    pub crl_number: Option<BigUint>,
    #[serde(with = "crate::encoding::biguint")]
    pub next_crl_number: BigUint,
    #[serde(default, with = "crate::encoding::option_biguint")]
    pub delta_crl_number: Option<BigUint>,
    #[serde(with = "crate::encoding::biguint")]
    pub next_delta_crl_number: BigUint,

    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_update: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub next_update: Option<OffsetDateTime>,
    /// thisUpdate of the last full CRL.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_full_update: Option<OffsetDateTime>,
    #[serde(default)]
    pub updates_since_full: u32,
    #[serde(default)]
    pub signing_algorithm: Option<SigningAlgorithm>,

    #[serde(default, with = "crate::encoding::option_base64_bytes")]
    pub full_crl: Option<Vec<u8>>,
    #[serde(default, with = "crate::encoding::option_base64_bytes")]
    pub delta_crl: Option<Vec<u8>>,
}

impl IssuingPointRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            crl_number: None,
            next_crl_number: BigUint::from(1u8),
            delta_crl_number: None,
            next_delta_crl_number: BigUint::from(1u8),
            last_update: None,
            next_update: None,
            last_full_update: None,
            updates_since_full: 0,
            signing_algorithm: None,
            full_crl: None,
            delta_crl: None,
        }
    }

    pub fn counter(&self, counter: CounterKind) -> &BigUint {
        match counter {
            CounterKind::Full => &self.next_crl_number,
            CounterKind::Delta => &self.next_delta_crl_number,
        }
    }

    /// Raises a counter. Returns `false` if `next` is not above the current value.
    pub fn advance(&mut self, counter: CounterKind, next: &BigUint) -> bool {
        let slot = match counter {
            CounterKind::Full => &mut self.next_crl_number,
            CounterKind::Delta => &mut self.next_delta_crl_number,
        };
        if next <= slot {
            return false;
        }
        *slot = next.clone();
        true
    }

    /// Takes the persisted counters of `other` where they are ahead.
    ///
    /// Reservations may have been persisted after this snapshot was taken;
    /// a save must never roll them back.
    pub fn merge_counters(&mut self, other: &IssuingPointRecord) {
        if other.next_crl_number > self.next_crl_number {
            self.next_crl_number = other.next_crl_number.clone();
        }
        if other.next_delta_crl_number > self.next_delta_crl_number {
            self.next_delta_crl_number = other.next_delta_crl_number.clone();
        }
    }
}
