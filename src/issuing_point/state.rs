use std::fmt;

use time::OffsetDateTime;
use uuid::Uuid;
use x509_parser::num_bigint::BigUint;

use crate::signing::SigningAlgorithm;

/// Where the update state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Generating,
    Publishing,
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Idle => "DONE",
            Self::Generating => "UPDATE_STARTED",
            Self::Publishing => "PUBLISHING_STARTED",
        };
        f.write_str(phase)
    }
}

/// Outcome of the most recent generation or publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateStatus {
    #[default]
    NotInitialized,
    NotAttempted,
    Success,
    Error,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotInitialized => "CRL_IP_NOT_INITIALIZED",
            Self::NotAttempted => "not_attempted",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrlKind {
    Full,
    Delta,
}

impl fmt::Display for CrlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Delta => f.write_str("delta"),
        }
    }
}

/// A manual update queued for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualRequest {
    pub algorithm: Option<SigningAlgorithm>,
}

/// Runtime state of an issuing point, as exposed to administrators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuingPointState {
    pub initialized: bool,
    pub enabled: bool,
    pub generation_enabled: bool,
    pub phase: UpdatePhase,

    pub crl_number: Option<BigUint>,
    pub delta_crl_number: Option<BigUint>,
    pub next_crl_number: Option<BigUint>,
    pub next_delta_crl_number: Option<BigUint>,

    pub last_update: Option<OffsetDateTime>,
    pub next_update: Option<OffsetDateTime>,
    /// thisUpdate of the full CRL the current delta CRLs are based on.
    pub last_full_update: Option<OffsetDateTime>,
    pub updates_since_full: u32,
    pub last_signing_algorithm: Option<SigningAlgorithm>,

    /// Set by revocation driven triggers, consumed by the next cycle.
    pub update_pending: bool,
    pub manual_request: Option<ManualRequest>,
    /// The next generation must be a full CRL.
    pub force_full: bool,

    pub update_status: UpdateStatus,
    pub update_error: Option<String>,
    pub publish_status: UpdateStatus,
    pub publish_error: Option<String>,

    pub full_crl: Option<Vec<u8>>,
    pub delta_crl: Option<Vec<u8>>,
    pub full_crl_size: usize,
    pub delta_crl_size: usize,
    pub delta_cache_size: usize,
}

/// What one update cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub kind: CrlKind,
    /// The number allocated for this cycle, even if signing failed afterwards.
    pub crl_number: Option<BigUint>,
    pub this_update: OffsetDateTime,
    pub next_update: Option<OffsetDateTime>,
    pub entries: usize,
    pub update_status: UpdateStatus,
    pub update_error: Option<String>,
    pub publish_status: UpdateStatus,
    pub publish_error: Option<String>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.update_status == UpdateStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// A cycle ran; its report tells whether generation and publishing succeeded.
    Completed(CycleReport),
    /// Another cycle holds the update lock and will cover this trigger.
    Skipped,
    /// A delta was due but nothing changed since the base CRL.
    Unchanged,
    NotDue,
}
