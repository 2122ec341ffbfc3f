use time::OffsetDateTime;

use super::{CertStatus, CertificateRecord};

/// Range query predicate. Unset fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub statuses: Vec<CertStatus>,
    /// Records whose certificate expires strictly before this instant.
    pub not_after_before: Option<OffsetDateTime>,
    /// Records whose certificate expires at or after this instant.
    pub not_after_from: Option<OffsetDateTime>,
    /// "Not yet published": modified strictly after this instant.
    pub modified_after: Option<OffsetDateTime>,
    pub ca_certs_only: bool,
    pub profile_ids: Vec<String>,
}

impl RecordQuery {
    pub fn with_status(statuses: &[CertStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn expired_before(mut self, instant: OffsetDateTime) -> Self {
        self.not_after_before = Some(instant);
        self
    }

    pub fn valid_at(mut self, instant: OffsetDateTime) -> Self {
        self.not_after_from = Some(instant);
        self
    }

    pub fn modified_after(mut self, instant: OffsetDateTime) -> Self {
        self.modified_after = Some(instant);
        self
    }

    pub fn ca_certs_only(mut self, enabled: bool) -> Self {
        self.ca_certs_only = enabled;
        self
    }

    pub fn profiles(mut self, profile_ids: &[String]) -> Self {
        self.profile_ids = profile_ids.to_vec();
        self
    }

    pub fn matches(&self, record: &CertificateRecord) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if let Some(limit) = self.not_after_before
            && record.certificate.not_after >= limit
        {
            return false;
        }
        if let Some(limit) = self.not_after_from
            && record.certificate.not_after < limit
        {
            return false;
        }
        if let Some(since) = self.modified_after
            && record.modified_at <= since
        {
            return false;
        }
        if self.ca_certs_only && !record.certificate.is_ca {
            return false;
        }
        if !self.profile_ids.is_empty() {
            return record
                .profile_id()
                .is_some_and(|id| self.profile_ids.iter().any(|p| p == id));
        }
        true
    }
}
