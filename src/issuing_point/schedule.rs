//! Update time arithmetic.

use chrono::{DateTime, Utc};
use time::{Duration, OffsetDateTime};

use super::state::CrlKind;
use crate::config::{ConfigurationError, IssuingPointConfig};

fn to_duration(duration: std::time::Duration) -> Duration {
    Duration::try_from(duration).unwrap_or(Duration::MAX)
}

/// When updates happen and how far ahead a CRL's nextUpdate points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSchedule {
    interval: Option<Duration>,
    daily: Vec<(u32, u32)>,
    min_interval: Duration,
    grace_period: Duration,
    update_schema: u32,
}

impl UpdateSchedule {
    pub fn from_config(config: &IssuingPointConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            interval: config.auto_update_interval().map(to_duration),
            daily: config.daily_times()?,
            min_interval: to_duration(config.min_update_interval()),
            grace_period: to_duration(config.next_update_grace_period()),
            update_schema: config.update_schema.max(1),
        })
    }

    /// The next scheduled update after `from`: the earliest of the interval
    /// target and the next daily update time. `None` when nothing is scheduled.
    pub fn next_update(&self, from: OffsetDateTime) -> Option<OffsetDateTime> {
        let by_interval = self.interval.map(|interval| from.saturating_add(interval));
        let by_daily = self.next_daily(from);
        match (by_interval, by_daily) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether `now` is too close to the last update for an automatic one.
    pub fn throttled(&self, now: OffsetDateTime, last_update: Option<OffsetDateTime>) -> bool {
        last_update.is_some_and(|last| now - last < self.min_interval)
    }

    /// The earliest instant an automatic update may follow `last_update`.
    pub fn not_before(&self, last_update: Option<OffsetDateTime>) -> Option<OffsetDateTime> {
        last_update.map(|last| last.saturating_add(self.min_interval))
    }

    /// The nextUpdate field of a CRL generated at `this_update`.
    ///
    /// A full CRL that deltas are issued against stays valid until the next
    /// scheduled full CRL.
    pub fn crl_next_update(
        &self,
        this_update: OffsetDateTime,
        kind: CrlKind,
        deltas_enabled: bool,
    ) -> Option<OffsetDateTime> {
        let updates = match kind {
            CrlKind::Full if deltas_enabled => self.update_schema,
            _ => 1,
        };
        let mut next = this_update;
        for _ in 0..updates {
            next = self.next_update(next)?;
        }
        Some(next.saturating_add(self.grace_period))
    }

    /// Whether the update after `updates_since_full` deltas is a full CRL.
    pub fn full_due(&self, updates_since_full: u32) -> bool {
        updates_since_full.saturating_add(1) >= self.update_schema
    }

    fn next_daily(&self, from: OffsetDateTime) -> Option<OffsetDateTime> {
        let from = DateTime::<Utc>::from_timestamp(from.unix_timestamp(), from.nanosecond())?;
        self.daily
            .iter()
            .filter_map(|&(hour, minute)| next_run_time(from, hour, minute))
            .min()
            .and_then(|next| OffsetDateTime::from_unix_timestamp(next.timestamp()).ok())
    }
}

/// The first `hour:minute` strictly after `from`.
fn next_run_time(from: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let mut next_run = from.date_naive().and_hms_opt(hour, minute, 0)?.and_utc();
    while next_run <= from {
        next_run += chrono::Duration::days(1);
    }
    Some(next_run)
}
