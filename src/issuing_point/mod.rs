//! CRL issuing point
//!
//! An issuing point owns a delta cache, a CRL number allocator and the
//! update state machine:
//!
//! ```text
//!            trigger                success                 done
//!   Idle ───────────► Generating ───────────► Publishing ───────────► Idle
//!                         │ failure
//!                         └───────────────────────────────────────────► Idle
//! ```
//!
//! A single update lock is held across generation and publishing. Automatic
//! triggers never wait for it: they report [`UpdateOutcome::Skipped`] and
//! leave the work to the cycle in flight. Manual updates wait a bounded
//! time and observe the in-flight cycle's result.
//!
//! Generation failures (repository, store, signing) are recorded in the
//! update status fields and never escape to the caller driving the cycle.
//! Publishing failures are recorded separately and do not undo generation.

mod cycle;
mod errors;
mod schedule;
mod state;

pub use errors::{IssuingPointError, IssuingPointResult};
pub use schedule::UpdateSchedule;
pub use state::{
    CrlKind, CycleReport, IssuingPointState, ManualRequest, UpdateOutcome, UpdatePhase,
    UpdateStatus,
};

use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};
use x509_parser::num_bigint::BigUint;

use crate::audit::{AuditEvent, AuditLevel, AuditLog, TracingAuditLog};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigurationError, IssuingPointConfig};
use crate::crl::{EntryExtensionFilter, ExtensionBuilder};
use crate::delta_cache::DeltaCache;
use crate::numbers::CrlNumberAllocator;
use crate::publisher::CrlPublisher;
use crate::repository::{
    CertStatus, CertificateRecord, CertificateRepository, RecordQuery, RepositoryError,
};
use crate::signing::{CaIdentity, CrlSigner, SigningAlgorithm, SigningError};
use crate::store::{CrlStore, IssuingPointRecord};

/// The collaborators every issuing point needs.
#[derive(Clone)]
pub struct Collaborators {
    pub repository: Arc<dyn CertificateRepository>,
    pub store: Arc<dyn CrlStore>,
    pub signer: Arc<dyn CrlSigner>,
    pub identity: CaIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Scheduled,
    Manual(Option<SigningAlgorithm>),
}

pub struct IssuingPoint {
    id: String,
    config: IssuingPointConfig,
    schedule: UpdateSchedule,
    default_algorithm: Option<SigningAlgorithm>,
    extensions: ExtensionBuilder,
    entry_filter: EntryExtensionFilter,

    repository: Arc<dyn CertificateRepository>,
    store: Arc<dyn CrlStore>,
    signer: Arc<dyn CrlSigner>,
    identity: CaIdentity,
    publishers: Vec<Arc<dyn CrlPublisher>>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,

    delta_cache: DeltaCache,
    numbers: OnceLock<CrlNumberAllocator>,
    state: RwLock<IssuingPointState>,
    update_lock: Mutex<()>,
    cycles: watch::Sender<Option<CycleReport>>,
    wakeup: Notify,
}

impl IssuingPoint {
    /// Validates `config`; a rejected configuration never yields an issuing point.
    pub fn new(
        id: impl Into<String>,
        config: IssuingPointConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        let schedule = UpdateSchedule::from_config(&config)?;
        let default_algorithm = config.signing_algorithm()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let state = IssuingPointState {
            enabled: config.enabled,
            generation_enabled: config.enable_crl_updates,
            ..IssuingPointState::default()
        };
        let (cycles, _) = watch::channel(None);

        Ok(Self {
            id: id.into(),
            extensions: ExtensionBuilder::new(config.extensions.clone()),
            entry_filter: EntryExtensionFilter::new(config.entry_extensions.clone()),
            config,
            schedule,
            default_algorithm,
            repository: collaborators.repository,
            store: collaborators.store,
            signer: collaborators.signer,
            identity: collaborators.identity,
            publishers: Vec::new(),
            audit: Arc::new(TracingAuditLog),
            delta_cache: DeltaCache::new(clock.clone()),
            clock,
            numbers: OnceLock::new(),
            state: RwLock::new(state),
            update_lock: Mutex::new(()),
            cycles,
            wakeup: Notify::new(),
        })
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn CrlPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.delta_cache = DeltaCache::new(clock.clone());
        self.clock = clock;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &IssuingPointConfig {
        &self.config
    }

    pub fn delta_cache(&self) -> &DeltaCache {
        &self.delta_cache
    }

    pub(crate) fn wakeup(&self) -> &Notify {
        &self.wakeup
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, IssuingPointState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, IssuingPointState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn audit(&self, level: AuditLevel, event: &'static str, message: impl Into<String>) {
        self.audit
            .record(AuditEvent::new(level, self.id.clone(), event, message));
    }

    fn numbers(&self) -> IssuingPointResult<&CrlNumberAllocator> {
        self.numbers
            .get()
            .ok_or_else(|| IssuingPointError::NotInitialized(self.id.clone()))
    }

    fn ensure_initialized(&self) -> IssuingPointResult<()> {
        if self.read_state().initialized {
            Ok(())
        } else {
            Err(IssuingPointError::NotInitialized(self.id.clone()))
        }
    }

    fn ensure_enabled(&self) -> IssuingPointResult<()> {
        let state = self.read_state();
        if !state.initialized {
            return Err(IssuingPointError::NotInitialized(self.id.clone()));
        }
        if !state.enabled {
            return Err(IssuingPointError::Disabled(self.id.clone()));
        }
        Ok(())
    }

    fn ensure_supported(&self, algorithm: Option<SigningAlgorithm>) -> IssuingPointResult<()> {
        match algorithm {
            Some(algorithm) if !self.signer.supports(algorithm) => {
                Err(SigningError::UnsupportedAlgorithm(algorithm).into())
            }
            _ => Ok(()),
        }
    }

    /// Restricts a query to the certificates this issuing point covers.
    fn scope_query(&self, query: RecordQuery) -> RecordQuery {
        let profiles: &[String] = if self.config.profile_certs_only {
            &self.config.profile_list
        } else {
            &[]
        };
        query
            .ca_certs_only(self.config.ca_certs_only)
            .profiles(profiles)
    }

    fn in_scope(&self, record: &CertificateRecord) -> bool {
        self.scope_query(RecordQuery::default()).matches(record)
    }

    async fn scan(&self, query: &RecordQuery) -> Result<Vec<CertificateRecord>, RepositoryError> {
        let limit = self.config.scan_timeout();
        match timeout(limit, self.repository.find(query)).await {
            Ok(result) => result,
            Err(_) => Err(RepositoryError::Timeout(self.config.scan_timeout_ms)),
        }
    }

    /// Loads the persisted state and replays unpublished changes into the delta cache.
    ///
    /// On failure the issuing point stays uninitialized and may be initialized again.
    pub async fn init(&self) -> IssuingPointResult<()> {
        let _guard = self.update_lock.lock().await;
        if self.read_state().initialized {
            return Ok(());
        }

        let record = match self.store.load(&self.id).await? {
            Some(record) => record,
            None => IssuingPointRecord::new(self.id.clone()),
        };

        if self.config.enable_cache_recovery
            && let Some(since) = record.last_full_update
        {
            self.recover_cache(since).await?;
        }

        let numbers = CrlNumberAllocator::new(self.store.clone(), &record);
        let next_crl_number = numbers.peek().await;
        let next_delta_crl_number = next_crl_number.clone();
        // init runs under the update lock, so the cell is still empty
        let _ = self.numbers.set(numbers);

        let now = self.clock.now();
        {
            let mut state = self.write_state();
            state.initialized = true;
            state.crl_number = record.crl_number.clone();
            state.delta_crl_number = record.delta_crl_number.clone();
            state.next_crl_number = Some(next_crl_number);
            state.next_delta_crl_number = Some(next_delta_crl_number);
            state.last_update = record.last_update;
            state.next_update = record.next_update.or_else(|| self.schedule.next_update(now));
            state.last_full_update = record.last_full_update;
            state.updates_since_full = record.updates_since_full;
            state.last_signing_algorithm = record.signing_algorithm;
            state.update_pending = record.crl_number.is_none() || self.config.publish_on_start;
            state.update_status = UpdateStatus::NotAttempted;
            state.publish_status = UpdateStatus::NotAttempted;
            state.full_crl = record.full_crl;
            state.delta_crl = record.delta_crl;
        }

        info!(
            issuing_point = %self.id,
            crl_number = ?record.crl_number,
            recovered = self.delta_cache.len(),
            "CRL issuing point initialized"
        );
        self.audit(AuditLevel::Info, "CRL_IP_INIT", "CRL issuing point initialized");
        Ok(())
    }

    async fn recover_cache(&self, since: OffsetDateTime) -> IssuingPointResult<()> {
        let query = self.scope_query(RecordQuery::default().modified_after(since));
        let records = self.scan(&query).await?;

        for record in records {
            let request_id = record.request_id().map(str::to_string);
            match (record.status, record.revocation_info) {
                (CertStatus::Revoked, Some(info)) => {
                    self.delta_cache.record_revoked(record.serial, info, request_id);
                }
                (CertStatus::RevokedExpired, Some(info)) if self.config.include_expired_certs => {
                    self.delta_cache.record_revoked(record.serial, info, request_id);
                }
                (CertStatus::RevokedExpired, _) => self.delta_cache.record_expired(record.serial),
                // modified after issuance while valid: taken off hold
                (CertStatus::Valid, None) if record.modified_at > record.created_at => {
                    self.delta_cache.record_unrevoked(record.serial, request_id);
                }
                _ => {}
            }
        }
        debug!(
            issuing_point = %self.id,
            entries = self.delta_cache.len(),
            "Recovered delta cache"
        );
        Ok(())
    }

    /// Records a revocation already committed to the repository.
    ///
    /// Returns `false` when the certificate is outside this issuing point's scope.
    pub fn add_revoked_cert(
        &self,
        record: &CertificateRecord,
        request_id: Option<String>,
    ) -> IssuingPointResult<bool> {
        self.ensure_initialized()?;
        if !self.in_scope(record) {
            return Ok(false);
        }
        let Some(info) = record.revocation_info.clone() else {
            warn!(
                issuing_point = %self.id,
                serial = %record.serial_hex(),
                "Revoked record carries no revocation info"
            );
            return Ok(false);
        };
        self.delta_cache
            .record_revoked(record.serial.clone(), info, request_id);
        self.after_change();
        Ok(true)
    }

    pub fn add_unrevoked_cert(
        &self,
        record: &CertificateRecord,
        request_id: Option<String>,
    ) -> IssuingPointResult<bool> {
        self.ensure_initialized()?;
        if !self.in_scope(record) {
            return Ok(false);
        }
        self.delta_cache
            .record_unrevoked(record.serial.clone(), request_id);
        self.after_change();
        Ok(true)
    }

    /// Records that a revoked certificate expired and drops off the CRL.
    pub fn add_expired_cert(&self, record: &CertificateRecord) -> IssuingPointResult<bool> {
        self.ensure_initialized()?;
        // expired certificates stay listed, nothing changes
        if self.config.include_expired_certs || !self.in_scope(record) {
            return Ok(false);
        }
        self.delta_cache.record_expired(record.serial.clone());
        self.after_change();
        Ok(true)
    }

    fn after_change(&self) {
        if self.config.always_update {
            self.write_state().update_pending = true;
            self.wakeup.notify_one();
        }
    }

    /// Runs an update cycle if one is due.
    ///
    /// Due means a queued manual request, or (with automatic updates
    /// enabled) the scheduled time passed or a revocation driven trigger,
    /// in both cases only once the minimum update interval has elapsed.
    pub async fn tick(&self) -> IssuingPointResult<UpdateOutcome> {
        let now = self.clock.now();
        let trigger = {
            let state = self.read_state();
            if !state.initialized {
                return Err(IssuingPointError::NotInitialized(self.id.clone()));
            }
            if !state.enabled {
                return Ok(UpdateOutcome::NotDue);
            }
            match state.manual_request {
                Some(request) => Trigger::Manual(request.algorithm),
                None => {
                    let scheduled = state.next_update.is_some_and(|next| now >= next);
                    if !state.generation_enabled
                        || !(scheduled || state.update_pending)
                        || self.schedule.throttled(now, state.last_update)
                    {
                        return Ok(UpdateOutcome::NotDue);
                    }
                    Trigger::Scheduled
                }
            }
        };

        let Ok(guard) = self.update_lock.try_lock() else {
            debug!(issuing_point = %self.id, "CRL update already in progress, skipping trigger");
            return Ok(UpdateOutcome::Skipped);
        };
        // a request queued since the check above is consumed by this cycle
        let trigger = match self.write_state().manual_request.take() {
            Some(request) => Trigger::Manual(request.algorithm),
            None => trigger,
        };
        Ok(self.run_cycle(guard, trigger).await)
    }

    /// When the scheduler should next call [`IssuingPoint::tick`].
    pub fn next_check(&self) -> Option<OffsetDateTime> {
        let now = self.clock.now();
        let state = self.read_state();
        if !state.initialized || !state.enabled {
            return None;
        }
        if state.manual_request.is_some() {
            return Some(now);
        }
        if !state.generation_enabled {
            return None;
        }
        let due = if state.update_pending {
            Some(now)
        } else {
            state.next_update
        }?;
        Some(match self.schedule.not_before(state.last_update) {
            Some(earliest) => due.max(earliest),
            None => due,
        })
    }

    /// Generates and publishes a full CRL now.
    ///
    /// If the update lock is held, waits up to `manual_update_wait_ms`:
    /// a full cycle finishing in the meantime is returned as is, otherwise
    /// the lock is taken as soon as it is released.
    pub async fn update_crl_now(
        &self,
        algorithm: Option<SigningAlgorithm>,
    ) -> IssuingPointResult<CycleReport> {
        self.ensure_enabled()?;
        self.ensure_supported(algorithm)?;

        let mut cycles = self.cycles.subscribe();
        let deadline = Instant::now() + self.config.manual_update_wait();
        loop {
            // a finished cycle is announced before its lock is released, so
            // observing it takes precedence over starting another one
            tokio::select! {
                biased;

                changed = cycles.changed() => {
                    if changed.is_err() {
                        return Err(IssuingPointError::ConcurrencyConflict);
                    }
                    let report = cycles.borrow_and_update().clone();
                    if let Some(report) = report
                        && report.kind == CrlKind::Full
                    {
                        debug!(issuing_point = %self.id, "Observed the CRL update in progress");
                        return Ok(report);
                    }
                }
                acquired = timeout_at(deadline, self.update_lock.lock()) => {
                    let Ok(guard) = acquired else {
                        return Err(IssuingPointError::ConcurrencyConflict);
                    };
                    return Ok(self.execute(guard, CrlKind::Full, algorithm).await);
                }
            }
        }
    }

    /// Queues a full CRL update for the scheduler and returns immediately.
    pub fn schedule_manual_update(
        &self,
        algorithm: Option<SigningAlgorithm>,
    ) -> IssuingPointResult<()> {
        self.ensure_enabled()?;
        self.ensure_supported(algorithm)?;
        self.write_state().manual_request = Some(ManualRequest { algorithm });
        self.wakeup.notify_one();
        info!(issuing_point = %self.id, "Manual CRL update scheduled");
        Ok(())
    }

    pub fn enable(&self) {
        self.write_state().enabled = true;
        self.wakeup.notify_one();
        self.audit(AuditLevel::Info, "CRL_IP_ENABLED", "CRL issuing point enabled");
    }

    pub fn disable(&self) {
        self.write_state().enabled = false;
        self.audit(AuditLevel::Info, "CRL_IP_DISABLED", "CRL issuing point disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.read_state().enabled
    }

    /// Turns automatic generation on or off; manual updates stay available.
    pub fn set_generation_enabled(&self, enabled: bool) {
        self.write_state().generation_enabled = enabled;
        self.wakeup.notify_one();
    }

    pub fn crl_update_status(&self) -> UpdateStatus {
        let state = self.read_state();
        if state.initialized {
            state.update_status
        } else {
            UpdateStatus::NotInitialized
        }
    }

    pub fn crl_update_error(&self) -> Option<String> {
        self.read_state().update_error.clone()
    }

    pub fn crl_publish_status(&self) -> UpdateStatus {
        let state = self.read_state();
        if state.initialized {
            state.publish_status
        } else {
            UpdateStatus::NotInitialized
        }
    }

    pub fn crl_publish_error(&self) -> Option<String> {
        self.read_state().publish_error.clone()
    }

    pub fn crl_number(&self) -> Option<BigUint> {
        self.read_state().crl_number.clone()
    }

    pub fn delta_crl_number(&self) -> Option<BigUint> {
        self.read_state().delta_crl_number.clone()
    }

    /// The last generated full CRL, DER encoded.
    pub fn full_crl(&self) -> Option<Vec<u8>> {
        self.read_state().full_crl.clone()
    }

    pub fn delta_crl(&self) -> Option<Vec<u8>> {
        self.read_state().delta_crl.clone()
    }

    /// Drops the cached CRLs and pending delta changes; the next cycle rebuilds a full CRL.
    pub fn clear_crl_cache(&self) {
        self.delta_cache.clear();
        let mut state = self.write_state();
        state.full_crl = None;
        state.delta_crl = None;
        state.full_crl_size = 0;
        state.delta_crl_size = 0;
        state.force_full = true;
        info!(issuing_point = %self.id, "CRL cache cleared");
    }

    /// Drops pending delta changes; deltas resume after the next full CRL.
    pub fn clear_delta_crl_cache(&self) {
        self.delta_cache.clear();
        let mut state = self.write_state();
        state.delta_crl = None;
        state.delta_crl_size = 0;
        state.force_full = true;
        info!(issuing_point = %self.id, "Delta CRL cache cleared");
    }

    pub fn snapshot(&self) -> IssuingPointState {
        let mut state = self.read_state().clone();
        state.delta_cache_size = self.delta_cache.len();
        state
    }

    /// Waits for any cycle in flight, then persists the state and stops automatic updates.
    pub async fn shutdown(&self) -> IssuingPointResult<()> {
        let _guard = self.update_lock.lock().await;
        if !self.read_state().initialized {
            return Ok(());
        }
        self.write_state().generation_enabled = false;
        self.persist().await?;
        info!(issuing_point = %self.id, "CRL issuing point shut down");
        Ok(())
    }

    async fn persist(&self) -> IssuingPointResult<()> {
        let numbers = self.numbers()?;
        let next_crl_number = numbers.peek().await;
        let next_delta_crl_number = next_crl_number.clone();

        let record = {
            let state = self.read_state();
            IssuingPointRecord {
                id: self.id.clone(),
                crl_number: state.crl_number.clone(),
                next_crl_number,
                delta_crl_number: state.delta_crl_number.clone(),
                next_delta_crl_number,
                last_update: state.last_update,
                next_update: state.next_update,
                last_full_update: state.last_full_update,
                updates_since_full: state.updates_since_full,
                signing_algorithm: state.last_signing_algorithm,
                full_crl: state.full_crl.clone(),
                delta_crl: state.delta_crl.clone(),
            }
        };
        self.store.save(&record).await?;
        Ok(())
    }
}
