use time::OffsetDateTime;
use tokio::sync::MutexGuard;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;
use x509_parser::num_bigint::BigUint;

use super::{
    CrlKind, CycleReport, IssuingPoint, IssuingPointError, IssuingPointResult, Trigger,
    UpdateOutcome, UpdatePhase, UpdateStatus,
};
use crate::audit::AuditLevel;
use crate::crl::{ExtensionContext, RevokedEntry, TbsCertList, certificate_list, remove_from_crl_entry};
use crate::delta_cache::DeltaChange;
use crate::publisher::CrlPublication;
use crate::repository::{CertStatus, RecordQuery, RepositoryError};
use crate::signing::SigningAlgorithm;

/// A signed CRL not yet published.
struct GeneratedCrl {
    kind: CrlKind,
    number: BigUint,
    der: Vec<u8>,
    next_update: Option<OffsetDateTime>,
    entries: usize,
    algorithm: SigningAlgorithm,
}

impl IssuingPoint {
    pub(super) async fn run_cycle(
        &self,
        guard: MutexGuard<'_, ()>,
        trigger: Trigger,
    ) -> UpdateOutcome {
        let (kind, algorithm) = match trigger {
            Trigger::Manual(algorithm) => (CrlKind::Full, algorithm),
            Trigger::Scheduled => (self.scheduled_kind(), None),
        };

        if kind == CrlKind::Delta && self.delta_cache.is_empty() {
            self.skip_unchanged_delta().await;
            return UpdateOutcome::Unchanged;
        }
        UpdateOutcome::Completed(self.execute(guard, kind, algorithm).await)
    }

    fn scheduled_kind(&self) -> CrlKind {
        let state = self.read_state();
        if !self.extensions.delta_enabled()
            || state.crl_number.is_none()
            || state.force_full
            || self.schedule.full_due(state.updates_since_full)
        {
            CrlKind::Full
        } else {
            CrlKind::Delta
        }
    }

    /// Nothing changed since the base CRL, which stays valid until the next full update.
    async fn skip_unchanged_delta(&self) {
        let now = self.clock.now();
        {
            let mut state = self.write_state();
            state.update_pending = false;
            state.updates_since_full = state.updates_since_full.saturating_add(1);
            state.next_update = self.schedule.next_update(now);
        }
        debug!(issuing_point = %self.id, "No changes since the base CRL, delta CRL skipped");
        if let Err(e) = self.persist().await {
            warn!(issuing_point = %self.id, "Failed to persist issuing point state: {}", e);
        }
    }

    /// One full generate-and-publish cycle. Must be called with the update lock held.
    pub(super) async fn execute(
        &self,
        guard: MutexGuard<'_, ()>,
        kind: CrlKind,
        algorithm: Option<SigningAlgorithm>,
    ) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("crl_update", issuing_point = %self.id, cycle = %cycle_id, kind = %kind);

        async move {
            let _guard = guard;
            let this_update = self.clock.now();
            let algorithm = algorithm
                .or(self.default_algorithm)
                .unwrap_or_else(|| self.signer.default_algorithm());

            {
                let mut state = self.write_state();
                state.phase = UpdatePhase::Generating;
                state.update_pending = false;
            }
            info!(algorithm = %algorithm, "Starting CRL generation");

            let mut allocated = None;
            let generated = self
                .generate(kind, algorithm, this_update, &mut allocated)
                .await;
            self.refresh_next_numbers().await;

            let report = match generated {
                Ok(crl) => self.complete(cycle_id, this_update, crl).await,
                Err(failure) => self.fail(cycle_id, kind, this_update, allocated, failure),
            };

            self.write_state().phase = UpdatePhase::Idle;
            self.cycles.send_replace(Some(report.clone()));
            report
        }
        .instrument(span)
        .await
    }

    async fn generate(
        &self,
        kind: CrlKind,
        algorithm: SigningAlgorithm,
        this_update: OffsetDateTime,
        allocated: &mut Option<BigUint>,
    ) -> IssuingPointResult<GeneratedCrl> {
        self.sweep_expired(this_update, kind).await?;

        match kind {
            CrlKind::Full => {
                // changes recorded after this point belong to the next delta
                let consumed = self.delta_cache.snapshot_and_clear();
                let result = self.generate_full(algorithm, this_update, allocated).await;
                if result.is_err() {
                    self.delta_cache.restore(consumed);
                }
                result
            }
            CrlKind::Delta => self.generate_delta(algorithm, this_update, allocated).await,
        }
    }

    async fn generate_full(
        &self,
        algorithm: SigningAlgorithm,
        this_update: OffsetDateTime,
        allocated: &mut Option<BigUint>,
    ) -> IssuingPointResult<GeneratedCrl> {
        let mut statuses = vec![CertStatus::Revoked];
        if self.config.include_expired_certs {
            statuses.push(CertStatus::RevokedExpired);
        }
        let records = self
            .scan(&self.scope_query(RecordQuery::with_status(&statuses)))
            .await?;

        let entries: Vec<RevokedEntry> = records
            .iter()
            .filter_map(|record| match &record.revocation_info {
                Some(info) => Some(self.entry_filter.entry(
                    &record.serial,
                    info.revocation_date,
                    &info.crl_entry_extensions,
                )),
                None => {
                    warn!(serial = %record.serial_hex(), "Revoked record without revocation info");
                    None
                }
            })
            .collect();

        let number = self.numbers()?.next_crl_number().await?;
        *allocated = Some(number.clone());
        self.sign(CrlKind::Full, number, None, entries, algorithm, this_update)
    }

    async fn generate_delta(
        &self,
        algorithm: SigningAlgorithm,
        this_update: OffsetDateTime,
        allocated: &mut Option<BigUint>,
    ) -> IssuingPointResult<GeneratedCrl> {
        let base = self
            .read_state()
            .crl_number
            .clone()
            .ok_or(IssuingPointError::NothingToPublish)?;

        let entries: Vec<RevokedEntry> = self
            .delta_cache
            .peek_for_delta_crl()
            .into_iter()
            .map(|entry| match entry.change {
                DeltaChange::Revoked(info) => self.entry_filter.entry(
                    &entry.serial,
                    info.revocation_date,
                    &info.crl_entry_extensions,
                ),
                DeltaChange::Unrevoked | DeltaChange::Expired => {
                    remove_from_crl_entry(&entry.serial, entry.recorded_at)
                }
            })
            .collect();

        let number = self.numbers()?.next_delta_crl_number().await?;
        *allocated = Some(number.clone());
        self.sign(CrlKind::Delta, number, Some(&base), entries, algorithm, this_update)
    }

    fn sign(
        &self,
        kind: CrlKind,
        number: BigUint,
        base: Option<&BigUint>,
        entries: Vec<RevokedEntry>,
        algorithm: SigningAlgorithm,
        this_update: OffsetDateTime,
    ) -> IssuingPointResult<GeneratedCrl> {
        let extensions = self.extensions.build(&ExtensionContext {
            crl_number: &number,
            base_crl_number: base,
            key_identifier: self.identity.key_identifier.as_deref(),
        });
        let next_update =
            self.schedule
                .crl_next_update(this_update, kind, self.extensions.delta_enabled());

        let tbs = TbsCertList {
            algorithm,
            issuer: &self.identity.subject,
            this_update,
            next_update,
            revoked: &entries,
            extensions: &extensions,
        }
        .to_der();
        let signature = self.signer.sign(&tbs, algorithm)?;

        Ok(GeneratedCrl {
            kind,
            der: certificate_list(&tbs, algorithm, &signature),
            number,
            next_update,
            entries: entries.len(),
            algorithm,
        })
    }

    /// Moves certificates past their notAfter to `EXPIRED` / `REVOKED_EXPIRED`.
    ///
    /// For delta CRLs, every revoked certificate that expired since the base
    /// CRL is recorded, including the ones another issuing point sharing the
    /// repository moved first.
    async fn sweep_expired(&self, now: OffsetDateTime, kind: CrlKind) -> IssuingPointResult<()> {
        let query = RecordQuery::with_status(&[CertStatus::Valid, CertStatus::Revoked])
            .expired_before(now);
        for record in self.scan(&query).await? {
            let status = match record.status {
                CertStatus::Revoked => CertStatus::RevokedExpired,
                _ => CertStatus::Expired,
            };
            match self.repository.update_status(&record.serial, status).await {
                Ok(()) => debug!(serial = %record.serial_hex(), status = %status, "Certificate expired"),
                Err(RepositoryError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let base_update = self.read_state().last_full_update;
        if kind == CrlKind::Delta
            && !self.config.include_expired_certs
            && let Some(since) = base_update
        {
            let query = self.scope_query(
                RecordQuery::with_status(&[CertStatus::RevokedExpired]).modified_after(since),
            );
            for record in self.scan(&query).await? {
                self.delta_cache.record_expired(record.serial);
            }
        }
        Ok(())
    }

    async fn refresh_next_numbers(&self) {
        let Ok(numbers) = self.numbers() else {
            return;
        };
        let next = numbers.peek().await;
        let mut state = self.write_state();
        state.next_crl_number = Some(next.clone());
        state.next_delta_crl_number = Some(next);
    }

    async fn complete(
        &self,
        cycle_id: Uuid,
        this_update: OffsetDateTime,
        crl: GeneratedCrl,
    ) -> CycleReport {
        {
            let mut state = self.write_state();
            state.phase = UpdatePhase::Publishing;
            match crl.kind {
                CrlKind::Full => {
                    state.crl_number = Some(crl.number.clone());
                    state.full_crl = Some(crl.der.clone());
                    state.full_crl_size = crl.entries;
                    state.last_full_update = Some(this_update);
                    state.updates_since_full = 0;
                    state.force_full = false;
                    // earlier deltas refer to the previous base
                    state.delta_crl = None;
                    state.delta_crl_size = 0;
                }
                CrlKind::Delta => {
                    state.delta_crl_number = Some(crl.number.clone());
                    state.delta_crl = Some(crl.der.clone());
                    state.delta_crl_size = crl.entries;
                    state.updates_since_full = state.updates_since_full.saturating_add(1);
                }
            }
            state.last_update = Some(this_update);
            state.next_update = self.schedule.next_update(this_update);
            state.last_signing_algorithm = Some(crl.algorithm);
            state.update_status = UpdateStatus::Success;
            state.update_error = None;
        }
        info!(
            crl_number = %crl.number,
            entries = crl.entries,
            "CRL generated"
        );
        self.audit(
            AuditLevel::Info,
            "CRL_GENERATION",
            format!("{} CRL {} generated with {} entries", crl.kind, crl.number, crl.entries),
        );

        if let Err(e) = self.persist().await {
            error!("Failed to persist issuing point state: {}", e);
            self.audit(
                AuditLevel::Warning,
                "CRL_STATE_PERSIST",
                format!("Failed to persist issuing point state: {e}"),
            );
        }

        let publication = CrlPublication {
            issuing_point: self.id.clone(),
            der: crl.der,
            is_delta: crl.kind == CrlKind::Delta,
            crl_number: crl.number.clone(),
            this_update,
        };
        let (publish_status, publish_error) = self.publish(&[publication]).await;

        CycleReport {
            cycle_id,
            kind: crl.kind,
            crl_number: Some(crl.number),
            this_update,
            next_update: crl.next_update,
            entries: crl.entries,
            update_status: UpdateStatus::Success,
            update_error: None,
            publish_status,
            publish_error,
        }
    }

    fn fail(
        &self,
        cycle_id: Uuid,
        kind: CrlKind,
        this_update: OffsetDateTime,
        allocated: Option<BigUint>,
        failure: IssuingPointError,
    ) -> CycleReport {
        let message = failure.to_string();
        error!(crl_number = ?allocated, "CRL generation failed: {}", message);

        let level = match failure {
            IssuingPointError::Signing(_) => AuditLevel::Failure,
            _ => AuditLevel::Warning,
        };
        self.audit(level, "CRL_GENERATION", format!("{kind} CRL generation failed: {message}"));

        let (publish_status, publish_error) = {
            let mut state = self.write_state();
            state.update_status = UpdateStatus::Error;
            state.update_error = Some(message.clone());
            (state.publish_status, state.publish_error.clone())
        };

        CycleReport {
            cycle_id,
            kind,
            crl_number: allocated,
            this_update,
            next_update: None,
            entries: 0,
            update_status: UpdateStatus::Error,
            update_error: Some(message),
            publish_status,
            publish_error,
        }
    }

    /// Pushes publications to every publisher and records the publish status.
    async fn publish(&self, publications: &[CrlPublication]) -> (UpdateStatus, Option<String>) {
        if self.publishers.is_empty() {
            let mut state = self.write_state();
            state.publish_status = UpdateStatus::NotAttempted;
            state.publish_error = None;
            return (UpdateStatus::NotAttempted, None);
        }

        let mut errors = Vec::new();
        for publication in publications {
            for publisher in &self.publishers {
                if let Err(e) = publisher.publish(publication).await {
                    error!(
                        publisher = publisher.name(),
                        crl_number = %publication.crl_number,
                        "Failed to publish CRL: {}",
                        e
                    );
                    errors.push(format!("{}: {}", publisher.name(), e));
                }
            }
        }

        let (status, message) = if errors.is_empty() {
            (UpdateStatus::Success, None)
        } else {
            let message = errors.join("; ");
            self.audit(
                AuditLevel::Warning,
                "CRL_PUBLISHING",
                format!("CRL publishing failed: {message}"),
            );
            (UpdateStatus::Error, Some(message))
        };

        let mut state = self.write_state();
        state.publish_status = status;
        state.publish_error = message.clone();
        (status, message)
    }

    /// Pushes the last generated CRLs again without regenerating them.
    pub async fn republish(&self) -> IssuingPointResult<UpdateStatus> {
        self.ensure_initialized()?;
        let _guard = self
            .update_lock
            .try_lock()
            .map_err(|_| IssuingPointError::ConcurrencyConflict)?;

        let publications = {
            let state = self.read_state();
            let (Some(full), Some(number), Some(this_update)) = (
                state.full_crl.clone(),
                state.crl_number.clone(),
                state.last_full_update,
            ) else {
                return Err(IssuingPointError::NothingToPublish);
            };

            let mut publications = vec![CrlPublication {
                issuing_point: self.id.clone(),
                der: full,
                is_delta: false,
                crl_number: number,
                this_update,
            }];
            if let (Some(delta), Some(number), Some(this_update)) = (
                state.delta_crl.clone(),
                state.delta_crl_number.clone(),
                state.last_update,
            ) {
                publications.push(CrlPublication {
                    issuing_point: self.id.clone(),
                    der: delta,
                    is_delta: true,
                    crl_number: number,
                    this_update,
                });
            }
            publications
        };

        info!(issuing_point = %self.id, count = publications.len(), "Republishing CRLs");
        let (status, _) = self.publish(&publications).await;
        Ok(status)
    }
}
