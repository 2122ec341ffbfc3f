use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::issuing_point::{IssuingPoint, UpdateOutcome};

/// Configuration for the CRL update scheduler
#[derive(Debug, Clone)]
pub struct CrlSchedulerConfig {
    /// Longest the scheduler sleeps before checking the issuing point again
    pub max_idle: Duration,
}

impl Default for CrlSchedulerConfig {
    fn default() -> Self {
        Self {
            max_idle: Duration::from_secs(60),
        }
    }
}

/// Drives the update cycles of one issuing point.
///
/// The loop sleeps until the issuing point's next check time, or until a
/// revocation or manual request wakes it, then asks the issuing point to
/// tick. Failed cycles are retried after `failure_retry_wait_ms`.
pub struct CrlScheduler {
    issuing_point: Arc<IssuingPoint>,
    config: CrlSchedulerConfig,
    shutdown: watch::Sender<bool>,
}

impl CrlScheduler {
    pub fn new(issuing_point: Arc<IssuingPoint>, config: CrlSchedulerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            issuing_point,
            config,
            shutdown,
        }
    }

    /// Starts the scheduler in a background task
    pub fn start(&self) -> JoinHandle<()> {
        info!(
            issuing_point = %self.issuing_point.id(),
            "Starting CRL update scheduler"
        );

        let issuing_point = Arc::clone(&self.issuing_point);
        let config = self.config.clone();
        let shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            Self::run_scheduler(issuing_point, config, shutdown).await;
        })
    }

    /// Stops the scheduler; a cycle in flight runs to completion first
    pub fn stop(&self) {
        info!(
            issuing_point = %self.issuing_point.id(),
            "Stopping CRL update scheduler"
        );
        self.shutdown.send_replace(true);
    }

    async fn run_scheduler(
        issuing_point: Arc<IssuingPoint>,
        config: CrlSchedulerConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            let delay = Self::delay_until_next_check(&issuing_point, &config);
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = issuing_point.wakeup().notified() => {
                    debug!(issuing_point = %issuing_point.id(), "Scheduler woken up");
                }
                _ = sleep(delay) => {}
            }

            if let Some(retry) = Self::perform_update(&issuing_point).await {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = sleep(retry) => {}
                }
            }
        }

        info!(issuing_point = %issuing_point.id(), "CRL update scheduler stopped");
    }

    fn delay_until_next_check(issuing_point: &IssuingPoint, config: &CrlSchedulerConfig) -> Duration {
        match issuing_point.next_check() {
            Some(next) => Duration::try_from(next - issuing_point.now())
                .unwrap_or(Duration::ZERO)
                .min(config.max_idle),
            None => config.max_idle,
        }
    }

    /// Runs one tick. Returns how long to wait before trying again after a failure.
    async fn perform_update(issuing_point: &IssuingPoint) -> Option<Duration> {
        let retry = issuing_point.config().failure_retry_wait();
        match issuing_point.tick().await {
            Ok(UpdateOutcome::Completed(report)) if report.is_success() => {
                debug!(
                    issuing_point = %issuing_point.id(),
                    crl_number = ?report.crl_number,
                    publish_status = %report.publish_status,
                    "Scheduled CRL update completed"
                );
                None
            }
            Ok(UpdateOutcome::Completed(report)) => {
                warn!(
                    issuing_point = %issuing_point.id(),
                    "Scheduled CRL update failed, retrying in {:?}: {}",
                    retry,
                    report.update_error.as_deref().unwrap_or_default()
                );
                Some(retry)
            }
            Ok(_) => None,
            Err(e) => {
                error!(issuing_point = %issuing_point.id(), "Scheduled CRL update failed: {}", e);
                Some(retry)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::IssuingPointConfig;
    use crate::issuing_point::Collaborators;
    use crate::repository::MemoryRepository;
    use crate::signing::{CaIdentity, RingSigner, SigningAlgorithm};
    use crate::store::MemoryCrlStore;
    use time::macros::datetime;

    fn issuing_point(config: IssuingPointConfig) -> Arc<IssuingPoint> {
        let clock = Arc::new(ManualClock::new(datetime!(2024-06-17 12:00 UTC)));
        let (signer, _) = RingSigner::generate("test", SigningAlgorithm::Ed25519).unwrap();
        let identity = CaIdentity::from_common_name("Test CA", signer.public_key().as_deref());
        let ip = IssuingPoint::new(
            "MasterCRL",
            config,
            Collaborators {
                repository: Arc::new(MemoryRepository::with_clock(clock.clone())),
                store: Arc::new(MemoryCrlStore::new()),
                signer: Arc::new(signer),
                identity,
            },
        )
        .unwrap()
        .with_clock(clock);
        Arc::new(ip)
    }

    #[tokio::test]
    async fn test_scheduler_generates_pending_crl() {
        let ip = issuing_point(IssuingPointConfig::default());
        ip.init().await.unwrap();

        let scheduler = CrlScheduler::new(ip.clone(), CrlSchedulerConfig::default());
        let handle = scheduler.start();

        tokio::time::timeout(Duration::from_secs(5), async {
            while ip.crl_number().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler should generate the initial CRL");

        scheduler.stop();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_manual_request_wakes_scheduler() {
        let ip = issuing_point(IssuingPointConfig {
            enable_crl_updates: false,
            ..IssuingPointConfig::default()
        });
        ip.init().await.unwrap();

        let scheduler = CrlScheduler::new(
            ip.clone(),
            CrlSchedulerConfig {
                max_idle: Duration::from_secs(3600),
            },
        );
        let handle = scheduler.start();
        ip.schedule_manual_update(None).unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while ip.crl_number().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("manual request should wake the scheduler");

        scheduler.stop();
        handle.await.unwrap();
    }

    #[test]
    fn test_uninitialized_point_sleeps_max_idle() {
        let ip = issuing_point(IssuingPointConfig::default());
        let config = CrlSchedulerConfig::default();
        assert_eq!(
            CrlScheduler::delay_until_next_check(&ip, &config),
            config.max_idle
        );
    }
}
