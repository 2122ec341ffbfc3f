mod common;

use std::time::Duration;

use common::{T0, TestCa, leaf};
use crl_issuing_point::{
    authority::CrlAuthority,
    config::IssuingPointConfig,
    crl::RevocationReason,
    repository::{BigUint, RevocationInfo},
    scheduler::CrlSchedulerConfig,
};

async fn wait_for(mut done: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should be reached by the scheduler");
}

#[tokio::test]
async fn test_revocation_wakes_scheduler() {
    let ca = TestCa::new();
    let config = IssuingPointConfig {
        always_update: true,
        ..IssuingPointConfig::default()
    };
    let mut authority = CrlAuthority::new(ca.repository.clone()).with_scheduler_config(
        CrlSchedulerConfig {
            max_idle: Duration::from_secs(3600),
        },
    );
    let ip = authority.add_issuing_point(ca.issuing_point(config));
    authority.init_all().await.unwrap();
    authority.start_schedulers().await;

    wait_for(|| ip.crl_number() == Some(BigUint::from(1u8))).await;

    authority.register_certificate(leaf(0x64, T0)).await.unwrap();
    authority
        .revoke(
            &BigUint::from(0x64u32),
            RevocationInfo::new(T0).with_reason(RevocationReason::KeyCompromise),
            "agent",
            None,
        )
        .await
        .unwrap();

    wait_for(|| ip.crl_number() == Some(BigUint::from(2u8))).await;
    assert!(ip.delta_cache().is_empty());

    authority.shutdown().await.unwrap();
    let state = ip.snapshot();
    assert!(!state.generation_enabled);
    assert!(!state.update_pending);
}

#[tokio::test]
async fn test_disabled_issuing_point_is_left_alone() {
    let ca = TestCa::new();
    let mut authority = CrlAuthority::new(ca.repository.clone());
    let ip = authority.add_issuing_point(ca.issuing_point(IssuingPointConfig {
        enabled: false,
        ..IssuingPointConfig::default()
    }));
    authority.init_all().await.unwrap();
    authority.start_schedulers().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ip.crl_number(), None);
    assert_eq!(ip.crl_update_status().as_str(), "not_attempted");

    authority.shutdown().await.unwrap();
}
