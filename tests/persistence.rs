mod common;

use std::sync::Arc;

use common::{TestCa, delta_config, parse_crl};
use crl_issuing_point::{
    crl::RevocationReason,
    issuing_point::{CrlKind, UpdateOutcome},
    publisher::FilePublisher,
    repository::BigUint,
    store::{CrlStore, FileCrlStore},
};
use time::Duration;

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("issuing-points.json");
    let crl_dir = dir.path().join("crls");

    let ca = TestCa::with_store(Arc::new(FileCrlStore::new(&store_path)));
    let publisher = Arc::new(FilePublisher::new(&crl_dir).with_pem(true));
    let ip = ca
        .issuing_point(delta_config(3))
        .with_publisher(publisher.clone());
    ip.init().await.unwrap();

    let UpdateOutcome::Completed(first) = ip.tick().await.unwrap() else {
        panic!("initial CRL should be generated");
    };
    assert_eq!(first.kind, CrlKind::Full);

    ca.clock.advance(Duration::minutes(1));
    ca.revoke(&ip, 0x64, RevocationReason::KeyCompromise).await;
    ca.clock.advance(Duration::hours(1));
    let UpdateOutcome::Completed(delta) = ip.tick().await.unwrap() else {
        panic!("delta CRL should be generated");
    };
    assert_eq!(delta.kind, CrlKind::Delta);
    ip.shutdown().await.unwrap();

    assert_eq!(std::fs::read(crl_dir.join("MasterCRL.crl")).unwrap(), ip.full_crl().unwrap());
    assert_eq!(
        std::fs::read(crl_dir.join("MasterCRL-delta-2.crl")).unwrap(),
        ip.delta_crl().unwrap()
    );
    assert!(crl_dir.join("MasterCRL-1.pem").exists());

    // a second process over the same files
    let store = Arc::new(FileCrlStore::new(&store_path));
    let saved = store.load("MasterCRL").await.unwrap().unwrap();
    assert_eq!(saved.crl_number, Some(BigUint::from(1u8)));
    assert_eq!(saved.delta_crl_number, Some(BigUint::from(2u8)));
    assert_eq!(saved.next_crl_number, BigUint::from(3u8));
    assert_eq!(saved.updates_since_full, 1);

    let mut restarted = ca.collaborators();
    restarted.store = store;
    let ip = crl_issuing_point::issuing_point::IssuingPoint::new(
        "MasterCRL",
        delta_config(3),
        restarted,
    )
    .unwrap()
    .with_clock(ca.clock.clone())
    .with_publisher(publisher);
    ip.init().await.unwrap();

    assert_eq!(ip.crl_number(), Some(BigUint::from(1u8)));
    assert_eq!(ip.delta_cache().len(), 1, "unpublished changes are recovered");
    assert_eq!(ip.republish().await.unwrap().as_str(), "success");

    // the next full CRL is numbered after the last delta
    let report = ip.update_crl_now(None).await.unwrap();
    assert_eq!(report.crl_number, Some(BigUint::from(3u8)));
    let crl = parse_crl(&std::fs::read(crl_dir.join("MasterCRL.crl")).unwrap());
    assert_eq!(crl.crl_number, Some(BigUint::from(3u8)));
    assert_eq!(crl.entries.len(), 1);
    ca.verify(&ip.full_crl().unwrap());
}

#[tokio::test]
async fn test_counters_never_move_backwards() {
    let dir = tempfile::tempdir().unwrap();
    let store_path = dir.path().join("issuing-points.json");
    let store = Arc::new(FileCrlStore::new(&store_path));

    let ca = TestCa::with_store(store.clone());
    let ip = ca.issuing_point(Default::default());
    ip.init().await.unwrap();
    for _ in 0..3 {
        ip.update_crl_now(None).await.unwrap();
    }

    // a stale record written by someone else cannot roll the counter back
    let mut stale = store.load("MasterCRL").await.unwrap().unwrap();
    stale.next_crl_number = BigUint::from(1u8);
    store.save(&stale).await.unwrap();

    let saved = store.load("MasterCRL").await.unwrap().unwrap();
    assert_eq!(saved.next_crl_number, BigUint::from(4u8));
    assert_eq!(
        ip.update_crl_now(None).await.unwrap().crl_number,
        Some(BigUint::from(4u8))
    );
}
