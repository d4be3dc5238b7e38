mod common;

use common::*;
use drip_faucet::{AccountSnapshot, FaucetConfig, FaucetError};
use drip_lockstore::MemoryLockStore;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_use_consecutive_sequences() {
    const CLAIMS: i64 = 8;
    let ledger = Arc::new(FakeLedger::new(Broadcast::Commit));
    let store = healthy_store(5);
    let service = build_service(test_config(), ledger.clone(), store.clone(), None).await;

    let tasks: Vec<_> = (0..CLAIMS)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.claim(claim_body(RECIPIENT).as_bytes(), CLIENT).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut sequences = ledger.sequences();
    sequences.sort_unstable();
    assert_eq!(sequences, (5..5 + CLAIMS).collect::<Vec<_>>());
    assert_eq!(ledger.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(store.peek("testnet-sequence"), Some((5 + CLAIMS).to_string()));
}

#[tokio::test]
async fn timeout_marks_broken_and_next_claim_repairs() {
    let config = FaucetConfig {
        timeout_secs: 1,
        ..test_config()
    };
    let ledger = Arc::new(FakeLedger::new(Broadcast::Hang));
    let store = healthy_store(5);
    let service = build_service(config, ledger.clone(), store.clone(), None).await;

    let started = Instant::now();
    let err = service
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "unexpected error {err}");
    assert!(started.elapsed() < Duration::from_secs(5));

    assert!(!store.is_held("testnet-sequence"));
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("5"));
    assert_ne!(store.peek("testnet-brokenflag").as_deref(), Some("no"));

    *ledger.snapshot.lock().unwrap() = Some(AccountSnapshot {
        sequence: 6,
        account_number: 2,
    });
    ledger.set_behavior(Broadcast::Commit);

    let response = service
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap();
    assert_eq!(response.height, 106);
    assert_eq!(ledger.sequences(), vec![5, 6]);
    assert_eq!(ledger.account_queries.load(Ordering::SeqCst), 1);
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("7"));
    assert_eq!(store.peek("testnet-brokenflag").as_deref(), Some("no"));
}

#[tokio::test]
async fn unknown_outcome_marks_broken() {
    let ledger = Arc::new(FakeLedger::new(Broadcast::ConnectionReset));
    let store = healthy_store(5);
    let service = build_service(test_config(), ledger, store.clone(), None).await;

    let err = service
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, FaucetError::Ledger(_)));
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("5"));
    assert_ne!(store.peek("testnet-brokenflag").as_deref(), Some("no"));
}

#[tokio::test]
async fn refused_connection_leaves_account_healthy() {
    let ledger = Arc::new(FakeLedger::new(Broadcast::Refused));
    let store = healthy_store(5);
    let service = build_service(test_config(), ledger, store.clone(), None).await;

    let err = service
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("5"));
    assert_eq!(store.peek("testnet-brokenflag").as_deref(), Some("no"));
}

#[tokio::test]
async fn failed_repair_keeps_account_broken() {
    let ledger = Arc::new(FakeLedger::new(Broadcast::Commit).with_snapshot(5, 2));
    let store = healthy_store(5);
    let service = build_service(test_config(), ledger.clone(), store.clone(), None).await;

    service
        .account_state()
        .unwrap()
        .mark_broken("broadcast timed out")
        .await
        .unwrap();
    *ledger.snapshot.lock().unwrap() = None;

    let err = service
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap_err();
    assert!(matches!(err, FaucetError::RepairFailed(_)));
    assert_eq!(err.status(), axum::http::StatusCode::BAD_GATEWAY);
    assert!(ledger.sequences().is_empty());
    assert_eq!(
        store.peek("testnet-brokenflag").as_deref(),
        Some("broadcast timed out")
    );
    assert_eq!(store.acquire_count("testnet-sequence"), 0);
}

#[tokio::test]
async fn startup_initializes_empty_store_from_ledger() {
    let ledger = Arc::new(FakeLedger::new(Broadcast::Commit).with_snapshot(3, 7));
    let store = Arc::new(MemoryLockStore::new());
    let service = build_service(test_config(), ledger.clone(), store.clone(), None).await;

    assert_eq!(ledger.account_queries.load(Ordering::SeqCst), 1);
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("3"));
    assert_eq!(store.peek("testnet-accountnumber").as_deref(), Some("7"));
    assert_eq!(store.peek("testnet-brokenflag").as_deref(), Some("no"));
    assert_eq!(service.account_state().unwrap().account_number(), Some(7));

    let receipt = service.send_once(RECIPIENT).await.unwrap();
    assert_eq!(receipt.height, 103);
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("4"));
}

#[tokio::test]
async fn instances_sharing_a_store_do_not_reuse_sequences() {
    let ledger = Arc::new(FakeLedger::new(Broadcast::Commit));
    let store = healthy_store(5);
    let first = build_service(test_config(), ledger.clone(), store.clone(), None).await;
    let second = build_service(test_config(), ledger.clone(), store.clone(), None).await;

    let body = claim_body(RECIPIENT);
    let (a, b) = tokio::join!(
        first.claim(body.as_bytes(), CLIENT),
        second.claim(body.as_bytes(), CLIENT)
    );
    a.unwrap();
    b.unwrap();

    let mut sequences = ledger.sequences();
    sequences.sort_unstable();
    assert_eq!(sequences, vec![5, 6]);
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("7"));
}

#[tokio::test]
async fn send_once_requires_sending() {
    let config = FaucetConfig {
        disable_send: true,
        ..test_config()
    };
    let ledger = Arc::new(FakeLedger::new(Broadcast::Commit));
    let service = build_service(config, ledger, healthy_store(5), None).await;

    assert!(matches!(
        service.send_once(RECIPIENT).await,
        Err(FaucetError::Config(_))
    ));
}

#[tokio::test]
async fn dropped_claim_still_settles_the_sequence() {
    let ledger = Arc::new(
        FakeLedger::new(Broadcast::Commit).with_delay(Duration::from_millis(300)),
    );
    let store = healthy_store(5);
    let service = build_service(test_config(), ledger.clone(), store.clone(), None).await;

    // The caller goes away while the broadcast is in flight.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        service.claim(claim_body(RECIPIENT).as_bytes(), CLIENT),
    )
    .await;
    assert!(abandoned.is_err());

    let started = Instant::now();
    let response = service
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(response.height, 106);
    assert_eq!(ledger.sequences(), vec![5, 6]);
    assert_eq!(store.peek("testnet-sequence").as_deref(), Some("7"));
    assert_eq!(store.peek("testnet-brokenflag").as_deref(), Some("no"));
    assert!(!store.is_held("testnet-sequence"));
}

#[tokio::test]
async fn repair_by_one_instance_reaches_the_other() {
    let ledger = Arc::new(FakeLedger::new(Broadcast::Commit).with_snapshot(5, 2));
    let store = healthy_store(5);
    let first = build_service(test_config(), ledger.clone(), store.clone(), None).await;
    let second = build_service(test_config(), ledger.clone(), store.clone(), None).await;
    assert_eq!(second.account_state().unwrap().account_number(), Some(2));

    first
        .account_state()
        .unwrap()
        .mark_broken("account number changed")
        .await
        .unwrap();
    *ledger.snapshot.lock().unwrap() = Some(AccountSnapshot {
        sequence: 5,
        account_number: 9,
    });

    first
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap();
    second
        .claim(claim_body(RECIPIENT).as_bytes(), CLIENT)
        .await
        .unwrap();

    assert_eq!(store.peek("testnet-accountnumber").as_deref(), Some("9"));
    assert_eq!(ledger.account_numbers(), vec![9, 9]);
    assert_eq!(ledger.sequences(), vec![5, 6]);
    assert_eq!(second.account_state().unwrap().account_number(), Some(9));
}
