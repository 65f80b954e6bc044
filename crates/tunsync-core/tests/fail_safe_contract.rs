//! Contract Test: Failure Isolation
//!
//! Constraints verified:
//! - An unavailable backend source never leads to creates or deletes
//! - A failed listing aborts the pass before any mutation
//! - One failed record operation does not block the others or the ingress
//! - A failed ingress replace is reported and retried by the next pass
//! - Tunnel provisioning failures are fatal

mod common;

use common::*;
use tokio_test::{assert_err, assert_ok};
use tunsync_core::engine::RecordOp;
use tunsync_core::model::RecordType;
use tunsync_core::store::{MemoryRecordStore, StoreCall};
use tunsync_core::traits::RecordStore;
use tunsync_core::{EngineEvent, Error};

#[tokio::test]
async fn source_outage_issues_no_mutation() {
    let store = MemoryRecordStore::new();
    let source = ControlledBackendSource::new(&[("1", "25565")]);
    let (engine, mut events) = engine_with(&store, &source);
    assert_ok!(engine.sync_once().await);
    store.clear_calls().await;

    source.set_unavailable(true);
    let result = engine.sync_once().await;

    assert!(matches!(result, Err(Error::Transport { .. })));
    assert!(
        store.calls().await.is_empty(),
        "no store call at all when desired state is unknown"
    );
    assert_eq!(
        managed_ports(&store.records().await, RecordType::Cname),
        vec!["25565".to_string()],
        "existing records survive the outage"
    );
    assert!(
        drain_events(&mut events)
            .iter()
            .any(|e| matches!(e, EngineEvent::PassSkipped { .. }))
    );
}

#[tokio::test]
async fn listing_failure_aborts_before_mutation() {
    let store = MemoryRecordStore::new();
    let source = ControlledBackendSource::new(&[("1", "25565")]);
    let (engine, _events) = engine_with(&store, &source);

    store.set_fail_listing(true).await;
    assert_err!(engine.sync_once().await);

    assert_eq!(store.record_mutation_count().await, 0);
    assert!(store.ingress(TUNNEL_ID).await.is_none());
}

#[tokio::test]
async fn one_failed_record_does_not_block_the_rest() {
    let store = MemoryRecordStore::new();
    store.fail_record("25566.example.com").await;
    let source = ControlledBackendSource::new(&[("1", "25565"), ("2", "25566")]);
    let (engine, mut events) = engine_with(&store, &source);

    let report = engine.sync_once().await.expect("pass runs to its end");

    assert_eq!(report.created, 2);
    assert_eq!(report.failures.len(), 2);
    assert!(report.failures.iter().all(|f| f.op == RecordOp::Create));
    assert!(report.failures.iter().all(|f| f.name == "25566.example.com"));
    assert!(report.ingress_applied, "ingress is still replaced");
    assert!(!report.is_clean());

    let ingress = store.ingress(TUNNEL_ID).await.expect("ingress set");
    assert_eq!(ingress.len(), 4);

    let failed = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, EngineEvent::OperationFailed(_)))
        .count();
    assert_eq!(failed, 2);
}

#[tokio::test]
async fn failed_ingress_replace_is_healed_by_next_pass() {
    let store = MemoryRecordStore::new();
    store.set_fail_ingress(true).await;
    let source = ControlledBackendSource::new(&[("1", "25565")]);
    let (engine, _events) = engine_with(&store, &source);

    let report = engine.sync_once().await.expect("pass runs to its end");
    assert!(!report.ingress_applied);
    assert_eq!(report.created, 2, "records are still converged");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].op, RecordOp::ReplaceIngress);
    assert_eq!(report.failures[0].record_type, None);

    store.set_fail_ingress(false).await;
    store.clear_calls().await;
    let report = engine.sync_once().await.expect("second pass succeeds");

    assert!(report.is_clean());
    assert_eq!(store.record_mutation_count().await, 0);
    assert_eq!(store.ingress(TUNNEL_ID).await.map(|r| r.len()), Some(3));
}

#[tokio::test]
async fn failed_delete_is_retried_by_next_pass() {
    let store = MemoryRecordStore::with_records(vec![managed_record(
        "c-orphan",
        RecordType::Cname,
        "30000",
        "abc123.cfargotunnel.com",
    )]);
    store.fail_record("30000.example.com").await;
    let source = ControlledBackendSource::new(&[]);
    let (engine, _events) = engine_with(&store, &source);

    let report = engine.sync_once().await.expect("pass runs to its end");
    assert_eq!(report.deleted, 0);
    assert_eq!(report.failures[0].op, RecordOp::Delete);
    assert_eq!(store.records().await.len(), 1);

    // Fresh store handle without the injected failure sees the same record
    let healed = MemoryRecordStore::with_records(store.records().await);
    let (engine, _events) = engine_with(&healed, &source);
    let report = engine.sync_once().await.expect("pass succeeds");
    assert_eq!(report.deleted, 1);
    assert!(healed.records().await.is_empty());
}

#[tokio::test]
async fn missing_tunnel_token_is_a_fatal_provisioning_error() {
    let store = MemoryRecordStore::new();
    store.set_withhold_token(true).await;

    let result = store.get_or_create_tunnel("home").await;
    match result {
        Err(e) => assert!(e.is_fatal(), "provisioning errors are fatal: {}", e),
        Ok(identity) => panic!("expected provisioning failure, got {:?}", identity),
    }
    assert_eq!(
        store.calls().await,
        vec![StoreCall::GetOrCreateTunnel {
            name: "home".to_string()
        }]
    );
}
