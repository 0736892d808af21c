//! Reconciliation behavior at session establishment.

use chrono::{TimeZone, Utc};
use expense_sync::{
    to_remote, Category, EngineConfig, ExpenseDraft, MemoryLocalStore, MemoryRemote,
    MergeStrategy, Outbox, OwnerId, Record, RecordId, RemoteOp, SessionEvent, SessionOutcome,
    SyncEngine,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn engine_with(
    strategy: MergeStrategy,
    local: &[Record],
    remote: Arc<MemoryRemote>,
) -> SyncEngine {
    SyncEngine::from_parts(
        EngineConfig {
            merge_strategy: strategy,
            auto_drain: false,
            ..Default::default()
        },
        Arc::new(MemoryLocalStore::with_records(local)),
        Outbox::in_memory(),
        remote,
    )
}

fn record(name: &str, amount: f64, day: u32) -> Record {
    Record {
        id: RecordId::new(),
        name: name.into(),
        amount,
        category: Category::Electronics,
        location: None,
        occurred_at: Utc.with_ymd_and_hms(2024, 2, day, 15, 0, 0).unwrap(),
    }
}

fn alice() -> OwnerId {
    OwnerId::new("alice")
}

async fn sign_in(engine: &SyncEngine, owner: OwnerId) -> SessionOutcome {
    engine
        .handle_session(SessionEvent::Established(owner))
        .await
        .unwrap()
}

fn remote_ids(remote: &MemoryRemote, owner: &OwnerId) -> HashSet<RecordId> {
    remote.rows_for(owner).iter().map(|r| r.id).collect()
}

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let remote = Arc::new(MemoryRemote::new());
    remote.seed([to_remote(&record("Phone", 500.0, 2), &alice())]);
    let engine = engine_with(
        MergeStrategy::RemoteWins,
        &[record("Cable", 9.0, 1), record("Charger", 25.0, 3)],
        remote.clone(),
    );

    sign_in(&engine, alice()).await;
    let once = engine.records();

    let report = engine.reconcile().await.unwrap();
    assert_eq!(engine.records(), once);
    assert!(report.migrated.is_empty());
    assert!(report.overridden.is_empty());
    assert_eq!(report.total, 3);
}

#[tokio::test]
async fn test_every_local_only_record_migrates() {
    let remote = Arc::new(MemoryRemote::new());
    let shared = record("Phone", 500.0, 2);
    remote.seed([to_remote(&shared, &alice())]);
    let local_only: Vec<Record> = (1..=5)
        .map(|day| record(&format!("Item {day}"), day as f64, day))
        .collect();

    let mut local = local_only.clone();
    local.push(shared.clone());
    let engine = engine_with(MergeStrategy::RemoteWins, &local, remote.clone());

    let SessionOutcome::Reconciled(report) = sign_in(&engine, alice()).await else {
        panic!("reconciliation failed");
    };

    let on_remote = remote_ids(&remote, &alice());
    for r in &local_only {
        assert!(on_remote.contains(&r.id));
    }
    assert_eq!(report.migrated.len(), 5);
    assert_eq!(remote.calls(RemoteOp::UpsertMany), 1);
    assert_eq!(engine.records().len(), 6);
}

#[tokio::test]
async fn test_remote_only_records_are_kept() {
    let remote = Arc::new(MemoryRemote::new());
    let theirs = record("Phone", 500.0, 2);
    remote.seed([to_remote(&theirs, &alice())]);
    let engine = engine_with(MergeStrategy::RemoteWins, &[], remote.clone());

    let SessionOutcome::Reconciled(report) = sign_in(&engine, alice()).await else {
        panic!("reconciliation failed");
    };

    assert_eq!(report.remote_only, vec![theirs.id]);
    assert_eq!(engine.records(), vec![theirs]);
    assert_eq!(remote.calls(RemoteOp::UpsertMany), 0);
}

#[tokio::test]
async fn test_remote_wins_by_default() {
    let ours = record("Laptop", 900.0, 4);
    let mut theirs = ours.clone();
    theirs.amount = 950.0;
    theirs.location = Some("Shop".into());

    let remote = Arc::new(MemoryRemote::new());
    remote.seed([to_remote(&theirs, &alice())]);
    let engine = engine_with(MergeStrategy::default(), &[ours.clone()], remote.clone());

    let SessionOutcome::Reconciled(report) = sign_in(&engine, alice()).await else {
        panic!("reconciliation failed");
    };

    assert_eq!(report.overridden, vec![ours.id]);
    assert_eq!(engine.get(&ours.id), Some(theirs));
    assert_eq!(remote.calls(RemoteOp::UpsertMany), 0);
}

#[tokio::test]
async fn test_local_wins_uploads_local_copy() {
    let ours = record("Laptop", 900.0, 4);
    let mut theirs = ours.clone();
    theirs.amount = 950.0;

    let remote = Arc::new(MemoryRemote::new());
    remote.seed([to_remote(&theirs, &alice())]);
    let engine = engine_with(MergeStrategy::LocalWins, &[ours.clone()], remote.clone());

    sign_in(&engine, alice()).await;

    assert_eq!(engine.get(&ours.id), Some(ours.clone()));
    assert_eq!(remote.get(&ours.id).unwrap().price, 900.0);
}

#[tokio::test]
async fn test_field_merge_fills_missing_location() {
    let mut ours = record("Laptop", 900.0, 4);
    ours.location = Some("Airport".into());
    let mut theirs = ours.clone();
    theirs.location = None;
    theirs.name = "Work laptop".into();

    let remote = Arc::new(MemoryRemote::new());
    remote.seed([to_remote(&theirs, &alice())]);
    let engine = engine_with(MergeStrategy::FieldMerge, &[ours.clone()], remote.clone());

    sign_in(&engine, alice()).await;

    let merged = engine.get(&ours.id).unwrap();
    assert_eq!(merged.name, "Work laptop");
    assert_eq!(merged.location.as_deref(), Some("Airport"));
    assert_eq!(remote.get(&ours.id).unwrap().place, "Airport");
}

#[tokio::test]
async fn test_concurrent_reconciliations_share_one_pass() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(30)));
    let engine = engine_with(MergeStrategy::RemoteWins, &[record("Cable", 9.0, 1)], remote.clone());
    sign_in(&engine, alice()).await;
    let fetches = remote.calls(RemoteOp::FetchAll);

    let (a, b) = tokio::join!(engine.reconcile(), engine.reconcile());

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(remote.calls(RemoteOp::FetchAll), fetches + 2);
}

#[tokio::test]
async fn test_owner_switch_discards_stale_pass() {
    let remote = Arc::new(MemoryRemote::with_latency(Duration::from_millis(40)));
    remote.seed([to_remote(&record("Phone", 500.0, 2), &alice())]);
    let engine = engine_with(MergeStrategy::RemoteWins, &[], remote.clone());

    let (first, second) = tokio::join!(sign_in(&engine, alice()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        sign_in(&engine, OwnerId::new("bob")).await
    });

    match first {
        SessionOutcome::Reconciled(report) => assert!(!report.applied),
        other => panic!("unexpected outcome: {other:?}"),
    }
    match second {
        SessionOutcome::Reconciled(report) => assert!(report.applied),
        other => panic!("unexpected outcome: {other:?}"),
    }

    // Bob sees his own (empty) set, not alice's.
    assert!(engine.records().is_empty());
    assert_eq!(engine.session_owner(), Some(OwnerId::new("bob")));
}

#[tokio::test]
async fn test_owner_switch_leaves_previous_owners_rows() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_with(MergeStrategy::RemoteWins, &[], remote.clone());
    let bob = OwnerId::new("bob");

    let cable = engine
        .create(ExpenseDraft::new(
            "Cable",
            9.0,
            Category::Electronics,
            Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
        ))
        .unwrap();
    sign_in(&engine, alice()).await;
    assert_eq!(remote_ids(&remote, &alice()), HashSet::from([cable.id]));

    engine.handle_session(SessionEvent::Cleared).await.unwrap();
    let outcome = sign_in(&engine, bob.clone()).await;

    match outcome {
        SessionOutcome::ReconcileFailed(error) => assert!(!error.is_retryable()),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(remote_ids(&remote, &alice()), HashSet::from([cable.id]));
    assert!(remote_ids(&remote, &bob).is_empty());
    assert_eq!(engine.records(), vec![cable]);
}

#[tokio::test]
async fn test_sign_in_with_offline_edits() {
    let remote = Arc::new(MemoryRemote::new());
    let engine = engine_with(MergeStrategy::RemoteWins, &[], remote.clone());

    let cable = engine
        .create(ExpenseDraft::new(
            "Cable",
            9.0,
            Category::Electronics,
            Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap(),
        ))
        .unwrap();
    assert_eq!(remote.total_calls(), 0);

    sign_in(&engine, alice()).await;

    assert_eq!(remote_ids(&remote, &alice()), HashSet::from([cable.id]));
    assert_eq!(engine.records(), vec![cable]);
    // The pass itself, not the outbox, carried the record.
    assert!(engine.pending_intents().is_empty());
}
