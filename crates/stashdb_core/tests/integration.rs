//! Integration tests for collections, schema upgrades and retries.

use proptest::prelude::*;
use serde_json::json;
use stashdb_core::{Change, Config, CoreError, EventKind, LiveStore, RetryConfig, StoreEvent};
use stashdb_storage::{FaultPlan, OperationKind, StorageError};
use stashdb_testkit::{
    init_tracing, operation_sequence_strategy, replay, EventRecorder, PropTestConfig, TestDomain,
};
use std::time::{Duration, Instant};

#[tokio::test]
async fn crud_round_trip() {
    init_tracing();
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);

    store.add("t1", json!({"title": "write", "done": false})).await.unwrap();
    store.update("t1", json!({"done": true})).await.unwrap();
    assert_eq!(
        store.get("t1").await,
        Some(json!({"title": "write", "done": true}))
    );
    assert!(store.contains("t1").await);

    store.delete("t1").await.unwrap();
    assert_eq!(store.get("t1").await, None);
    assert_eq!(store.count().await, 0);
}

#[tokio::test]
async fn duplicate_add_is_a_validation_error() {
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);

    store.add("k", json!(1)).await.unwrap();
    let err = store.add("k", json!(2)).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }), "{err:?}");
    assert_eq!(err.name(), Some("ConstraintError"));

    store.add_or_update("k", json!(3)).await.unwrap();
    store.add_or_update("k", json!(4)).await.unwrap();
    assert_eq!(store.get("k").await, Some(json!(4)));
}

#[tokio::test]
async fn update_of_missing_key_publishes_only_an_error() {
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);
    let recorder = EventRecorder::attach(&store);

    let err = store.update("nope", json!({"x": 1})).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert_eq!(recorder.count(EventKind::Change), 0);
    assert_eq!(recorder.count(EventKind::Error), 1);
}

#[tokio::test]
async fn every_mutation_publishes_one_event() {
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);
    let recorder = EventRecorder::attach(&store);

    store.add("a", json!({"n": 1})).await.unwrap();
    store.add_or_update("b", json!({"n": 2})).await.unwrap();
    store.update("a", json!({"m": 1})).await.unwrap();
    store.delete("b").await.unwrap();
    store.clear().await.unwrap();
    store.destroy().await.unwrap();

    let events = recorder.events();
    assert_eq!(
        events,
        vec![
            StoreEvent::Change(Change::Add {
                key: "a".into(),
                value: json!({"n": 1}),
            }),
            StoreEvent::Change(Change::Upsert {
                key: "b".into(),
                value: json!({"n": 2}),
            }),
            StoreEvent::Change(Change::Update { key: "a".into() }),
            StoreEvent::Change(Change::Delete { key: "b".into() }),
            StoreEvent::Change(Change::Clear),
            StoreEvent::Change(Change::Destroy),
        ]
    );
}

#[tokio::test]
async fn destroy_then_reuse_starts_empty() {
    let domain = TestDomain::memory();
    let registry = domain.registry();
    let store = registry.store("todos", None);

    store.add("k", json!(1)).await.unwrap();
    let before = registry.db().version().unwrap();
    store.destroy().await.unwrap();
    assert!(registry.db().version().unwrap() > before);

    assert_eq!(store.count().await, 0);
    store.add("k", json!(2)).await.unwrap();
    assert_eq!(store.get("k").await, Some(json!(2)));
}

#[tokio::test]
async fn collections_have_independent_key_spaces() {
    let domain = TestDomain::memory();
    let registry = domain.registry();
    let a = registry.store("a", None);
    let b = registry.store("b", None);

    a.add("same", json!("a")).await.unwrap();
    b.add("same", json!("b")).await.unwrap();
    a.delete("same").await.unwrap();

    assert_eq!(a.get("same").await, None);
    assert_eq!(b.get("same").await, Some(json!("b")));
}

#[tokio::test]
async fn conflicts_are_retried_three_times() {
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);
    assert_eq!(store.count().await, 0);

    let plan = FaultPlan::new()
        .in_store("todos")
        .fail_always(
            OperationKind::Add,
            StorageError::InvalidState("connection is closing".into()),
        )
        .shared();
    domain.factory.set_fault_hook(Some(plan.hook()));
    let recorder = EventRecorder::attach(&store);

    let err = store.add("k", json!(1)).await.unwrap_err();
    assert!(err.is_conflict());
    assert_eq!(plan.attempts(OperationKind::Add), 4);
    assert_eq!(recorder.count(EventKind::Error), 1);
}

#[tokio::test]
async fn transient_conflict_is_absorbed() {
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);

    let plan = FaultPlan::new()
        .in_store("todos")
        .fail_times(
            OperationKind::Put,
            StorageError::TransactionInactive("transaction finished".into()),
            2,
        )
        .shared();
    domain.factory.set_fault_hook(Some(plan.hook()));

    store.add_or_update("k", json!(1)).await.unwrap();
    assert_eq!(plan.attempts(OperationKind::Put), 3);
    assert_eq!(store.get("k").await, Some(json!(1)));
}

#[tokio::test]
async fn non_conflict_error_surfaces_without_delay() {
    let domain = TestDomain::memory();
    let delay = Duration::from_millis(500);
    let registry = domain.registry_with(Config::default().retry(RetryConfig::new().delay(delay)));
    let store = registry.store("todos", None);
    assert_eq!(store.count().await, 0);

    let plan = FaultPlan::new()
        .in_store("todos")
        .fail_always(OperationKind::Put, StorageError::Data("unserializable".into()))
        .shared();
    domain.factory.set_fault_hook(Some(plan.hook()));

    let started = Instant::now();
    let err = store.add_or_update("k", json!(1)).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
    assert_eq!(plan.attempts(OperationKind::Put), 1);
    assert!(started.elapsed() < delay);
}

#[tokio::test]
async fn failing_read_returns_default_and_reports() {
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);
    store.add("k", json!(1)).await.unwrap();

    let plan = FaultPlan::new()
        .in_store("todos")
        .fail_always(OperationKind::Cursor, StorageError::Io("disk gone".into()))
        .shared();
    domain.factory.set_fault_hook(Some(plan.hook()));
    let recorder = EventRecorder::attach(&store);

    assert!(store.list().await.is_empty());
    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StoreEvent::Error(CoreError::Storage { .. })));
}

#[tokio::test]
async fn concurrent_registration_runs_one_upgrade() {
    let domain = TestDomain::memory();
    let registry = domain.registry();
    let db = registry.db().clone();
    db.create_store("a", None).await.unwrap();
    assert_eq!(db.version(), Some(2));

    let (first, second) = tokio::join!(db.create_store("b", None), db.create_store("b", None));
    first.unwrap();
    second.unwrap();

    assert_eq!(db.version(), Some(3));
    assert_eq!(db.stats().upgrades, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn contexts_sharing_a_database_converge() {
    let domain = TestDomain::memory();
    let first = domain.registry();
    let second = domain.registry();

    let a = first.store("a", None);
    a.add("k", json!("from first")).await.unwrap();

    let b = second.store("b", None);
    b.add("k", json!("from second")).await.unwrap();

    // The second context's upgrade closed the first context's connection.
    assert_eq!(a.get("k").await, Some(json!("from first")));
    assert!(first.db().stats().version_changes >= 1);
    assert_eq!(first.db().version(), second.db().version());

    let (first_c, second_c) = (first.store("c", None), second.store("c", None));
    let (x, y) = tokio::join!(first_c.count(), second_c.count());
    assert_eq!((x, y), (0, 0));
    assert_eq!(first.db().version(), second.db().version());
}

#[tokio::test]
async fn unknown_collection_lists_available_ones() {
    let domain = TestDomain::memory();
    let registry = domain.registry();
    registry.store("a", None).count().await;
    registry.store("b", None).count().await;

    let err = registry.db().store_handle("missing").await.unwrap_err();
    assert_eq!(
        err,
        CoreError::not_found("Store \"missing\" not found in database. Available stores: a, b")
    );
}

#[tokio::test]
async fn data_survives_restart() {
    let domain = TestDomain::on_disk();
    {
        let registry = domain.registry();
        let store = registry.store("todos", None);
        store.add("t1", json!({"title": "persist"})).await.unwrap();
        store.update("t1", json!({"done": true})).await.unwrap();
        registry.store("other", None).add("x", json!(1)).await.unwrap();
        registry.reset();
    }

    let domain = domain.restart();
    let registry = domain.registry();
    let store = registry.store("todos", None);
    assert_eq!(
        store.get("t1").await,
        Some(json!({"title": "persist", "done": true}))
    );
    // Both collections already exist, so no upgrade is needed.
    assert_eq!(registry.db().stats().upgrades, 0);
    assert_eq!(registry.db().version(), Some(3));
}

#[tokio::test]
async fn live_store_follows_changes() {
    let domain = TestDomain::memory();
    let store = domain.registry().store("todos", None);
    let live = LiveStore::attach(store.clone());
    live.settled().await;
    assert!(live.values().is_empty());

    store.add("a", json!({"n": 1})).await.unwrap();
    live.settled().await;
    assert_eq!(live.values().len(), 1);

    store.clear().await.unwrap();
    live.settled().await;
    assert!(live.values().is_empty());
    assert!(live.error().is_none());
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn store_matches_model(ops in operation_sequence_strategy(1, 40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let domain = TestDomain::memory();
            let store = domain.registry().store("model", None);
            replay(&store, &ops).await;
        });
    }
}
