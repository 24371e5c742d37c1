#![cfg(feature = "database")]

use chrono::Utc;
use serde_json::json;
use smartevents_core::WorkError;
use smartevents_core::model::{
    Action, Bridge, ConnectorEntity, ConnectorType, ManagedResourceStatus, OwnerId,
    Processor, ProcessorType, WorkItem,
};
use smartevents_core::resources::{PostgresResourceRepository, ResourceRepository};
use smartevents_core::work::{PostgresWorkRepository, WorkRepository};
use sqlx::PgPool;

async fn ledger(pool: &PgPool) -> PostgresWorkRepository {
    PostgresWorkRepository::new(pool.clone())
        .await
        .expect("work ledger")
}

#[sqlx::test(migrator = "smartevents_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn persist_bumps_version_and_rejects_stale_writes(pool: PgPool) {
    let ledger = ledger(&pool).await;
    let bridge = Bridge::new("orders", "customer-1", "shard-a");

    let inserted = ledger
        .persist(WorkItem::for_resource(&bridge, OwnerId::new("manager-a")))
        .await
        .expect("insert");

    let mut attempt = inserted.clone();
    attempt.attempts += 1;
    attempt.modified_at = Utc::now();
    let updated = ledger.persist(attempt).await.expect("update");
    assert_eq!(updated.attempts, 1);
    assert_eq!(updated.version, inserted.version + 1);

    // A writer still holding the old version loses.
    let err = ledger.persist(inserted).await.expect_err("stale write");
    assert!(matches!(err, WorkError::Conflict(_)));

    let stored = ledger
        .find_by_resource_id(bridge.id)
        .await
        .expect("lookup")
        .expect("stored");
    assert_eq!(stored.version, updated.version);
}

#[sqlx::test(migrator = "smartevents_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn one_work_item_per_resource(pool: PgPool) {
    let ledger = ledger(&pool).await;
    let bridge = Bridge::new("orders", "customer-1", "shard-a");

    ledger
        .persist(WorkItem::for_resource(&bridge, OwnerId::new("manager-a")))
        .await
        .expect("first insert");
    let err = ledger
        .persist(WorkItem::for_resource(&bridge, OwnerId::new("manager-b")))
        .await
        .expect_err("duplicate insert");
    assert!(matches!(err, WorkError::Conflict(_)));
}

#[sqlx::test(migrator = "smartevents_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn reassign_stale_only_claims_old_foreign_rows(pool: PgPool) {
    let ledger = ledger(&pool).await;
    let me = OwnerId::new("manager-a");
    let dead = OwnerId::new("manager-dead");

    let mut stale = WorkItem::for_resource(&Bridge::new("a", "c", "s"), dead.clone());
    stale.modified_at = Utc::now() - chrono::Duration::minutes(10);
    let stale = ledger.persist(stale).await.expect("stale");

    let fresh = ledger
        .persist(WorkItem::for_resource(&Bridge::new("b", "c", "s"), dead.clone()))
        .await
        .expect("fresh");

    let mut own = WorkItem::for_resource(&Bridge::new("c", "c", "s"), me.clone());
    own.modified_at = Utc::now() - chrono::Duration::minutes(10);
    ledger.persist(own).await.expect("own");

    let cutoff = Utc::now() - chrono::Duration::minutes(5);
    assert_eq!(ledger.reassign_stale(&me, cutoff).await.expect("reassign"), 1);

    let claimed = ledger.find_by_id(stale.id).await.expect("lookup").expect("row");
    assert_eq!(claimed.owner_id, me);
    assert!(claimed.modified_at > cutoff);
    assert_eq!(claimed.version, stale.version + 1);

    let untouched = ledger.find_by_id(fresh.id).await.expect("lookup").expect("row");
    assert_eq!(untouched.owner_id, dead);

    assert_eq!(ledger.find_by_owner_id(&me).await.expect("owned").len(), 2);
    assert!(ledger.delete_by_id(stale.id).await.expect("delete"));
    assert!(!ledger.delete_by_id(stale.id).await.expect("delete again"));
}

#[sqlx::test(migrator = "smartevents_core::MIGRATOR")]
#[ignore = "requires DATABASE_URL"]
async fn resources_round_trip_through_postgres(pool: PgPool) {
    let resources = PostgresResourceRepository::new(pool);
    let bridge = resources
        .persist_bridge(
            Bridge::new("orders", "customer-1", "shard-a")
                .with_error_handler(Action::new("webhook", json!({"endpoint": "x"}))),
        )
        .await
        .expect("bridge");
    assert!(bridge.modified_at.is_some());

    let handler = resources
        .persist_processor(Processor::new(
            &bridge,
            "handler",
            ProcessorType::ErrorHandler,
            json!({}),
        ))
        .await
        .expect("processor");
    let mut sink = Processor::new(&bridge, "sink", ProcessorType::Sink, json!({}));
    sink.status = ManagedResourceStatus::Ready;
    let sink = resources.persist_processor(sink).await.expect("processor");

    let connector = resources
        .persist_connector(ConnectorEntity::new(
            &sink,
            ConnectorType::Sink,
            "ob-topic",
            json!({"channel": "alerts"}),
        ))
        .await
        .expect("connector");

    let loaded = resources
        .find_bridge(bridge.id)
        .await
        .expect("lookup")
        .expect("bridge");
    assert_eq!(loaded.error_handler(), bridge.error_handler());

    let hidden = resources
        .find_hidden_processors(bridge.id)
        .await
        .expect("hidden");
    assert_eq!(hidden.len(), 1);
    assert_eq!(hidden[0].id, handler.id);

    let by_processor = resources
        .find_connector_by_processor(sink.id)
        .await
        .expect("lookup")
        .expect("connector");
    assert_eq!(by_processor.id, connector.id);
    assert_eq!(by_processor.definition, json!({"channel": "alerts"}));

    let on_shard = resources
        .find_processors_by_shard("shard-a")
        .await
        .expect("shard");
    assert_eq!(on_shard.len(), 2);

    // The connector keeps its processor alive.
    let err = resources
        .delete_processor(sink.id)
        .await
        .expect_err("processor still referenced");
    assert!(matches!(err, WorkError::Conflict(_)));

    assert!(resources.delete_connector(connector.id).await.expect("delete"));
    assert!(resources.delete_processor(sink.id).await.expect("delete"));
    assert!(resources.delete_processor(handler.id).await.expect("delete"));
    assert!(resources.delete_bridge(bridge.id).await.expect("delete"));
    assert!(resources.find_bridge(bridge.id).await.expect("lookup").is_none());
}
