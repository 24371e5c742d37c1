mod support;

use std::time::Duration;

use chrono::Utc;
use smartevents_core::WorkError;
use smartevents_core::model::{
    Bridge, ManagedResourceStatus, OwnerId, ResourceType, WorkItem,
};
use smartevents_core::resources::ResourceRepository;
use smartevents_core::work::{DispatchStatus, WorkConfig, WorkRepository};

use support::{Harness, OWNER, SHARD, test_config};

#[tokio::test]
async fn schedule_twice_returns_the_same_item() {
    let harness = Harness::new();
    let bridge = harness
        .resources
        .persist_bridge(Bridge::new("orders", "customer-1", SHARD))
        .await
        .expect("persist bridge");

    let first = harness.manager.schedule(&bridge).await.expect("schedule");
    let second = harness.manager.schedule(&bridge).await.expect("reschedule");

    assert_eq!(first.id, second.id);
    assert_eq!(first.owner_id, OwnerId::new(OWNER));
    assert_eq!(first.resource_type, ResourceType::Bridge);
    assert_eq!(harness.ledger.len().await, 1);
}

#[tokio::test]
async fn complete_is_idempotent() {
    let harness = Harness::new();
    let bridge = harness.create_bridge(Bridge::new("orders", "c", SHARD)).await;
    let item = harness.work_for(bridge.id).await.expect("work scheduled");

    assert!(harness.manager.complete(&item).await.expect("first complete"));
    assert!(!harness.manager.complete(&item).await.expect("second complete"));
    assert!(harness.ledger.is_empty().await);
}

#[tokio::test]
async fn record_attempt_does_not_resurrect_completed_work() {
    let harness = Harness::new();
    let bridge = harness.create_bridge(Bridge::new("orders", "c", SHARD)).await;
    let item = harness.work_for(bridge.id).await.expect("work scheduled");

    harness.manager.complete(&item).await.expect("complete");
    let recorded = harness
        .manager
        .record_attempt(&item)
        .await
        .expect("record attempt");

    assert!(recorded.is_none());
    assert!(!harness.manager.exists(&item).await.expect("exists"));
    assert!(harness.work_for(bridge.id).await.is_none());
}

#[tokio::test]
async fn record_attempt_bumps_attempts_and_modified_at() {
    let harness = Harness::new();
    let bridge = harness.create_bridge(Bridge::new("orders", "c", SHARD)).await;
    let item = harness.work_for(bridge.id).await.expect("work scheduled");

    let updated = harness
        .manager
        .record_attempt(&item)
        .await
        .expect("record attempt")
        .expect("item still exists");

    assert_eq!(updated.attempts, item.attempts + 1);
    assert!(updated.modified_at >= item.modified_at);
    assert_eq!(updated.submitted_at, item.submitted_at);
}

#[tokio::test]
async fn orphaned_work_is_adopted_and_then_dispatched() {
    let harness = Harness::new();
    let bridge = harness
        .resources
        .persist_bridge(Bridge::new("orders", "customer-1", SHARD))
        .await
        .expect("persist bridge");

    let mut orphan = WorkItem::for_resource(&bridge, OwnerId::new("manager-dead"));
    orphan.modified_at = Utc::now() - chrono::Duration::minutes(10);
    harness.ledger.persist(orphan).await.expect("seed orphan");

    // Not ours yet: the dispatch tick ignores it.
    assert_eq!(harness.tick().await, 0);

    let adopted = harness.manager.rebalance_orphans().await.expect("rebalance");
    assert_eq!(adopted, 1);

    let item = harness.work_for(bridge.id).await.expect("work kept");
    assert_eq!(item.owner_id, OwnerId::new(OWNER));

    assert_eq!(harness.tick().await, 1);
    let bridge = harness.bridge(bridge.id).await.expect("bridge");
    assert_eq!(bridge.status, ManagedResourceStatus::Preparing);
}

#[tokio::test]
async fn fresh_work_of_another_owner_is_left_alone() {
    let harness = Harness::new();
    let bridge = harness
        .resources
        .persist_bridge(Bridge::new("orders", "customer-1", SHARD))
        .await
        .expect("persist bridge");
    let other = WorkItem::for_resource(&bridge, OwnerId::new("manager-alive"));
    harness.ledger.persist(other).await.expect("seed");

    assert_eq!(harness.manager.rebalance_orphans().await.expect("rebalance"), 0);
    let item = harness.work_for(bridge.id).await.expect("work kept");
    assert_eq!(item.owner_id, OwnerId::new("manager-alive"));
}

#[tokio::test]
async fn dispatch_of_missing_resource_fails_loudly() {
    let harness = Harness::new();
    let bridge = Bridge::new("ghost", "customer-1", SHARD);
    // Work without a backing resource row.
    let item = harness
        .ledger
        .persist(WorkItem::for_resource(&bridge, OwnerId::new(OWNER)))
        .await
        .expect("seed");

    let status = harness.manager.dispatch(item.clone()).await;
    assert!(matches!(status, DispatchStatus::Failed { .. }));

    // The ledger is untouched; the item stays for an operator to inspect.
    let stored = harness.work_for(bridge.id).await.expect("still there");
    assert_eq!(stored.attempts, 0);
}

#[tokio::test]
async fn statuses_owned_elsewhere_keep_work_alive() {
    let harness = Harness::new();
    let bridge = harness.ready_bridge().await;
    harness.manager.schedule(&bridge).await.expect("schedule");

    for _ in 0..3 {
        harness.tick().await;
    }

    let item = harness.work_for(bridge.id).await.expect("work kept");
    assert_eq!(item.attempts, 3);
    let stored = harness.bridge(bridge.id).await.expect("bridge");
    assert_eq!(stored.status, ManagedResourceStatus::Ready);
    assert_eq!(harness.topics.create_calls(), 0);
}

#[tokio::test]
async fn attempt_cutoff_fails_the_resource() {
    let harness = Harness::with_config(WorkConfig {
        max_attempts: Some(2),
        ..test_config()
    });
    harness.topics.set_failing(true);
    let bridge = harness.create_bridge(Bridge::new("orders", "c", SHARD)).await;

    harness.tick().await;
    harness.tick().await;
    assert!(harness.work_for(bridge.id).await.is_some());

    harness.tick().await;
    assert!(harness.work_for(bridge.id).await.is_none());
    let stored = harness.bridge(bridge.id).await.expect("bridge");
    assert_eq!(stored.status, ManagedResourceStatus::Failed);
    assert_eq!(stored.dependency_status, Some(ManagedResourceStatus::Failed));
}

#[tokio::test]
async fn schedule_fires_immediately_when_enabled() {
    let harness = Harness::with_config(WorkConfig {
        dispatch_on_schedule: true,
        ..test_config()
    });
    let bridge = harness.create_bridge(Bridge::new("orders", "c", SHARD)).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let dispatched = harness
                .bridge(bridge.id)
                .await
                .and_then(|b| b.dependency_status)
                .is_some();
            if dispatched {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("scheduled work should be dispatched without a tick");

    let stored = harness.bridge(bridge.id).await.expect("bridge");
    assert_eq!(stored.status, ManagedResourceStatus::Preparing);
}

#[tokio::test]
async fn concurrent_schedulers_cannot_duplicate_work() {
    let harness = Harness::new();
    let bridge = harness
        .resources
        .persist_bridge(Bridge::new("orders", "customer-1", SHARD))
        .await
        .expect("persist bridge");

    let ours = WorkItem::for_resource(&bridge, OwnerId::new(OWNER));
    let theirs = WorkItem::for_resource(&bridge, OwnerId::new("manager-b"));
    harness.ledger.persist(ours).await.expect("first insert");
    let err = harness
        .ledger
        .persist(theirs)
        .await
        .expect_err("second insert must conflict");
    assert!(matches!(err, WorkError::Conflict(_)));
}

#[tokio::test]
async fn drain_waits_for_fired_dispatches() {
    let harness = Harness::with_config(WorkConfig {
        dispatch_on_schedule: true,
        ..test_config()
    });
    harness.topics.set_latency(Duration::from_millis(100));
    let bridge = harness.create_bridge(Bridge::new("orders", "c", SHARD)).await;

    harness.manager.drain().await;

    assert_eq!(harness.topics.create_calls(), 2);
    let item = harness.work_for(bridge.id).await.expect("work kept");
    assert_eq!(item.attempts, 1);
    let stored = harness.bridge(bridge.id).await.expect("bridge");
    assert_eq!(stored.status, ManagedResourceStatus::Preparing);
}

#[tokio::test]
async fn oversized_orphan_lease_adopts_nothing() {
    for orphan_lease_secs in [1_000_000_000_000_000, u64::MAX] {
        let harness = Harness::with_config(WorkConfig {
            orphan_lease_secs,
            ..test_config()
        });
        let bridge = harness
            .resources
            .persist_bridge(Bridge::new("orders", "customer-1", SHARD))
            .await
            .expect("persist bridge");
        let mut orphan = WorkItem::for_resource(&bridge, OwnerId::new("manager-dead"));
        orphan.modified_at = Utc::now() - chrono::Duration::days(365);
        harness.ledger.persist(orphan).await.expect("seed orphan");

        assert_eq!(harness.manager.rebalance_orphans().await.expect("rebalance"), 0);
        let item = harness.work_for(bridge.id).await.expect("work kept");
        assert_eq!(item.owner_id, OwnerId::new("manager-dead"));
    }
}
