//! Shared harness for engine integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::json;
use smartevents_core::model::{
    Bridge, ConnectorEntity, ConnectorType, ManagedResourceStatus, Processor,
    ProcessorType, ResourceId, ResourceType, WorkItem,
};
use smartevents_core::providers::{
    InMemoryConnectorsApi, InMemoryTopicService, ResourceNames,
};
use smartevents_core::resources::{InMemoryResourceRepository, ResourceRepository};
use smartevents_core::shard::{ResourceStatusUpdate, ShardResourceService};
use smartevents_core::work::{
    InMemoryWorkRepository, WorkConfig, WorkManager, WorkRepository,
};
use smartevents_core::workers::WorkerSet;

pub const SHARD: &str = "shard-a";
pub const OWNER: &str = "manager-test";

/// Engine wired over in-memory stores and providers. Immediate dispatch on
/// schedule is off so tests drive every tick explicitly.
pub struct Harness {
    pub manager: WorkManager,
    pub ledger: InMemoryWorkRepository,
    pub resources: InMemoryResourceRepository,
    pub topics: InMemoryTopicService,
    pub connectors: InMemoryConnectorsApi,
    pub shard: ShardResourceService,
}

pub fn test_config() -> WorkConfig {
    WorkConfig {
        worker_id: Some(OWNER.to_string()),
        dispatch_on_schedule: false,
        ..WorkConfig::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: WorkConfig) -> Self {
        let ledger = InMemoryWorkRepository::new();
        let resources = InMemoryResourceRepository::new();
        let topics = InMemoryTopicService::new();
        let connectors = InMemoryConnectorsApi::new();

        let resources_dyn: Arc<dyn ResourceRepository> = Arc::new(resources.clone());
        let workers = WorkerSet::new(
            Arc::clone(&resources_dyn),
            Arc::new(topics.clone()),
            Arc::new(connectors.clone()),
            ResourceNames::default(),
        );
        let manager = WorkManager::new(Arc::new(ledger.clone()), workers, config);

        Self {
            manager,
            ledger,
            resources,
            topics,
            connectors,
            shard: ShardResourceService::new(resources_dyn),
        }
    }

    /// One dispatch tick over everything this process owns.
    pub async fn tick(&self) -> usize {
        self.manager
            .dispatch_owned()
            .await
            .expect("dispatch tick should not fail")
    }

    pub async fn work_for(&self, id: ResourceId) -> Option<WorkItem> {
        self.ledger
            .find_by_resource_id(id)
            .await
            .expect("ledger lookup")
    }

    pub async fn bridge(&self, id: ResourceId) -> Option<Bridge> {
        self.resources.find_bridge(id).await.expect("bridge lookup")
    }

    pub async fn processor(&self, id: ResourceId) -> Option<Processor> {
        self.resources.find_processor(id).await.expect("processor lookup")
    }

    pub async fn connector(&self, id: ResourceId) -> Option<ConnectorEntity> {
        self.resources.find_connector(id).await.expect("connector lookup")
    }

    pub async fn hidden_processors(&self, bridge_id: ResourceId) -> Vec<Processor> {
        self.resources
            .find_hidden_processors(bridge_id)
            .await
            .expect("hidden processor lookup")
    }

    pub async fn create_bridge(&self, bridge: Bridge) -> Bridge {
        let bridge = self
            .resources
            .persist_bridge(bridge)
            .await
            .expect("persist bridge");
        self.manager.schedule(&bridge).await.expect("schedule bridge");
        bridge
    }

    /// Persists a sink processor with a managed connector and schedules the
    /// processor.
    pub async fn create_processor_with_connector(
        &self,
        bridge: &Bridge,
    ) -> (Processor, ConnectorEntity) {
        let processor = self
            .resources
            .persist_processor(Processor::new(
                bridge,
                "slack",
                ProcessorType::Sink,
                json!({"channel": "alerts"}),
            ))
            .await
            .expect("persist processor");
        let connector = self
            .resources
            .persist_connector(ConnectorEntity::new(
                &processor,
                ConnectorType::Sink,
                format!("ob-{}", processor.id),
                json!({"channel": "alerts"}),
            ))
            .await
            .expect("persist connector");
        self.manager
            .schedule(&processor)
            .await
            .expect("schedule processor");
        (processor, connector)
    }

    /// Stores a bridge that is already deployed, bypassing the workers.
    pub async fn ready_bridge(&self) -> Bridge {
        let mut bridge = Bridge::new("orders", "customer-1", SHARD);
        bridge.status = ManagedResourceStatus::Ready;
        bridge.dependency_status = Some(ManagedResourceStatus::Ready);
        self.resources
            .persist_bridge(bridge)
            .await
            .expect("persist bridge")
    }

    /// Plays the shard: reports `status` for the resource.
    pub async fn shard_reports(
        &self,
        id: ResourceId,
        resource_type: ResourceType,
        status: ManagedResourceStatus,
    ) {
        self.shard
            .update_status(ResourceStatusUpdate {
                id,
                resource_type,
                status,
                error: None,
            })
            .await
            .expect("shard status update");
    }
}
