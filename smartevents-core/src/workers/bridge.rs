use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use smartevents_model::{
    Bridge, ManagedResource, ManagedResourceStatus, Processor, ResourceId, WorkItem,
};
use tracing::{debug, info};

use crate::error::Result;
use crate::processors::ProcessorService;
use crate::providers::{ResourceNames, TopicAccessType, TopicService, TopicStatus};
use crate::resources::ResourceRepository;
use crate::work::WorkManager;

use super::Worker;

/// Provisions a bridge's data and error topics and keeps its hidden
/// error-handler processor in line with the bridge definition.
#[derive(Clone)]
pub struct BridgeWorker {
    resources: Arc<dyn ResourceRepository>,
    topics: Arc<dyn TopicService>,
    names: ResourceNames,
    processors: ProcessorService,
}

impl fmt::Debug for BridgeWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeWorker")
            .field("names", &self.names)
            .finish_non_exhaustive()
    }
}

impl BridgeWorker {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        topics: Arc<dyn TopicService>,
        names: ResourceNames,
        processors: ProcessorService,
    ) -> Self {
        Self {
            resources,
            topics,
            names,
            processors,
        }
    }

    async fn create_topics(&self, bridge: &Bridge) -> Result<bool> {
        let data = self
            .topics
            .create_topic_and_grant_access(
                &self.names.bridge_topic_name(bridge.id),
                TopicAccessType::ConsumerAndProducer,
            )
            .await?;
        let errors = self
            .topics
            .create_topic_and_grant_access(
                &self.names.bridge_error_topic_name(bridge.id),
                TopicAccessType::ConsumerAndProducer,
            )
            .await?;
        Ok(data == TopicStatus::Ready && errors == TopicStatus::Ready)
    }

    async fn delete_topics(&self, bridge: &Bridge) -> Result<()> {
        self.topics
            .delete_topic_and_revoke_access(
                &self.names.bridge_topic_name(bridge.id),
                TopicAccessType::ConsumerAndProducer,
            )
            .await?;
        self.topics
            .delete_topic_and_revoke_access(
                &self.names.bridge_error_topic_name(bridge.id),
                TopicAccessType::ConsumerAndProducer,
            )
            .await?;
        Ok(())
    }

    /// Creates, updates or deletes the error-handler processor so it matches
    /// the bridge definition. A bridge owns at most one.
    async fn reconcile_error_handler(
        &self,
        manager: &WorkManager,
        bridge: &Bridge,
    ) -> Result<()> {
        let Some(action) = bridge.error_handler() else {
            return self.delete_error_handlers(manager, bridge.id).await;
        };

        let hidden = self.processors.hidden_processors(bridge.id).await?;
        if hidden.is_empty() {
            self.processors
                .create_error_handler_processor(manager, bridge, action)
                .await?;
            return Ok(());
        }

        let stale = hidden
            .into_iter()
            .find(Processor::is_actionable)
            .filter(|handler| handler.generation < bridge.generation);
        if let Some(handler) = stale {
            self.processors
                .update_error_handler_processor(manager, bridge, handler, action)
                .await?;
        }
        Ok(())
    }

    /// Requests deletion of every actionable hidden processor. Processors
    /// still being provisioned are picked up by a later dispatch.
    async fn delete_error_handlers(
        &self,
        manager: &WorkManager,
        bridge_id: ResourceId,
    ) -> Result<()> {
        let hidden = self.processors.hidden_processors(bridge_id).await?;
        for processor in hidden.into_iter().filter(Processor::is_actionable) {
            self.processors.delete_processor(manager, processor).await?;
        }
        Ok(())
    }

    async fn error_handlers_ready(&self, bridge_id: ResourceId) -> Result<bool> {
        let hidden = self.processors.hidden_processors(bridge_id).await?;
        Ok(hidden.iter().all(Processor::is_actionable))
    }

    async fn error_handlers_deleted(&self, bridge_id: ResourceId) -> Result<bool> {
        Ok(self.processors.hidden_processors(bridge_id).await?.is_empty())
    }
}

#[async_trait]
impl Worker for BridgeWorker {
    type Resource = Bridge;

    async fn load(&self, id: ResourceId) -> Result<Option<Bridge>> {
        self.resources.find_bridge(id).await
    }

    async fn persist(&self, bridge: Bridge) -> Result<Bridge> {
        self.resources.persist_bridge(bridge).await
    }

    async fn create_dependencies(
        &self,
        manager: &WorkManager,
        _item: &WorkItem,
        mut bridge: Bridge,
    ) -> Result<Bridge> {
        info!("Creating dependencies for '{}' [{}]", bridge.name, bridge.id);

        // PROVISIONING on `status` belongs to the shard.
        bridge.status = ManagedResourceStatus::Preparing;
        bridge.dependency_status = Some(ManagedResourceStatus::Provisioning);
        let mut bridge = self.persist(bridge).await?;

        let topics_ready = self.create_topics(&bridge).await?;

        self.reconcile_error_handler(manager, &bridge).await?;

        // Users cannot change the error handler until it is available.
        if topics_ready && self.error_handlers_ready(bridge.id).await? {
            bridge.dependency_status = Some(ManagedResourceStatus::Ready);
        } else {
            debug!(
                bridge_id = %bridge.id,
                topics_ready,
                "Bridge dependencies still provisioning"
            );
        }

        self.persist(bridge).await
    }

    async fn delete_dependencies(
        &self,
        manager: &WorkManager,
        _item: &WorkItem,
        mut bridge: Bridge,
    ) -> Result<Bridge> {
        info!("Destroying dependencies for '{}' [{}]", bridge.name, bridge.id);

        bridge.dependency_status = Some(ManagedResourceStatus::Deleting);
        let mut bridge = self.persist(bridge).await?;

        // Error handler first so a topic failure does not strand it.
        self.delete_error_handlers(manager, bridge.id).await?;

        self.delete_topics(&bridge).await?;

        // The bridge record cannot go before its processors.
        if self.error_handlers_deleted(bridge.id).await? {
            bridge.dependency_status = Some(ManagedResourceStatus::Deleted);
        }

        self.persist(bridge).await
    }
}
