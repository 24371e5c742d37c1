use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use smartevents_model::{
    ConnectorEntity, ManagedResourceStatus, Processor, ResourceId, WorkItem,
};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::resources::ResourceRepository;
use crate::work::WorkManager;

use super::{ConnectorWorker, Worker};

/// Provisions a processor. Processors without a managed connector have no
/// external dependencies; the rest delegate to the [`ConnectorWorker`].
#[derive(Clone)]
pub struct ProcessorWorker {
    resources: Arc<dyn ResourceRepository>,
    connectors: ConnectorWorker,
}

impl fmt::Debug for ProcessorWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorWorker").finish_non_exhaustive()
    }
}

impl ProcessorWorker {
    pub fn new(resources: Arc<dyn ResourceRepository>, connectors: ConnectorWorker) -> Self {
        Self {
            resources,
            connectors,
        }
    }

    async fn connector_for(&self, processor: &Processor) -> Result<Option<ConnectorEntity>> {
        self.resources.find_connector_by_processor(processor.id).await
    }

    /// Mirrors the connector's status onto the processor. A failed connector
    /// fails the processor.
    async fn adopt(
        &self,
        mut processor: Processor,
        connector: &ConnectorEntity,
    ) -> Result<Processor> {
        processor.dependency_status = Some(connector.status);
        if connector.status == ManagedResourceStatus::Failed {
            warn!(
                processor_id = %processor.id,
                connector_id = %connector.id,
                error = connector.error.as_deref().unwrap_or("unknown"),
                "Connector failed; failing processor"
            );
            processor.status = ManagedResourceStatus::Failed;
        }
        self.persist(processor).await
    }
}

#[async_trait]
impl Worker for ProcessorWorker {
    type Resource = Processor;

    async fn load(&self, id: ResourceId) -> Result<Option<Processor>> {
        self.resources.find_processor(id).await
    }

    async fn persist(&self, processor: Processor) -> Result<Processor> {
        self.resources.persist_processor(processor).await
    }

    async fn create_dependencies(
        &self,
        manager: &WorkManager,
        item: &WorkItem,
        mut processor: Processor,
    ) -> Result<Processor> {
        info!(
            "Creating dependencies for '{}' [{}]",
            processor.name, processor.id
        );
        processor.status = ManagedResourceStatus::Preparing;
        let mut processor = self.persist(processor).await?;

        let Some(connector) = self.connector_for(&processor).await? else {
            debug!(
                "No dependencies required for '{}' [{}]",
                processor.name, processor.id
            );
            processor.dependency_status = Some(ManagedResourceStatus::Ready);
            return self.persist(processor).await;
        };

        processor.dependency_status = Some(ManagedResourceStatus::Provisioning);
        let processor = self.persist(processor).await?;

        // The shard deploys the processor once its connector is READY.
        let connector = self
            .connectors
            .create_dependencies(manager, item, connector)
            .await?;
        self.adopt(processor, &connector).await
    }

    async fn delete_dependencies(
        &self,
        manager: &WorkManager,
        item: &WorkItem,
        mut processor: Processor,
    ) -> Result<Processor> {
        info!(
            "Destroying dependencies for '{}' [{}]",
            processor.name, processor.id
        );

        let Some(connector) = self.connector_for(&processor).await? else {
            debug!(
                "No dependencies required for '{}' [{}]",
                processor.name, processor.id
            );
            processor.dependency_status = Some(ManagedResourceStatus::Deleted);
            return self.persist(processor).await;
        };

        processor.dependency_status = Some(ManagedResourceStatus::Deleting);
        let processor = self.persist(processor).await?;

        let connector = self
            .connectors
            .delete_dependencies(manager, item, connector)
            .await?;
        self.adopt(processor, &connector).await
    }
}
