use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use smartevents_model::{
    ConnectorEntity, ConnectorType, ManagedResource, ManagedResourceStatus,
    ResourceId, WorkItem,
};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::providers::{
    ConnectorState, ConnectorsApi, RemoteConnector, TopicAccessType, TopicService,
};
use crate::resources::ResourceRepository;
use crate::work::WorkManager;

use super::Worker;

/// Access the manager needs on a connector's topic: it consumes what source
/// connectors write and produces what sink connectors read.
pub fn topic_access_for(connector_type: ConnectorType) -> TopicAccessType {
    match connector_type {
        ConnectorType::Source => TopicAccessType::Consumer,
        ConnectorType::Sink => TopicAccessType::Producer,
    }
}

/// Drives a managed connector through the connector-management service,
/// which reports its progress asynchronously.
#[derive(Clone)]
pub struct ConnectorWorker {
    resources: Arc<dyn ResourceRepository>,
    topics: Arc<dyn TopicService>,
    connectors: Arc<dyn ConnectorsApi>,
}

impl fmt::Debug for ConnectorWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorWorker").finish_non_exhaustive()
    }
}

impl ConnectorWorker {
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        topics: Arc<dyn TopicService>,
        connectors: Arc<dyn ConnectorsApi>,
    ) -> Self {
        Self {
            resources,
            topics,
            connectors,
        }
    }

    /// Returns the remote connector, creating it when the service has none.
    async fn ensure_remote(
        &self,
        connector: &mut ConnectorEntity,
    ) -> Result<RemoteConnector> {
        let existing = self
            .connectors
            .get_connector(connector)
            .await?
            .filter(|remote| remote.state != ConnectorState::Deleted);

        let remote = match existing {
            Some(remote) => remote,
            None => {
                let created = self.connectors.create_connector(connector).await?;
                info!(
                    connector_id = %connector.id,
                    external_id = %created.id,
                    "Requested managed connector"
                );
                created
            }
        };

        if connector.connector_external_id.as_deref() != Some(remote.id.as_str()) {
            connector.connector_external_id = Some(remote.id.clone());
            *connector = self.persist(connector.clone()).await?;
        }
        Ok(remote)
    }

    /// Pushes the local definition when the owning processor moved to a newer
    /// generation. Identical definitions are not patched.
    async fn apply_generation(
        &self,
        connector: &mut ConnectorEntity,
        remote: RemoteConnector,
    ) -> Result<RemoteConnector> {
        let Some(processor) = self.resources.find_processor(connector.processor_id).await?
        else {
            return Ok(remote);
        };
        if processor.generation <= connector.generation {
            return Ok(remote);
        }

        let remote = if remote.definition != connector.definition {
            info!(
                connector_id = %connector.id,
                generation = processor.generation,
                "Updating managed connector definition"
            );
            self.connectors
                .update_connector(&remote.id, &connector.definition)
                .await?
        } else {
            debug!(connector_id = %connector.id, "Connector definition unchanged");
            remote
        };

        connector.generation = processor.generation;
        *connector = self.persist(connector.clone()).await?;
        Ok(remote)
    }
}

#[async_trait]
impl Worker for ConnectorWorker {
    type Resource = ConnectorEntity;

    async fn load(&self, id: ResourceId) -> Result<Option<ConnectorEntity>> {
        self.resources.find_connector(id).await
    }

    async fn persist(&self, connector: ConnectorEntity) -> Result<ConnectorEntity> {
        self.resources.persist_connector(connector).await
    }

    async fn create_dependencies(
        &self,
        _manager: &WorkManager,
        _item: &WorkItem,
        mut connector: ConnectorEntity,
    ) -> Result<ConnectorEntity> {
        info!(
            "Creating dependencies for '{}' [{}]",
            connector.name, connector.id
        );
        connector.status = ManagedResourceStatus::Preparing;
        connector.dependency_status = Some(ManagedResourceStatus::Provisioning);
        let mut connector = self.persist(connector).await?;

        // Granting is idempotent; a pending topic does not block the connector.
        self.topics
            .create_topic_and_grant_access(
                &connector.topic_name,
                topic_access_for(connector.connector_type),
            )
            .await?;

        let remote = self.ensure_remote(&mut connector).await?;
        let remote = self.apply_generation(&mut connector, remote).await?;

        match remote.state {
            ConnectorState::Ready => {
                connector.status = ManagedResourceStatus::Ready;
                connector.dependency_status = Some(ManagedResourceStatus::Ready);
                connector.error = None;
                connector.mark_published();
            }
            ConnectorState::Failed => {
                let error = remote
                    .error
                    .unwrap_or_else(|| "connector reported FAILED".to_string());
                warn!(connector_id = %connector.id, "Managed connector failed: {error}");
                connector.status = ManagedResourceStatus::Failed;
                connector.dependency_status = Some(ManagedResourceStatus::Failed);
                connector.error = Some(error);
            }
            state => {
                debug!(connector_id = %connector.id, ?state, "Connector still provisioning");
            }
        }

        self.persist(connector).await
    }

    async fn delete_dependencies(
        &self,
        _manager: &WorkManager,
        _item: &WorkItem,
        mut connector: ConnectorEntity,
    ) -> Result<ConnectorEntity> {
        info!(
            "Destroying dependencies for '{}' [{}]",
            connector.name, connector.id
        );
        connector.status = ManagedResourceStatus::Deleting;
        connector.dependency_status = Some(ManagedResourceStatus::Deleting);
        let mut connector = self.persist(connector).await?;

        let remote = self
            .connectors
            .get_connector(&connector)
            .await?
            .filter(|remote| remote.state != ConnectorState::Deleted);

        if let Some(remote) = remote {
            if remote.state.is_deleting() {
                debug!(connector_id = %connector.id, "Waiting for remote deletion");
            } else {
                self.connectors.delete_connector(&remote.id).await?;
                info!(
                    connector_id = %connector.id,
                    external_id = %remote.id,
                    "Requested managed connector deletion"
                );
            }
            return Ok(connector);
        }

        // The connector may drain its topic until the remote object is gone.
        self.topics
            .delete_topic_and_revoke_access(
                &connector.topic_name,
                topic_access_for(connector.connector_type),
            )
            .await?;
        self.resources.delete_connector(connector.id).await?;
        info!(connector_id = %connector.id, "Removed connector");

        connector.status = ManagedResourceStatus::Deleted;
        connector.dependency_status = Some(ManagedResourceStatus::Deleted);
        Ok(connector)
    }
}
