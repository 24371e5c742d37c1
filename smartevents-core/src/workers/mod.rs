//! Per-resource-type reconciliation workers.
//!
//! Each worker advances one resource a single step per dispatch. The shared
//! [`Worker::handle_work`] decides which path applies, absorbs step failures
//! and either completes or reschedules the work item.

pub mod bridge;
pub mod connector;
pub mod processor;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use smartevents_model::{
    ManagedResource, ManagedResourceStatus, ResourceId, ResourceType, WorkItem,
};
use tracing::{debug, error, warn};

use crate::error::{Result, WorkError};
use crate::processors::ProcessorService;
use crate::providers::{ConnectorsApi, ResourceNames, TopicService};
use crate::resources::ResourceRepository;
use crate::work::WorkManager;

pub use bridge::BridgeWorker;
pub use connector::ConnectorWorker;
pub use processor::ProcessorWorker;

/// Advances one resource type towards its desired state, one idempotent
/// step per dispatch.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Resource type handled.
    type Resource: ManagedResource;

    /// Reads the resource from its store.
    async fn load(&self, id: ResourceId) -> Result<Option<Self::Resource>>;

    /// Writes the resource back after a step.
    async fn persist(&self, resource: Self::Resource) -> Result<Self::Resource>;

    /// Runs the next provisioning step. Must be safe to repeat.
    async fn create_dependencies(
        &self,
        manager: &WorkManager,
        item: &WorkItem,
        resource: Self::Resource,
    ) -> Result<Self::Resource>;

    /// Runs the next teardown step. Must be safe to repeat.
    async fn delete_dependencies(
        &self,
        manager: &WorkManager,
        item: &WorkItem,
        resource: Self::Resource,
    ) -> Result<Self::Resource>;

    /// Creation is done once dependencies are ready or failed.
    fn is_provisioning_complete(&self, resource: &Self::Resource) -> bool {
        resource
            .dependency_status()
            .is_some_and(|status| status.is_provisioning_complete())
    }

    /// Deletion is done once dependencies are deleted or failed.
    fn is_deprovisioning_complete(&self, resource: &Self::Resource) -> bool {
        resource
            .dependency_status()
            .is_some_and(|status| status.is_deprovisioning_complete())
    }

    /// Handles one dispatch of `item`.
    ///
    /// Fails only when the item's resource does not exist. Step failures are
    /// logged and leave the resource where the step stopped; the item is
    /// rescheduled and the step retried on a later tick.
    async fn handle_work(
        &self,
        manager: &WorkManager,
        item: &WorkItem,
    ) -> Result<Self::Resource> {
        let resource = self.load(item.managed_resource_id).await?.ok_or_else(|| {
            WorkError::InvalidState(format!(
                "{item} references a {} that does not exist",
                item.resource_type
            ))
        })?;
        let status = resource.status();

        if let Some(max_attempts) = manager.config().max_attempts
            && item.attempts >= max_attempts
            && (status.is_create_path() || status.is_delete_path())
        {
            return self.give_up(manager, item, resource).await;
        }

        let (resource, complete) = if status.is_create_path() {
            let updated = self.run_step(manager, item, resource, Step::Create).await?;
            let complete = self.is_provisioning_complete(&updated);
            (updated, complete)
        } else if status.is_delete_path() {
            let updated = self.run_step(manager, item, resource, Step::Delete).await?;
            let complete = self.is_deprovisioning_complete(&updated);
            (updated, complete)
        } else {
            debug!(
                "'{}' [{}] is {status}; waiting for an external status change",
                resource.name(),
                resource.id()
            );
            (resource, false)
        };

        if complete {
            manager.complete(item).await?;
        } else {
            manager.reschedule(item).await?;
        }
        Ok(resource)
    }

    #[doc(hidden)]
    async fn run_step(
        &self,
        manager: &WorkManager,
        item: &WorkItem,
        resource: Self::Resource,
        step: Step,
    ) -> Result<Self::Resource> {
        let fallback = resource.clone();
        let id = resource.id();
        let outcome = match step {
            Step::Create => self.create_dependencies(manager, item, resource).await,
            Step::Delete => self.delete_dependencies(manager, item, resource).await,
        };

        match outcome {
            Ok(updated) => Ok(updated),
            Err(err) => {
                let attempts = item.attempts;
                if err.is_transient() {
                    warn!(resource_id = %id, attempts, "{step} step failed: {err}");
                } else {
                    error!(resource_id = %id, attempts, "{step} step failed: {err}");
                }
                Ok(self.load(id).await?.unwrap_or(fallback))
            }
        }
    }

    #[doc(hidden)]
    async fn give_up(
        &self,
        manager: &WorkManager,
        item: &WorkItem,
        mut resource: Self::Resource,
    ) -> Result<Self::Resource> {
        warn!(
            "Giving up on '{}' [{}] after {} attempts",
            resource.name(),
            resource.id(),
            item.attempts
        );
        resource.set_status(ManagedResourceStatus::Failed);
        resource.set_dependency_status(ManagedResourceStatus::Failed);
        let resource = self.persist(resource).await?;
        manager.complete(item).await?;
        Ok(resource)
    }
}

#[doc(hidden)]
#[derive(Clone, Copy, Debug)]
pub enum Step {
    Create,
    Delete,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Create => f.write_str("create"),
            Step::Delete => f.write_str("delete"),
        }
    }
}

/// One worker per resource type; work items are routed by their
/// [`ResourceType`].
#[derive(Clone, Debug)]
pub struct WorkerSet {
    /// Handles [`ResourceType::Bridge`] items.
    pub bridge: BridgeWorker,
    /// Handles [`ResourceType::Processor`] items.
    pub processor: ProcessorWorker,
    /// Handles [`ResourceType::Connector`] items.
    pub connector: ConnectorWorker,
}

impl WorkerSet {
    /// Wires the three workers over shared stores and providers.
    pub fn new(
        resources: Arc<dyn ResourceRepository>,
        topics: Arc<dyn TopicService>,
        connectors: Arc<dyn ConnectorsApi>,
        names: ResourceNames,
    ) -> Self {
        let processors = ProcessorService::new(Arc::clone(&resources));
        let connector = ConnectorWorker::new(
            Arc::clone(&resources),
            Arc::clone(&topics),
            connectors,
        );
        Self {
            bridge: BridgeWorker::new(
                Arc::clone(&resources),
                topics,
                names,
                processors,
            ),
            processor: ProcessorWorker::new(resources, connector.clone()),
            connector,
        }
    }

    /// Routes `item` to the worker for its resource type.
    pub async fn handle(&self, manager: &WorkManager, item: &WorkItem) -> Result<()> {
        let (status, dependency_status) = match item.resource_type {
            ResourceType::Bridge => {
                let bridge = self.bridge.handle_work(manager, item).await?;
                (bridge.status, bridge.dependency_status)
            }
            ResourceType::Processor => {
                let processor = self.processor.handle_work(manager, item).await?;
                (processor.status, processor.dependency_status)
            }
            ResourceType::Connector => {
                let connector = self.connector.handle_work(manager, item).await?;
                (connector.status, connector.dependency_status)
            }
        };
        debug!(
            resource_id = %item.managed_resource_id,
            resource_type = %item.resource_type,
            %status,
            dependency_status = ?dependency_status,
            "Handled work"
        );
        Ok(())
    }
}
