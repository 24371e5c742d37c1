//! Status surface polled by the external shard reconciler.
//!
//! The shard deploys resources whose dependencies are ready, tears down those
//! whose dependencies are deleted, and reports the outcome back here.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smartevents_model::{
    Bridge, ManagedResource, ManagedResourceStatus, Processor, ResourceId,
    ResourceType,
};
use tracing::{debug, info, warn};

use crate::error::{Result, WorkError};
use crate::resources::ResourceRepository;

/// A resource the shard has to act on.
#[derive(Clone, Debug)]
pub enum ShardResource {
    Bridge(Bridge),
    Processor(Processor),
}

impl ShardResource {
    pub fn id(&self) -> ResourceId {
        match self {
            ShardResource::Bridge(bridge) => bridge.id,
            ShardResource::Processor(processor) => processor.id,
        }
    }

    pub fn status(&self) -> ManagedResourceStatus {
        match self {
            ShardResource::Bridge(bridge) => bridge.status,
            ShardResource::Processor(processor) => processor.status,
        }
    }
}

/// Status reported by the shard for one resource.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceStatusUpdate {
    pub id: ResourceId,
    pub resource_type: ResourceType,
    pub status: ManagedResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Whether a resource's dependencies have progressed far enough for the
/// shard to take over.
fn needs_shard<R: ManagedResource>(resource: &R) -> bool {
    let status = resource.status();
    let dependency = resource.dependency_status();
    (status.is_create_path() && dependency == Some(ManagedResourceStatus::Ready))
        || (status.is_delete_path()
            && dependency == Some(ManagedResourceStatus::Deleted))
}

#[derive(Clone)]
pub struct ShardResourceService {
    resources: Arc<dyn ResourceRepository>,
}

impl fmt::Debug for ShardResourceService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardResourceService").finish_non_exhaustive()
    }
}

impl ShardResourceService {
    pub fn new(resources: Arc<dyn ResourceRepository>) -> Self {
        Self { resources }
    }

    /// Bridges first, then processors, each in submission order.
    pub async fn find_to_deploy_or_delete(
        &self,
        shard_id: &str,
    ) -> Result<Vec<ShardResource>> {
        let bridges = self.resources.find_bridges_by_shard(shard_id).await?;
        let processors = self.resources.find_processors_by_shard(shard_id).await?;

        let pending: Vec<ShardResource> = bridges
            .into_iter()
            .filter(|bridge| needs_shard(bridge))
            .map(ShardResource::Bridge)
            .chain(
                processors
                    .into_iter()
                    .filter(|processor| needs_shard(processor))
                    .map(ShardResource::Processor),
            )
            .collect();
        debug!(shard_id, count = pending.len(), "Resources awaiting shard");
        Ok(pending)
    }

    /// Applies a status reported by the shard.
    ///
    /// `DELETED` removes the resource record. A bridge is only removed once
    /// no hidden processor references it.
    pub async fn update_status(&self, update: ResourceStatusUpdate) -> Result<()> {
        if let Some(error) = update.error.as_deref() {
            warn!(
                resource_id = %update.id,
                resource_type = %update.resource_type,
                status = %update.status,
                "Shard reported error: {error}"
            );
        }
        match update.resource_type {
            ResourceType::Bridge => self.update_bridge(update).await,
            ResourceType::Processor => self.update_processor(update).await,
            ResourceType::Connector => Err(WorkError::InvalidState(format!(
                "connector {} status is owned by the connector worker",
                update.id
            ))),
        }
    }

    async fn update_bridge(&self, update: ResourceStatusUpdate) -> Result<()> {
        let mut bridge = self
            .resources
            .find_bridge(update.id)
            .await?
            .ok_or_else(|| WorkError::NotFound(format!("bridge {}", update.id)))?;

        if update.status == ManagedResourceStatus::Deleted {
            let hidden = self.resources.find_hidden_processors(bridge.id).await?;
            if !hidden.is_empty() {
                return Err(WorkError::Conflict(format!(
                    "bridge {} still has {} hidden processor(s)",
                    bridge.id,
                    hidden.len()
                )));
            }
            self.resources.delete_bridge(bridge.id).await?;
            info!(bridge_id = %bridge.id, "Bridge deleted");
            return Ok(());
        }

        apply(&mut bridge, update.status);
        self.resources.persist_bridge(bridge).await?;
        Ok(())
    }

    async fn update_processor(&self, update: ResourceStatusUpdate) -> Result<()> {
        let mut processor = self
            .resources
            .find_processor(update.id)
            .await?
            .ok_or_else(|| WorkError::NotFound(format!("processor {}", update.id)))?;

        if update.status == ManagedResourceStatus::Deleted {
            self.resources.delete_processor(processor.id).await?;
            info!(processor_id = %processor.id, "Processor deleted");
            return Ok(());
        }

        apply(&mut processor, update.status);
        self.resources.persist_processor(processor).await?;
        Ok(())
    }
}

fn apply<R: ManagedResource>(resource: &mut R, status: ManagedResourceStatus) {
    resource.set_status(status);
    if status == ManagedResourceStatus::Ready {
        resource.mark_published();
    }
}
