use std::fmt;
use std::sync::Arc;

use smartevents_model::{
    Action, Bridge, ManagedResourceStatus, Processor, ProcessorType, ResourceId,
};
use tracing::info;

use crate::error::Result;
use crate::resources::ResourceRepository;
use crate::work::WorkManager;

/// Lifecycle of the processors a bridge creates for itself.
///
/// Every mutation persists the processor and schedules it, so the processor
/// worker picks it up independently of the bridge that triggered it.
#[derive(Clone)]
pub struct ProcessorService {
    resources: Arc<dyn ResourceRepository>,
}

impl fmt::Debug for ProcessorService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorService").finish_non_exhaustive()
    }
}

pub fn error_handler_name(bridge_id: ResourceId) -> String {
    format!("Back-channel for Bridge '{bridge_id}'")
}

impl ProcessorService {
    pub fn new(resources: Arc<dyn ResourceRepository>) -> Self {
        Self { resources }
    }

    pub async fn hidden_processors(&self, bridge_id: ResourceId) -> Result<Vec<Processor>> {
        self.resources.find_hidden_processors(bridge_id).await
    }

    pub async fn create_error_handler_processor(
        &self,
        manager: &WorkManager,
        bridge: &Bridge,
        action: &Action,
    ) -> Result<Processor> {
        let mut processor = Processor::new(
            bridge,
            error_handler_name(bridge.id),
            ProcessorType::ErrorHandler,
            serde_json::to_value(action)?,
        );
        processor.generation = bridge.generation;

        let processor = self.resources.persist_processor(processor).await?;
        info!(
            bridge_id = %bridge.id,
            processor_id = %processor.id,
            "Created error handler processor"
        );
        manager.schedule(&processor).await?;
        Ok(processor)
    }

    /// Re-applies the bridge's error handler to an existing processor and
    /// sends it back through the create path.
    pub async fn update_error_handler_processor(
        &self,
        manager: &WorkManager,
        bridge: &Bridge,
        mut processor: Processor,
        action: &Action,
    ) -> Result<Processor> {
        processor.definition = serde_json::to_value(action)?;
        processor.generation = bridge.generation;
        processor.status = ManagedResourceStatus::Accepted;
        processor.dependency_status = None;

        let processor = self.resources.persist_processor(processor).await?;
        info!(
            bridge_id = %bridge.id,
            processor_id = %processor.id,
            generation = processor.generation,
            "Updated error handler processor"
        );
        manager.schedule(&processor).await?;
        Ok(processor)
    }

    pub async fn delete_processor(
        &self,
        manager: &WorkManager,
        mut processor: Processor,
    ) -> Result<Processor> {
        processor.status = ManagedResourceStatus::Deprovision;
        processor.dependency_status = None;

        let processor = self.resources.persist_processor(processor).await?;
        info!(
            bridge_id = %processor.bridge_id,
            processor_id = %processor.id,
            "Requested processor deletion"
        );
        manager.schedule(&processor).await?;
        Ok(processor)
    }
}
