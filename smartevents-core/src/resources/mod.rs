//! Storage for the managed resources the workers reconcile.

pub mod memory;
#[cfg(feature = "database")]
pub mod postgres;

use async_trait::async_trait;
use smartevents_model::{Bridge, ConnectorEntity, Processor, ResourceId};

use crate::error::Result;

pub use memory::InMemoryResourceRepository;
#[cfg(feature = "database")]
pub use postgres::PostgresResourceRepository;

/// Persistence for bridges, processors and connectors.
///
/// `persist_*` upserts by id and returns the stored row. `delete_*` returns
/// whether a row was removed.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn find_bridge(&self, id: ResourceId) -> Result<Option<Bridge>>;
    async fn persist_bridge(&self, bridge: Bridge) -> Result<Bridge>;
    async fn delete_bridge(&self, id: ResourceId) -> Result<bool>;

    async fn find_processor(&self, id: ResourceId) -> Result<Option<Processor>>;
    async fn persist_processor(&self, processor: Processor) -> Result<Processor>;
    async fn delete_processor(&self, id: ResourceId) -> Result<bool>;

    /// Processors the bridge created for itself, e.g. its error handler.
    async fn find_hidden_processors(&self, bridge_id: ResourceId) -> Result<Vec<Processor>>;

    async fn find_connector(&self, id: ResourceId) -> Result<Option<ConnectorEntity>>;
    async fn find_connector_by_processor(
        &self,
        processor_id: ResourceId,
    ) -> Result<Option<ConnectorEntity>>;
    async fn persist_connector(&self, connector: ConnectorEntity) -> Result<ConnectorEntity>;
    async fn delete_connector(&self, id: ResourceId) -> Result<bool>;

    async fn find_bridges_by_shard(&self, shard_id: &str) -> Result<Vec<Bridge>>;
    async fn find_processors_by_shard(&self, shard_id: &str) -> Result<Vec<Processor>>;
}
