use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use smartevents_model::{Bridge, ConnectorEntity, Processor, ResourceId};
use tokio::sync::Mutex;

use crate::error::{Result, WorkError};

use super::ResourceRepository;

#[derive(Debug, Default)]
struct Tables {
    bridges: HashMap<ResourceId, Bridge>,
    processors: HashMap<ResourceId, Processor>,
    connectors: HashMap<ResourceId, ConnectorEntity>,
}

/// Resource store kept in process memory.
///
/// Enforces the same parent/child constraints as the relational schema:
/// children need an existing parent and a parent with children cannot be
/// removed.
#[derive(Clone, Debug, Default)]
pub struct InMemoryResourceRepository {
    tables: Arc<Mutex<Tables>>,
}

impl InMemoryResourceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn processor_count(&self) -> usize {
        self.tables.lock().await.processors.len()
    }
}

#[async_trait]
impl ResourceRepository for InMemoryResourceRepository {
    async fn find_bridge(&self, id: ResourceId) -> Result<Option<Bridge>> {
        Ok(self.tables.lock().await.bridges.get(&id).cloned())
    }

    async fn persist_bridge(&self, mut bridge: Bridge) -> Result<Bridge> {
        bridge.modified_at = Some(Utc::now());
        self.tables
            .lock()
            .await
            .bridges
            .insert(bridge.id, bridge.clone());
        Ok(bridge)
    }

    async fn delete_bridge(&self, id: ResourceId) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.processors.values().any(|p| p.bridge_id == id) {
            return Err(WorkError::Conflict(format!(
                "bridge {id} still has processors"
            )));
        }
        Ok(tables.bridges.remove(&id).is_some())
    }

    async fn find_processor(&self, id: ResourceId) -> Result<Option<Processor>> {
        Ok(self.tables.lock().await.processors.get(&id).cloned())
    }

    async fn persist_processor(&self, mut processor: Processor) -> Result<Processor> {
        let mut tables = self.tables.lock().await;
        if !tables.bridges.contains_key(&processor.bridge_id) {
            return Err(WorkError::NotFound(format!(
                "bridge {} for processor {}",
                processor.bridge_id, processor.id
            )));
        }
        processor.modified_at = Some(Utc::now());
        tables.processors.insert(processor.id, processor.clone());
        Ok(processor)
    }

    async fn delete_processor(&self, id: ResourceId) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        if tables.connectors.values().any(|c| c.processor_id == id) {
            return Err(WorkError::Conflict(format!(
                "processor {id} still has a connector"
            )));
        }
        Ok(tables.processors.remove(&id).is_some())
    }

    async fn find_hidden_processors(&self, bridge_id: ResourceId) -> Result<Vec<Processor>> {
        let tables = self.tables.lock().await;
        let mut hidden: Vec<Processor> = tables
            .processors
            .values()
            .filter(|p| p.bridge_id == bridge_id && p.is_hidden())
            .cloned()
            .collect();
        hidden.sort_by_key(|p| p.submitted_at);
        Ok(hidden)
    }

    async fn find_connector(&self, id: ResourceId) -> Result<Option<ConnectorEntity>> {
        Ok(self.tables.lock().await.connectors.get(&id).cloned())
    }

    async fn find_connector_by_processor(
        &self,
        processor_id: ResourceId,
    ) -> Result<Option<ConnectorEntity>> {
        Ok(self
            .tables
            .lock()
            .await
            .connectors
            .values()
            .find(|c| c.processor_id == processor_id)
            .cloned())
    }

    async fn persist_connector(
        &self,
        mut connector: ConnectorEntity,
    ) -> Result<ConnectorEntity> {
        let mut tables = self.tables.lock().await;
        if !tables.processors.contains_key(&connector.processor_id) {
            return Err(WorkError::NotFound(format!(
                "processor {} for connector {}",
                connector.processor_id, connector.id
            )));
        }
        let taken = tables.connectors.values().any(|c| {
            c.processor_id == connector.processor_id && c.id != connector.id
        });
        if taken {
            return Err(WorkError::Conflict(format!(
                "processor {} already has a connector",
                connector.processor_id
            )));
        }
        connector.modified_at = Some(Utc::now());
        tables.connectors.insert(connector.id, connector.clone());
        Ok(connector)
    }

    async fn delete_connector(&self, id: ResourceId) -> Result<bool> {
        Ok(self.tables.lock().await.connectors.remove(&id).is_some())
    }

    async fn find_bridges_by_shard(&self, shard_id: &str) -> Result<Vec<Bridge>> {
        let tables = self.tables.lock().await;
        let mut bridges: Vec<Bridge> = tables
            .bridges
            .values()
            .filter(|b| b.shard_id == shard_id)
            .cloned()
            .collect();
        bridges.sort_by_key(|b| b.submitted_at);
        Ok(bridges)
    }

    async fn find_processors_by_shard(&self, shard_id: &str) -> Result<Vec<Processor>> {
        let tables = self.tables.lock().await;
        let mut processors: Vec<Processor> = tables
            .processors
            .values()
            .filter(|p| p.shard_id == shard_id)
            .cloned()
            .collect();
        processors.sort_by_key(|p| p.submitted_at);
        Ok(processors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use smartevents_model::ProcessorType;

    #[tokio::test]
    async fn bridge_with_processors_cannot_be_deleted() {
        let repo = InMemoryResourceRepository::new();
        let bridge = repo
            .persist_bridge(Bridge::new("orders", "customer", "shard"))
            .await
            .expect("persist bridge");
        let processor = repo
            .persist_processor(Processor::new(
                &bridge,
                "errors",
                ProcessorType::ErrorHandler,
                json!({}),
            ))
            .await
            .expect("persist processor");

        let err = repo.delete_bridge(bridge.id).await.expect_err("children");
        assert!(matches!(err, WorkError::Conflict(_)));

        assert!(repo.delete_processor(processor.id).await.unwrap());
        assert!(repo.delete_bridge(bridge.id).await.unwrap());
    }

    #[tokio::test]
    async fn hidden_processors_exclude_user_processors() {
        let repo = InMemoryResourceRepository::new();
        let bridge = repo
            .persist_bridge(Bridge::new("orders", "customer", "shard"))
            .await
            .unwrap();
        for (name, kind) in [
            ("user", ProcessorType::Sink),
            ("errors", ProcessorType::ErrorHandler),
        ] {
            repo.persist_processor(Processor::new(&bridge, name, kind, json!({})))
                .await
                .unwrap();
        }

        let hidden = repo.find_hidden_processors(bridge.id).await.unwrap();
        assert_eq!(hidden.len(), 1);
        assert_eq!(hidden[0].name, "errors");
    }
}
