use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smartevents_model::{OwnerId, ResourceId, WorkId, WorkItem};
use tokio::sync::Mutex;

use crate::error::{Result, WorkError};

use super::ledger::WorkRepository;

/// Ledger kept in process memory. Used by tests and by single-process
/// development deployments without a database.
#[derive(Clone, Debug, Default)]
pub struct InMemoryWorkRepository {
    items: Arc<Mutex<HashMap<WorkId, WorkItem>>>,
}

impl InMemoryWorkRepository {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// True when no work is outstanding.
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    /// Snapshot of every item in submission order.
    pub async fn all(&self) -> Vec<WorkItem> {
        let guard = self.items.lock().await;
        let mut items: Vec<WorkItem> = guard.values().cloned().collect();
        items.sort_by_key(|item| item.submitted_at);
        items
    }
}

#[async_trait]
impl WorkRepository for InMemoryWorkRepository {
    async fn find_by_resource_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<WorkItem>> {
        let guard = self.items.lock().await;
        Ok(guard
            .values()
            .find(|item| item.managed_resource_id == resource_id)
            .cloned())
    }

    async fn find_by_owner_id(&self, owner_id: &OwnerId) -> Result<Vec<WorkItem>> {
        let guard = self.items.lock().await;
        let mut items: Vec<WorkItem> = guard
            .values()
            .filter(|item| &item.owner_id == owner_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.submitted_at);
        Ok(items)
    }

    async fn find_by_id(&self, id: WorkId) -> Result<Option<WorkItem>> {
        Ok(self.items.lock().await.get(&id).cloned())
    }

    async fn persist(&self, mut item: WorkItem) -> Result<WorkItem> {
        let mut guard = self.items.lock().await;
        match guard.get(&item.id) {
            Some(existing) => {
                if existing.version != item.version {
                    return Err(WorkError::Conflict(format!(
                        "work {} was modified concurrently (expected version {}, found {})",
                        item.id, item.version, existing.version
                    )));
                }
                item.version += 1;
            }
            None => {
                let duplicate = guard.values().any(|other| {
                    other.managed_resource_id == item.managed_resource_id
                });
                if duplicate {
                    return Err(WorkError::Conflict(format!(
                        "work already exists for resource {}",
                        item.managed_resource_id
                    )));
                }
            }
        }
        guard.insert(item.id, item.clone());
        Ok(item)
    }

    async fn delete_by_id(&self, id: WorkId) -> Result<bool> {
        Ok(self.items.lock().await.remove(&id).is_some())
    }

    async fn reassign_stale(
        &self,
        owner_id: &OwnerId,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let mut guard = self.items.lock().await;
        let now = Utc::now();
        let mut reassigned = 0u64;
        for item in guard.values_mut() {
            if &item.owner_id != owner_id && item.is_stale(older_than) {
                item.owner_id = owner_id.clone();
                item.modified_at = now;
                item.version += 1;
                reassigned += 1;
            }
        }
        Ok(reassigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smartevents_model::ResourceType;

    fn item(owner: &str) -> WorkItem {
        WorkItem::new(ResourceId::new(), ResourceType::Bridge, OwnerId::new(owner))
    }

    #[tokio::test]
    async fn persist_rejects_second_item_for_same_resource() {
        let repo = InMemoryWorkRepository::new();
        let first = item("a");
        let mut second = item("a");
        second.managed_resource_id = first.managed_resource_id;

        repo.persist(first).await.expect("first insert");
        let err = repo.persist(second).await.expect_err("duplicate insert");
        assert!(matches!(err, WorkError::Conflict(_)));
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn persist_detects_stale_version() {
        let repo = InMemoryWorkRepository::new();
        let stored = repo.persist(item("a")).await.expect("insert");

        let mut winner = stored.clone();
        winner.attempts = 1;
        let winner = repo.persist(winner).await.expect("first update");
        assert_eq!(winner.version, stored.version + 1);

        let mut loser = stored;
        loser.attempts = 7;
        let err = repo.persist(loser).await.expect_err("stale update");
        assert!(matches!(err, WorkError::Conflict(_)));

        let current = repo.find_by_id(winner.id).await.unwrap().unwrap();
        assert_eq!(current.attempts, 1);
    }

    #[tokio::test]
    async fn reassign_stale_only_claims_old_foreign_rows() {
        let repo = InMemoryWorkRepository::new();
        let me = OwnerId::new("me");
        let cutoff = Utc::now() - chrono::Duration::minutes(5);

        let mut stale = item("dead");
        stale.modified_at = cutoff - chrono::Duration::minutes(1);
        let fresh = item("alive");
        let mut mine = item("me");
        mine.modified_at = cutoff - chrono::Duration::minutes(10);

        let stale = repo.persist(stale).await.unwrap();
        let fresh = repo.persist(fresh).await.unwrap();
        repo.persist(mine).await.unwrap();

        let reassigned = repo.reassign_stale(&me, cutoff).await.unwrap();
        assert_eq!(reassigned, 1);

        let claimed = repo.find_by_id(stale.id).await.unwrap().unwrap();
        assert_eq!(claimed.owner_id, me);
        assert!(!claimed.is_stale(cutoff));

        let untouched = repo.find_by_id(fresh.id).await.unwrap().unwrap();
        assert_eq!(untouched.owner_id, OwnerId::new("alive"));
    }
}
