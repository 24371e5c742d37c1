//! Persistence contract for the work ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smartevents_model::{OwnerId, ResourceId, WorkId, WorkItem};

use crate::error::Result;

/// The whole persistence surface the engine needs for work items.
#[async_trait]
pub trait WorkRepository: Send + Sync {
    /// The item of a resource, if any. There is at most one.
    async fn find_by_resource_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<WorkItem>>;

    /// Every item owned by `owner_id`, oldest first.
    async fn find_by_owner_id(&self, owner_id: &OwnerId) -> Result<Vec<WorkItem>>;

    /// Looks an item up by its own id.
    async fn find_by_id(&self, id: WorkId) -> Result<Option<WorkItem>>;

    /// Inserts a new item or updates an existing one.
    ///
    /// Updates only succeed when `item.version` matches the stored version;
    /// the returned item carries the bumped version. Inserting a second item
    /// for a resource that already has one fails with
    /// [`WorkError::Conflict`](crate::WorkError::Conflict).
    async fn persist(&self, item: WorkItem) -> Result<WorkItem>;

    /// Returns whether a row was removed.
    async fn delete_by_id(&self, id: WorkId) -> Result<bool>;

    /// Claims every item owned by another process whose `modified_at` is
    /// older than `older_than`. Claimed rows get a fresh `modified_at`.
    /// Returns the number of rows reassigned.
    async fn reassign_stale(
        &self,
        owner_id: &OwnerId,
        older_than: DateTime<Utc>,
    ) -> Result<u64>;
}
