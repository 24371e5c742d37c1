use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OwnerId, ResourceId, WorkId};
use crate::resources::{ManagedResource, ResourceType};

/// Durable record of outstanding reconciliation work for one managed
/// resource. At most one item exists per `managed_resource_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,
    pub managed_resource_id: ResourceId,
    pub resource_type: ResourceType,
    pub owner_id: OwnerId,
    pub submitted_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub attempts: u32,
    /// Optimistic concurrency token, bumped by every successful update.
    pub version: i64,
}

impl WorkItem {
    pub fn for_resource<R: ManagedResource>(
        resource: &R,
        owner_id: OwnerId,
    ) -> Self {
        Self::new(resource.id(), R::RESOURCE_TYPE, owner_id)
    }

    pub fn new(
        managed_resource_id: ResourceId,
        resource_type: ResourceType,
        owner_id: OwnerId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkId::new(),
            managed_resource_id,
            resource_type,
            owner_id,
            submitted_at: now,
            modified_at: now,
            attempts: 0,
            version: 0,
        }
    }

    /// True when the item has not been touched since `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.modified_at < cutoff
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "work {} for {} '{}' (owner {}, attempts {})",
            self.id,
            self.resource_type,
            self.managed_resource_id,
            self.owner_id,
            self.attempts
        )
    }
}
