use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Life-cycle phase shared by every managed resource.
///
/// The same vocabulary is used for the externally visible `status` and for
/// the internal `dependency_status` that tracks how far the side-effecting
/// provisioning steps have progressed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagedResourceStatus {
    Accepted,
    Preparing,
    Provisioning,
    Ready,
    Deprovision,
    Deleting,
    Deleted,
    Failed,
}

/// Dependency states that end the create path for the work ledger.
pub const PROVISIONING_COMPLETED: [ManagedResourceStatus; 2] =
    [ManagedResourceStatus::Ready, ManagedResourceStatus::Failed];

/// Dependency states that end the delete path for the work ledger.
pub const DEPROVISIONING_COMPLETED: [ManagedResourceStatus; 2] =
    [ManagedResourceStatus::Deleted, ManagedResourceStatus::Failed];

impl ManagedResourceStatus {
    pub const ALL: [ManagedResourceStatus; 8] = [
        ManagedResourceStatus::Accepted,
        ManagedResourceStatus::Preparing,
        ManagedResourceStatus::Provisioning,
        ManagedResourceStatus::Ready,
        ManagedResourceStatus::Deprovision,
        ManagedResourceStatus::Deleting,
        ManagedResourceStatus::Deleted,
        ManagedResourceStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ManagedResourceStatus::Accepted => "accepted",
            ManagedResourceStatus::Preparing => "preparing",
            ManagedResourceStatus::Provisioning => "provisioning",
            ManagedResourceStatus::Ready => "ready",
            ManagedResourceStatus::Deprovision => "deprovision",
            ManagedResourceStatus::Deleting => "deleting",
            ManagedResourceStatus::Deleted => "deleted",
            ManagedResourceStatus::Failed => "failed",
        }
    }

    /// Statuses owned by the create path of a worker.
    pub fn is_create_path(&self) -> bool {
        matches!(
            self,
            ManagedResourceStatus::Accepted | ManagedResourceStatus::Preparing
        )
    }

    /// Statuses owned by the delete path of a worker.
    pub fn is_delete_path(&self) -> bool {
        matches!(
            self,
            ManagedResourceStatus::Deprovision
                | ManagedResourceStatus::Deleting
        )
    }

    /// A resource is actionable once the external reconciler has settled it,
    /// successfully or not. Only actionable resources may be updated or
    /// deleted by a parent.
    pub fn is_actionable(&self) -> bool {
        matches!(
            self,
            ManagedResourceStatus::Ready | ManagedResourceStatus::Failed
        )
    }

    pub fn is_provisioning_complete(&self) -> bool {
        PROVISIONING_COMPLETED.contains(self)
    }

    pub fn is_deprovisioning_complete(&self) -> bool {
        DEPROVISIONING_COMPLETED.contains(self)
    }
}

impl fmt::Display for ManagedResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManagedResourceStatus {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        ManagedResourceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ModelError::UnknownStatus(raw.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_any_case() {
        assert_eq!(
            "DEPROVISION".parse::<ManagedResourceStatus>().unwrap(),
            ManagedResourceStatus::Deprovision
        );
        assert_eq!(
            " ready ".parse::<ManagedResourceStatus>().unwrap(),
            ManagedResourceStatus::Ready
        );
        assert!("bogus".parse::<ManagedResourceStatus>().is_err());
    }

    #[test]
    fn path_predicates_do_not_overlap() {
        for status in ManagedResourceStatus::ALL {
            assert!(!(status.is_create_path() && status.is_delete_path()));
        }
        assert!(!ManagedResourceStatus::Provisioning.is_create_path());
        assert!(!ManagedResourceStatus::Ready.is_delete_path());
    }

    #[test]
    fn failed_ends_both_paths() {
        assert!(ManagedResourceStatus::Failed.is_provisioning_complete());
        assert!(ManagedResourceStatus::Failed.is_deprovisioning_complete());
        assert!(!ManagedResourceStatus::Provisioning.is_provisioning_complete());
        assert!(!ManagedResourceStatus::Deleting.is_deprovisioning_complete());
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let json =
            serde_json::to_string(&ManagedResourceStatus::Deprovision).unwrap();
        assert_eq!(json, "\"DEPROVISION\"");
    }
}
