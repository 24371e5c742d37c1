//! Core data model definitions shared across smartevents crates.
#![allow(missing_docs)]

pub mod error;
pub mod ids;
pub mod resources;
pub mod status;
pub mod work;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{OwnerId, ResourceId, WorkId};
pub use resources::{
    Action, Bridge, BridgeDefinition, ConnectorEntity, ConnectorType,
    ManagedResource, Processor, ProcessorType, ResourceType,
};
pub use status::ManagedResourceStatus;
pub use work::WorkItem;
