use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ModelError;
use crate::ids::ResourceId;
use crate::status::ManagedResourceStatus;

/// Discriminator selecting which worker handles a work item.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Bridge,
    Processor,
    Connector,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Bridge => "bridge",
            ResourceType::Processor => "processor",
            ResourceType::Connector => "connector",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "bridge" => Ok(ResourceType::Bridge),
            "processor" => Ok(ResourceType::Processor),
            "connector" => Ok(ResourceType::Connector),
            other => Err(ModelError::UnknownResourceType(other.to_string())),
        }
    }
}

/// Common surface of every entity whose provisioning runs through the work
/// ledger.
pub trait ManagedResource:
    Clone + fmt::Debug + Send + Sync + 'static
{
    const RESOURCE_TYPE: ResourceType;

    fn id(&self) -> ResourceId;
    fn name(&self) -> &str;
    fn status(&self) -> ManagedResourceStatus;
    fn set_status(&mut self, status: ManagedResourceStatus);
    fn dependency_status(&self) -> Option<ManagedResourceStatus>;
    fn set_dependency_status(&mut self, status: ManagedResourceStatus);
    fn generation(&self) -> i64;
    fn published_at(&self) -> Option<DateTime<Utc>>;
    fn set_published_at(&mut self, at: DateTime<Utc>);

    fn is_actionable(&self) -> bool {
        self.status().is_actionable()
    }

    /// Stamps `published_at` the first time the resource becomes ready.
    /// Later calls leave the original timestamp untouched.
    fn mark_published(&mut self) {
        if self.published_at().is_none() {
            self.set_published_at(Utc::now());
        }
    }
}

macro_rules! managed_resource {
    ($ty:ty, $kind:expr) => {
        impl ManagedResource for $ty {
            const RESOURCE_TYPE: ResourceType = $kind;

            fn id(&self) -> ResourceId {
                self.id
            }

            fn name(&self) -> &str {
                &self.name
            }

            fn status(&self) -> ManagedResourceStatus {
                self.status
            }

            fn set_status(&mut self, status: ManagedResourceStatus) {
                self.status = status;
            }

            fn dependency_status(&self) -> Option<ManagedResourceStatus> {
                self.dependency_status
            }

            fn set_dependency_status(&mut self, status: ManagedResourceStatus) {
                self.dependency_status = Some(status);
            }

            fn generation(&self) -> i64 {
                self.generation
            }

            fn published_at(&self) -> Option<DateTime<Utc>> {
                self.published_at
            }

            fn set_published_at(&mut self, at: DateTime<Utc>) {
                self.published_at = Some(at);
            }
        }
    };
}

/// Action executed by a processor, e.g. the error handler of a bridge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub parameters: Value,
}

impl Action {
    pub fn new(action_type: impl Into<String>, parameters: Value) -> Self {
        Self {
            action_type: action_type.into(),
            parameters,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<Action>,
}

/// An event bridge: owns a data topic, an error topic and at most one hidden
/// error-handler processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bridge {
    pub id: ResourceId,
    pub name: String,
    pub customer_id: String,
    pub owner: String,
    pub shard_id: String,
    pub status: ManagedResourceStatus,
    pub dependency_status: Option<ManagedResourceStatus>,
    pub generation: i64,
    pub definition: BridgeDefinition,
    pub submitted_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Bridge {
    pub fn new(
        name: impl Into<String>,
        customer_id: impl Into<String>,
        shard_id: impl Into<String>,
    ) -> Self {
        let customer_id = customer_id.into();
        Self {
            id: ResourceId::new(),
            name: name.into(),
            owner: customer_id.clone(),
            customer_id,
            shard_id: shard_id.into(),
            status: ManagedResourceStatus::Accepted,
            dependency_status: None,
            generation: 0,
            definition: BridgeDefinition::default(),
            submitted_at: Utc::now(),
            published_at: None,
            modified_at: None,
        }
    }

    pub fn with_error_handler(mut self, action: Action) -> Self {
        self.definition.error_handler = Some(action);
        self
    }

    pub fn error_handler(&self) -> Option<&Action> {
        self.definition.error_handler.as_ref()
    }
}

managed_resource!(Bridge, ResourceType::Bridge);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorType {
    Source,
    Sink,
    ErrorHandler,
}

impl ProcessorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessorType::Source => "source",
            ProcessorType::Sink => "sink",
            ProcessorType::ErrorHandler => "error_handler",
        }
    }

    /// Error handlers are created by their bridge, never by users.
    pub fn is_hidden(&self) -> bool {
        matches!(self, ProcessorType::ErrorHandler)
    }
}

impl FromStr for ProcessorType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "source" => Ok(ProcessorType::Source),
            "sink" => Ok(ProcessorType::Sink),
            "error_handler" => Ok(ProcessorType::ErrorHandler),
            other => Err(ModelError::UnknownProcessorType(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Processor {
    pub id: ResourceId,
    pub bridge_id: ResourceId,
    pub name: String,
    pub customer_id: String,
    pub owner: String,
    pub shard_id: String,
    pub processor_type: ProcessorType,
    pub status: ManagedResourceStatus,
    pub dependency_status: Option<ManagedResourceStatus>,
    pub generation: i64,
    pub definition: Value,
    pub submitted_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl Processor {
    pub fn new(
        bridge: &Bridge,
        name: impl Into<String>,
        processor_type: ProcessorType,
        definition: Value,
    ) -> Self {
        Self {
            id: ResourceId::new(),
            bridge_id: bridge.id,
            name: name.into(),
            customer_id: bridge.customer_id.clone(),
            owner: bridge.owner.clone(),
            shard_id: bridge.shard_id.clone(),
            processor_type,
            status: ManagedResourceStatus::Accepted,
            dependency_status: None,
            generation: 0,
            definition,
            submitted_at: Utc::now(),
            published_at: None,
            modified_at: None,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.processor_type.is_hidden()
    }
}

managed_resource!(Processor, ResourceType::Processor);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorType {
    Source,
    Sink,
}

impl ConnectorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::Source => "source",
            ConnectorType::Sink => "sink",
        }
    }
}

impl FromStr for ConnectorType {
    type Err = ModelError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "source" => Ok(ConnectorType::Source),
            "sink" => Ok(ConnectorType::Sink),
            other => Err(ModelError::UnknownConnectorType(other.to_string())),
        }
    }
}

/// Local record of a managed connector attached to a processor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectorEntity {
    pub id: ResourceId,
    pub processor_id: ResourceId,
    pub name: String,
    pub connector_type: ConnectorType,
    /// Identifier assigned by the connector-management service once the
    /// remote object exists.
    pub connector_external_id: Option<String>,
    pub topic_name: String,
    pub definition: Value,
    pub status: ManagedResourceStatus,
    pub dependency_status: Option<ManagedResourceStatus>,
    pub generation: i64,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub modified_at: Option<DateTime<Utc>>,
}

impl ConnectorEntity {
    pub fn new(
        processor: &Processor,
        connector_type: ConnectorType,
        topic_name: impl Into<String>,
        definition: Value,
    ) -> Self {
        Self {
            id: ResourceId::new(),
            processor_id: processor.id,
            name: format!("{}-connector", processor.name),
            connector_type,
            connector_external_id: None,
            topic_name: topic_name.into(),
            definition,
            status: ManagedResourceStatus::Accepted,
            dependency_status: None,
            generation: processor.generation,
            error: None,
            submitted_at: Utc::now(),
            published_at: None,
            modified_at: None,
        }
    }
}

managed_resource!(ConnectorEntity, ResourceType::Connector);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn mark_published_only_stamps_once() {
        let mut bridge = Bridge::new("orders", "customer", "shard");
        bridge.mark_published();
        let first = bridge.published_at;
        assert!(first.is_some());

        bridge.mark_published();
        assert_eq!(bridge.published_at, first);
    }

    #[test]
    fn processor_inherits_bridge_ownership() {
        let bridge = Bridge::new("orders", "customer", "shard-a");
        let processor = Processor::new(
            &bridge,
            "audit",
            ProcessorType::Sink,
            json!({}),
        );
        assert_eq!(processor.bridge_id, bridge.id);
        assert_eq!(processor.customer_id, "customer");
        assert_eq!(processor.shard_id, "shard-a");
        assert_eq!(processor.status, ManagedResourceStatus::Accepted);
        assert!(!processor.is_hidden());
    }

    #[test]
    fn bridge_definition_round_trips_error_handler() {
        let bridge = Bridge::new("orders", "customer", "shard").with_error_handler(
            Action::new("webhook", json!({"endpoint": "https://example.test"})),
        );
        let raw = serde_json::to_value(&bridge.definition).unwrap();
        assert_eq!(raw["error_handler"]["type"], "webhook");
    }
}
