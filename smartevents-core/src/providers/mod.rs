//! Contracts for the external services workers provision through.
//!
//! Clients report success, failure or the current remote state. They never
//! retry on their own: the work ledger re-dispatches failed steps.

pub mod http;
pub mod memory;
pub mod names;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smartevents_model::ConnectorEntity;

use crate::error::ProviderError;

pub use http::{HttpConnectorsApi, HttpTopicService};
pub use memory::{InMemoryConnectorsApi, InMemoryTopicService};
pub use names::ResourceNames;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Access granted to the manager's service account on a topic.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TopicAccessType {
    Consumer,
    Producer,
    ConsumerAndProducer,
}

impl TopicAccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicAccessType::Consumer => "CONSUMER",
            TopicAccessType::Producer => "PRODUCER",
            TopicAccessType::ConsumerAndProducer => "CONSUMER_AND_PRODUCER",
        }
    }
}

impl fmt::Display for TopicAccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning progress of a topic as reported by the topic service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    /// Accepted by the service but not usable yet.
    Pending,
    Ready,
}

impl TopicStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, TopicStatus::Ready)
    }
}

/// Topic and access-grant management.
#[async_trait]
pub trait TopicService: Send + Sync {
    /// Creates the topic when missing and grants access to it. Repeated
    /// calls for an existing topic only report its status.
    async fn create_topic_and_grant_access(
        &self,
        topic: &str,
        access: TopicAccessType,
    ) -> ProviderResult<TopicStatus>;

    /// Revokes access and deletes the topic. Missing topics are not an error.
    async fn delete_topic_and_revoke_access(
        &self,
        topic: &str,
        access: TopicAccessType,
    ) -> ProviderResult<()>;
}

/// Remote state of a managed connector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Assigning,
    Assigned,
    Updating,
    Ready,
    Stopped,
    Failed,
    Deleting,
    Deleted,
    Provisioning,
    Deprovisioning,
}

impl ConnectorState {
    /// Remote deletion has been requested and is running.
    pub fn is_deleting(&self) -> bool {
        matches!(self, ConnectorState::Deleting | ConnectorState::Deprovisioning)
    }
}

/// A connector as seen by the connector-management service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemoteConnector {
    pub id: String,
    pub state: ConnectorState,
    #[serde(default)]
    pub definition: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Connector-management service.
#[async_trait]
pub trait ConnectorsApi: Send + Sync {
    /// Looks the connector up by the external id or, when it was never
    /// created, by name. Absent connectors yield `None`.
    async fn get_connector(
        &self,
        connector: &ConnectorEntity,
    ) -> ProviderResult<Option<RemoteConnector>>;

    async fn create_connector(
        &self,
        connector: &ConnectorEntity,
    ) -> ProviderResult<RemoteConnector>;

    /// Replaces the remote definition.
    async fn update_connector(
        &self,
        external_id: &str,
        definition: &Value,
    ) -> ProviderResult<RemoteConnector>;

    async fn delete_connector(&self, external_id: &str) -> ProviderResult<()>;
}
