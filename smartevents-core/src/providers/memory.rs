//! Process-local provider implementations.
//!
//! Used by tests and by the manager's `in_memory` provider mode. Both fakes
//! model the asynchronous settling of the real services: new topics and
//! connectors only become ready on a later call.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use smartevents_model::ConnectorEntity;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;

use super::{
    ConnectorState, ConnectorsApi, ProviderResult, RemoteConnector,
    TopicAccessType, TopicService, TopicStatus,
};

#[derive(Debug, Default)]
struct TopicRecord {
    grants: HashSet<TopicAccessType>,
}

/// Topic service fake. A topic reports [`TopicStatus::Pending`] on the call
/// that creates it and [`TopicStatus::Ready`] afterwards.
#[derive(Clone, Debug, Default)]
pub struct InMemoryTopicService {
    topics: Arc<Mutex<HashMap<String, TopicRecord>>>,
    ready_on_create: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
    create_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
}

impl InMemoryTopicService {
    /// Empty service; new topics settle on the next call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Topics are ready as soon as they are created.
    pub fn with_ready_on_create(self) -> Self {
        self.ready_on_create.store(true, Ordering::SeqCst);
        self
    }

    /// Makes every subsequent call fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delays every subsequent call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Calls to `create_topic_and_grant_access`, failed ones included.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Calls to `delete_topic_and_revoke_access`, failed ones included.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Whether `topic` exists.
    pub async fn has_topic(&self, topic: &str) -> bool {
        self.topics.lock().await.contains_key(topic)
    }

    /// Whether `access` was granted on `topic`.
    pub async fn has_grant(&self, topic: &str, access: TopicAccessType) -> bool {
        self.topics
            .lock()
            .await
            .get(topic)
            .is_some_and(|record| record.grants.contains(&access))
    }

    /// Number of existing topics.
    pub async fn topic_count(&self) -> usize {
        self.topics.lock().await.len()
    }

    async fn check_available(&self) -> ProviderResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Transport(
                "topic service unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl TopicService for InMemoryTopicService {
    async fn create_topic_and_grant_access(
        &self,
        topic: &str,
        access: TopicAccessType,
    ) -> ProviderResult<TopicStatus> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available().await?;

        let mut topics = self.topics.lock().await;
        let status = match topics.get_mut(topic) {
            Some(record) => {
                record.grants.insert(access);
                TopicStatus::Ready
            }
            None => {
                let ready = self.ready_on_create.load(Ordering::SeqCst);
                let mut record = TopicRecord::default();
                record.grants.insert(access);
                topics.insert(topic.to_string(), record);
                debug!(topic, %access, "created topic");
                if ready {
                    TopicStatus::Ready
                } else {
                    TopicStatus::Pending
                }
            }
        };
        Ok(status)
    }

    async fn delete_topic_and_revoke_access(
        &self,
        topic: &str,
        access: TopicAccessType,
    ) -> ProviderResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available().await?;

        if self.topics.lock().await.remove(topic).is_some() {
            debug!(topic, %access, "deleted topic");
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct ConnectorRecord {
    name: String,
    remote: RemoteConnector,
}

/// Connector-management fake.
///
/// With auto-settle enabled (the default) a `Provisioning` or `Updating`
/// connector turns `Ready` on the next lookup and a `Deleting` connector
/// disappears on the next lookup.
#[derive(Clone, Debug)]
pub struct InMemoryConnectorsApi {
    connectors: Arc<Mutex<HashMap<String, ConnectorRecord>>>,
    auto_settle: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
    create_calls: Arc<AtomicUsize>,
    update_calls: Arc<AtomicUsize>,
    delete_calls: Arc<AtomicUsize>,
}

impl Default for InMemoryConnectorsApi {
    fn default() -> Self {
        Self {
            connectors: Arc::default(),
            auto_settle: Arc::new(AtomicBool::new(true)),
            failing: Arc::default(),
            create_calls: Arc::default(),
            update_calls: Arc::default(),
            delete_calls: Arc::default(),
        }
    }
}

impl InMemoryConnectorsApi {
    /// Empty service with auto-settle enabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Turns automatic state progression on lookup on or off.
    pub fn set_auto_settle(&self, enabled: bool) {
        self.auto_settle.store(enabled, Ordering::SeqCst);
    }

    /// Makes every subsequent call fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Calls to `create_connector`.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Calls to `update_connector`.
    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Calls to `delete_connector`.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Seeds a remote connector, e.g. one that already exists before the
    /// worker first looks.
    pub async fn insert(&self, name: impl Into<String>, remote: RemoteConnector) {
        self.connectors.lock().await.insert(
            remote.id.clone(),
            ConnectorRecord {
                name: name.into(),
                remote,
            },
        );
    }

    /// Forces the remote state. Returns `false` for unknown ids.
    pub async fn set_state(
        &self,
        external_id: &str,
        state: ConnectorState,
        error: Option<String>,
    ) -> bool {
        let mut guard = self.connectors.lock().await;
        match guard.get_mut(external_id) {
            Some(record) => {
                record.remote.state = state;
                record.remote.error = error;
                true
            }
            None => false,
        }
    }

    /// Current remote view of `external_id`.
    pub async fn remote(&self, external_id: &str) -> Option<RemoteConnector> {
        self.connectors
            .lock()
            .await
            .get(external_id)
            .map(|record| record.remote.clone())
    }

    /// Number of remote connectors.
    pub async fn len(&self) -> usize {
        self.connectors.lock().await.len()
    }

    /// True when no remote connector exists.
    pub async fn is_empty(&self) -> bool {
        self.connectors.lock().await.is_empty()
    }

    fn check_available(&self) -> ProviderResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ProviderError::Status {
                service: "connectors",
                status: 503,
                message: "connector service unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectorsApi for InMemoryConnectorsApi {
    async fn get_connector(
        &self,
        connector: &ConnectorEntity,
    ) -> ProviderResult<Option<RemoteConnector>> {
        self.check_available()?;

        let mut guard = self.connectors.lock().await;
        let key = match connector.connector_external_id.as_deref() {
            Some(id) => guard.contains_key(id).then(|| id.to_string()),
            None => guard
                .iter()
                .find(|(_, record)| record.name == connector.name)
                .map(|(id, _)| id.clone()),
        };
        let Some(key) = key else {
            return Ok(None);
        };

        if self.auto_settle.load(Ordering::SeqCst) {
            let state = guard.get(&key).map(|record| record.remote.state);
            match state {
                Some(ConnectorState::Provisioning | ConnectorState::Updating) => {
                    if let Some(record) = guard.get_mut(&key) {
                        record.remote.state = ConnectorState::Ready;
                    }
                }
                Some(ConnectorState::Deleting) => {
                    guard.remove(&key);
                    return Ok(None);
                }
                _ => {}
            }
        }

        Ok(guard.get(&key).map(|record| record.remote.clone()))
    }

    async fn create_connector(
        &self,
        connector: &ConnectorEntity,
    ) -> ProviderResult<RemoteConnector> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let remote = RemoteConnector {
            id: format!("conn-{}", Uuid::new_v4().simple()),
            state: ConnectorState::Provisioning,
            definition: connector.definition.clone(),
            error: None,
        };
        self.connectors.lock().await.insert(
            remote.id.clone(),
            ConnectorRecord {
                name: connector.name.clone(),
                remote: remote.clone(),
            },
        );
        Ok(remote)
    }

    async fn update_connector(
        &self,
        external_id: &str,
        definition: &Value,
    ) -> ProviderResult<RemoteConnector> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let mut guard = self.connectors.lock().await;
        let record = guard.get_mut(external_id).ok_or_else(|| ProviderError::Status {
            service: "connectors",
            status: 404,
            message: format!("connector {external_id} not found"),
        })?;
        record.remote.definition = definition.clone();
        record.remote.state = ConnectorState::Updating;
        Ok(record.remote.clone())
    }

    async fn delete_connector(&self, external_id: &str) -> ProviderResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        if let Some(record) = self.connectors.lock().await.get_mut(external_id) {
            record.remote.state = ConnectorState::Deleting;
        }
        Ok(())
    }
}
