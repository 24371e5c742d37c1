use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smartevents_core::work::WorkConfig;

/// Everything the manager process needs to wire the engine.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Ledger polling, orphan adoption and shutdown tuning.
    pub work: WorkConfig,
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub topics: TopicsConfig,
    /// Shard whose pending deployments the `pending` command lists.
    pub shard_id: String,
}

/// Postgres connection settings. Without a URL the manager runs on
/// in-memory stores.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderMode {
    /// Talk to the topic and connector-management services over HTTP.
    #[default]
    Http,
    /// Process-local fakes, for development without the external services.
    InMemory,
}

/// Where the topic and connector-management services live.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub mode: ProviderMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectors_url: Option<String>,
    /// Bearer token sent to both services.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::default(),
            topics_url: None,
            connectors_url: None,
            token: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvidersConfig")
            .field("mode", &self.mode)
            .field("topics_url", &self.topics_url)
            .field("connectors_url", &self.connectors_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl ProvidersConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicsConfig {
    /// Prepended to every topic and connector name the manager creates.
    pub prefix: String,
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            prefix: "ob-".to_string(),
        }
    }
}
