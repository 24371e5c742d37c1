//! reqwest-backed provider clients.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smartevents_model::ConnectorEntity;
use tracing::{debug, info};
use url::Url;

use crate::error::ProviderError;

use super::{
    ConnectorsApi, ProviderResult, RemoteConnector, TopicAccessType, TopicService,
    TopicStatus,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared plumbing for the provider clients.
#[derive(Clone)]
struct RestClient {
    service: &'static str,
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("service", &self.service)
            .field("base_url", &self.base_url.as_str())
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

impl RestClient {
    fn new(
        service: &'static str,
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ProviderError::Configuration(format!("{service} url '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ProviderError::Configuration(format!(
                "{service} url '{base_url}' cannot be used as a base"
            )));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(e.to_string()))?;

        info!("Creating {service} client with base URL: {base_url}");
        Ok(Self {
            service,
            client,
            base_url,
            token,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> ProviderResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ProviderError::Configuration(format!(
                    "{} url cannot be a base",
                    self.service
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> ProviderResult<Response> {
        let response = self.authorize(builder).send().await?;
        Ok(response)
    }

    async fn error_for(&self, response: Response) -> ProviderError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        ProviderError::Status {
            service: self.service,
            status,
            message,
        }
    }
}

#[derive(Serialize)]
struct TopicRequest<'a> {
    name: &'a str,
    access: TopicAccessType,
}

#[derive(Deserialize)]
struct TopicResponse {
    status: TopicStatus,
}

/// Client for the topic and access-grant service.
#[derive(Clone, Debug)]
pub struct HttpTopicService {
    rest: RestClient,
}

impl HttpTopicService {
    pub fn new(base_url: &str, token: Option<String>) -> ProviderResult<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        Ok(Self {
            rest: RestClient::new("topics", base_url, token, timeout)?,
        })
    }
}

#[async_trait]
impl TopicService for HttpTopicService {
    async fn create_topic_and_grant_access(
        &self,
        topic: &str,
        access: TopicAccessType,
    ) -> ProviderResult<TopicStatus> {
        let url = self.rest.endpoint(&["topics"])?;
        let request = self
            .rest
            .client
            .post(url)
            .json(&TopicRequest { name: topic, access });
        let response = self.rest.send(request).await?;

        match response.status() {
            status if status.is_success() => {
                let body: TopicResponse = response.json().await?;
                debug!(topic, status = ?body.status, "topic create acknowledged");
                Ok(body.status)
            }
            // Topic already exists; creation is idempotent.
            StatusCode::CONFLICT => Ok(TopicStatus::Ready),
            _ => Err(self.rest.error_for(response).await),
        }
    }

    async fn delete_topic_and_revoke_access(
        &self,
        topic: &str,
        access: TopicAccessType,
    ) -> ProviderResult<()> {
        let url = self.rest.endpoint(&["topics", topic])?;
        let request = self
            .rest
            .client
            .delete(url)
            .query(&[("access", access.as_str())]);
        let response = self.rest.send(request).await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!(topic, "topic already deleted");
                Ok(())
            }
            _ => Err(self.rest.error_for(response).await),
        }
    }
}

#[derive(Serialize)]
struct CreateConnectorRequest<'a> {
    name: &'a str,
    connector_type: &'static str,
    topic: &'a str,
    definition: &'a Value,
}

#[derive(Deserialize)]
struct ConnectorList {
    #[serde(default)]
    items: Vec<RemoteConnector>,
}

/// Client for the connector-management service.
#[derive(Clone, Debug)]
pub struct HttpConnectorsApi {
    rest: RestClient,
}

impl HttpConnectorsApi {
    pub fn new(base_url: &str, token: Option<String>) -> ProviderResult<Self> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> ProviderResult<Self> {
        Ok(Self {
            rest: RestClient::new("connectors", base_url, token, timeout)?,
        })
    }

    async fn find_by_name(&self, name: &str) -> ProviderResult<Option<RemoteConnector>> {
        let url = self.rest.endpoint(&["connectors"])?;
        let request = self.rest.client.get(url).query(&[("name", name)]);
        let response = self.rest.send(request).await?;
        if !response.status().is_success() {
            return Err(self.rest.error_for(response).await);
        }
        let list: ConnectorList = response.json().await?;
        Ok(list.items.into_iter().next())
    }
}

#[async_trait]
impl ConnectorsApi for HttpConnectorsApi {
    async fn get_connector(
        &self,
        connector: &ConnectorEntity,
    ) -> ProviderResult<Option<RemoteConnector>> {
        let Some(external_id) = connector.connector_external_id.as_deref() else {
            return self.find_by_name(&connector.name).await;
        };

        let url = self.rest.endpoint(&["connectors", external_id])?;
        let response = self.rest.send(self.rest.client.get(url)).await?;
        match response.status() {
            status if status.is_success() => Ok(Some(response.json().await?)),
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            _ => Err(self.rest.error_for(response).await),
        }
    }

    async fn create_connector(
        &self,
        connector: &ConnectorEntity,
    ) -> ProviderResult<RemoteConnector> {
        let url = self.rest.endpoint(&["connectors"])?;
        let body = CreateConnectorRequest {
            name: &connector.name,
            connector_type: connector.connector_type.as_str(),
            topic: &connector.topic_name,
            definition: &connector.definition,
        };
        let response = self.rest.send(self.rest.client.post(url).json(&body)).await?;
        if !response.status().is_success() {
            return Err(self.rest.error_for(response).await);
        }
        let created: RemoteConnector = response.json().await?;
        info!(name = %connector.name, id = %created.id, "created remote connector");
        Ok(created)
    }

    async fn update_connector(
        &self,
        external_id: &str,
        definition: &Value,
    ) -> ProviderResult<RemoteConnector> {
        let url = self.rest.endpoint(&["connectors", external_id])?;
        let response = self
            .rest
            .send(self.rest.client.patch(url).json(definition))
            .await?;
        if !response.status().is_success() {
            return Err(self.rest.error_for(response).await);
        }
        Ok(response.json().await?)
    }

    async fn delete_connector(&self, external_id: &str) -> ProviderResult<()> {
        let url = self.rest.endpoint(&["connectors", external_id])?;
        let response = self.rest.send(self.rest.client.delete(url)).await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            _ => Err(self.rest.error_for(response).await),
        }
    }
}
