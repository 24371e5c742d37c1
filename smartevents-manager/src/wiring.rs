//! Builds the engine from a [`ManagerConfig`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use smartevents_config::{DatabaseConfig, ManagerConfig, ProviderMode, ProvidersConfig};
use smartevents_core::providers::{
    ConnectorsApi, HttpConnectorsApi, HttpTopicService, InMemoryConnectorsApi,
    InMemoryTopicService, ResourceNames, TopicService,
};
use smartevents_core::resources::{
    InMemoryResourceRepository, PostgresResourceRepository, ResourceRepository,
};
use smartevents_core::work::{
    InMemoryWorkRepository, PostgresWorkRepository, WorkManager, WorkRepository,
};
use smartevents_core::workers::WorkerSet;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

pub struct Stores {
    pub ledger: Arc<dyn WorkRepository>,
    pub resources: Arc<dyn ResourceRepository>,
}

pub async fn connect(database: &DatabaseConfig) -> anyhow::Result<Option<PgPool>> {
    let Some(url) = database.url.as_deref() else {
        return Ok(None);
    };
    let pool = PgPoolOptions::new()
        .max_connections(database.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL");
    Ok(Some(pool))
}

pub async fn migrate(pool: &PgPool) -> anyhow::Result<()> {
    smartevents_core::MIGRATOR
        .run(pool)
        .await
        .context("database migration failed")?;
    info!("Database migrations applied");
    Ok(())
}

/// Postgres stores when a pool is available, in-memory stores otherwise.
pub async fn stores(pool: Option<PgPool>) -> anyhow::Result<Stores> {
    match pool {
        Some(pool) => {
            let ledger = PostgresWorkRepository::new(pool.clone())
                .await
                .context("work ledger unavailable")?;
            Ok(Stores {
                ledger: Arc::new(ledger),
                resources: Arc::new(PostgresResourceRepository::new(pool)),
            })
        }
        None => {
            warn!("No database configured; work and resources are kept in memory");
            Ok(Stores {
                ledger: Arc::new(InMemoryWorkRepository::new()),
                resources: Arc::new(InMemoryResourceRepository::new()),
            })
        }
    }
}

fn providers(
    config: &ProvidersConfig,
) -> anyhow::Result<(Arc<dyn TopicService>, Arc<dyn ConnectorsApi>)> {
    match config.mode {
        ProviderMode::Http => {
            let timeout = config.request_timeout();
            let topics_url = config
                .topics_url
                .as_deref()
                .context("providers.topics_url is required")?;
            let connectors_url = config
                .connectors_url
                .as_deref()
                .context("providers.connectors_url is required")?;
            let topics =
                HttpTopicService::with_timeout(topics_url, config.token.clone(), timeout)
                    .context("invalid topic service configuration")?;
            let connectors = HttpConnectorsApi::with_timeout(
                connectors_url,
                config.token.clone(),
                timeout,
            )
            .context("invalid connector service configuration")?;
            Ok((Arc::new(topics), Arc::new(connectors)))
        }
        ProviderMode::InMemory => {
            warn!("Using in-memory topic and connector providers");
            Ok((
                Arc::new(InMemoryTopicService::new()),
                Arc::new(InMemoryConnectorsApi::new()),
            ))
        }
    }
}

pub fn manager(config: &ManagerConfig, stores: &Stores) -> anyhow::Result<WorkManager> {
    let (topics, connectors) = providers(&config.providers)?;
    let workers = WorkerSet::new(
        Arc::clone(&stores.resources),
        topics,
        connectors,
        ResourceNames::new(config.topics.prefix.clone()),
    );
    Ok(WorkManager::new(
        Arc::clone(&stores.ledger),
        workers,
        config.work.clone(),
    ))
}
