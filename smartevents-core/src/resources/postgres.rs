use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use smartevents_model::{
    Bridge, BridgeDefinition, ConnectorEntity, ManagedResourceStatus, Processor,
    ProcessorType, ResourceId,
};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{Result, WorkError};

use super::ResourceRepository;

const BRIDGE_COLUMNS: &str = "id, name, customer_id, owner, shard_id, status, \
     dependency_status, generation, definition, submitted_at, published_at, \
     modified_at";

const PROCESSOR_COLUMNS: &str = "id, bridge_id, name, customer_id, owner, \
     shard_id, processor_type, status, dependency_status, generation, \
     definition, submitted_at, published_at, modified_at";

const CONNECTOR_COLUMNS: &str = "id, processor_id, name, connector_type, \
     connector_external_id, topic_name, definition, status, dependency_status, \
     generation, error, submitted_at, published_at, modified_at";

/// Resource store over the `bridges`, `processors` and `connectors` tables.
#[derive(Clone)]
pub struct PostgresResourceRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresResourceRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresResourceRepository")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresResourceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_status(raw: &str) -> Result<ManagedResourceStatus> {
    Ok(raw.parse()?)
}

fn parse_dependency_status(raw: Option<String>) -> Result<Option<ManagedResourceStatus>> {
    raw.as_deref().map(parse_status).transpose()
}

fn map_write_error(err: sqlx::Error, what: impl fmt::Display) -> WorkError {
    match err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            WorkError::Conflict(format!("{what} violates a parent/child constraint"))
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            WorkError::Conflict(format!("{what} already exists"))
        }
        other => WorkError::Database(other),
    }
}

#[derive(sqlx::FromRow)]
struct BridgeRow {
    id: Uuid,
    name: String,
    customer_id: String,
    owner: String,
    shard_id: String,
    status: String,
    dependency_status: Option<String>,
    generation: i64,
    definition: Json<BridgeDefinition>,
    submitted_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
}

impl TryFrom<BridgeRow> for Bridge {
    type Error = WorkError;

    fn try_from(row: BridgeRow) -> Result<Self> {
        Ok(Bridge {
            id: ResourceId(row.id),
            name: row.name,
            customer_id: row.customer_id,
            owner: row.owner,
            shard_id: row.shard_id,
            status: parse_status(&row.status)?,
            dependency_status: parse_dependency_status(row.dependency_status)?,
            generation: row.generation,
            definition: row.definition.0,
            submitted_at: row.submitted_at,
            published_at: row.published_at,
            modified_at: row.modified_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProcessorRow {
    id: Uuid,
    bridge_id: Uuid,
    name: String,
    customer_id: String,
    owner: String,
    shard_id: String,
    processor_type: String,
    status: String,
    dependency_status: Option<String>,
    generation: i64,
    definition: Json<Value>,
    submitted_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProcessorRow> for Processor {
    type Error = WorkError;

    fn try_from(row: ProcessorRow) -> Result<Self> {
        Ok(Processor {
            id: ResourceId(row.id),
            bridge_id: ResourceId(row.bridge_id),
            name: row.name,
            customer_id: row.customer_id,
            owner: row.owner,
            shard_id: row.shard_id,
            processor_type: row.processor_type.parse()?,
            status: parse_status(&row.status)?,
            dependency_status: parse_dependency_status(row.dependency_status)?,
            generation: row.generation,
            definition: row.definition.0,
            submitted_at: row.submitted_at,
            published_at: row.published_at,
            modified_at: row.modified_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConnectorRow {
    id: Uuid,
    processor_id: Uuid,
    name: String,
    connector_type: String,
    connector_external_id: Option<String>,
    topic_name: String,
    definition: Json<Value>,
    status: String,
    dependency_status: Option<String>,
    generation: i64,
    error: Option<String>,
    submitted_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    modified_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConnectorRow> for ConnectorEntity {
    type Error = WorkError;

    fn try_from(row: ConnectorRow) -> Result<Self> {
        Ok(ConnectorEntity {
            id: ResourceId(row.id),
            processor_id: ResourceId(row.processor_id),
            name: row.name,
            connector_type: row.connector_type.parse()?,
            connector_external_id: row.connector_external_id,
            topic_name: row.topic_name,
            definition: row.definition.0,
            status: parse_status(&row.status)?,
            dependency_status: parse_dependency_status(row.dependency_status)?,
            generation: row.generation,
            error: row.error,
            submitted_at: row.submitted_at,
            published_at: row.published_at,
            modified_at: row.modified_at,
        })
    }
}

#[async_trait]
impl ResourceRepository for PostgresResourceRepository {
    async fn find_bridge(&self, id: ResourceId) -> Result<Option<Bridge>> {
        let sql = format!("SELECT {BRIDGE_COLUMNS} FROM bridges WHERE id = $1");
        sqlx::query_as::<_, BridgeRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Bridge::try_from)
            .transpose()
    }

    async fn persist_bridge(&self, bridge: Bridge) -> Result<Bridge> {
        let sql = format!(
            r#"
            INSERT INTO bridges ({BRIDGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                dependency_status = EXCLUDED.dependency_status,
                generation = EXCLUDED.generation,
                definition = EXCLUDED.definition,
                published_at = EXCLUDED.published_at,
                modified_at = NOW()
            RETURNING {BRIDGE_COLUMNS}
            "#
        );
        let id = bridge.id;
        sqlx::query_as::<_, BridgeRow>(&sql)
            .bind(bridge.id.0)
            .bind(&bridge.name)
            .bind(&bridge.customer_id)
            .bind(&bridge.owner)
            .bind(&bridge.shard_id)
            .bind(bridge.status.as_str())
            .bind(bridge.dependency_status.map(|s| s.as_str()))
            .bind(bridge.generation)
            .bind(Json(&bridge.definition))
            .bind(bridge.submitted_at)
            .bind(bridge.published_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, format_args!("bridge {id}")))?
            .try_into()
    }

    async fn delete_bridge(&self, id: ResourceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bridges WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, format_args!("bridge {id}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_processor(&self, id: ResourceId) -> Result<Option<Processor>> {
        let sql = format!("SELECT {PROCESSOR_COLUMNS} FROM processors WHERE id = $1");
        sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(Processor::try_from)
            .transpose()
    }

    async fn persist_processor(&self, processor: Processor) -> Result<Processor> {
        let sql = format!(
            r#"
            INSERT INTO processors ({PROCESSOR_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                dependency_status = EXCLUDED.dependency_status,
                generation = EXCLUDED.generation,
                definition = EXCLUDED.definition,
                published_at = EXCLUDED.published_at,
                modified_at = NOW()
            RETURNING {PROCESSOR_COLUMNS}
            "#
        );
        let id = processor.id;
        sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(processor.id.0)
            .bind(processor.bridge_id.0)
            .bind(&processor.name)
            .bind(&processor.customer_id)
            .bind(&processor.owner)
            .bind(&processor.shard_id)
            .bind(processor.processor_type.as_str())
            .bind(processor.status.as_str())
            .bind(processor.dependency_status.map(|s| s.as_str()))
            .bind(processor.generation)
            .bind(Json(&processor.definition))
            .bind(processor.submitted_at)
            .bind(processor.published_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, format_args!("processor {id}")))?
            .try_into()
    }

    async fn delete_processor(&self, id: ResourceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM processors WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| map_write_error(e, format_args!("processor {id}")))?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_hidden_processors(&self, bridge_id: ResourceId) -> Result<Vec<Processor>> {
        let sql = format!(
            "SELECT {PROCESSOR_COLUMNS} FROM processors \
             WHERE bridge_id = $1 AND processor_type = $2 \
             ORDER BY submitted_at"
        );
        sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(bridge_id.0)
            .bind(ProcessorType::ErrorHandler.as_str())
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Processor::try_from)
            .collect()
    }

    async fn find_connector(&self, id: ResourceId) -> Result<Option<ConnectorEntity>> {
        let sql = format!("SELECT {CONNECTOR_COLUMNS} FROM connectors WHERE id = $1");
        sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(ConnectorEntity::try_from)
            .transpose()
    }

    async fn find_connector_by_processor(
        &self,
        processor_id: ResourceId,
    ) -> Result<Option<ConnectorEntity>> {
        let sql = format!(
            "SELECT {CONNECTOR_COLUMNS} FROM connectors WHERE processor_id = $1"
        );
        sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(processor_id.0)
            .fetch_optional(&self.pool)
            .await?
            .map(ConnectorEntity::try_from)
            .transpose()
    }

    async fn persist_connector(
        &self,
        connector: ConnectorEntity,
    ) -> Result<ConnectorEntity> {
        let sql = format!(
            r#"
            INSERT INTO connectors ({CONNECTOR_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            ON CONFLICT (id) DO UPDATE SET
                connector_external_id = EXCLUDED.connector_external_id,
                topic_name = EXCLUDED.topic_name,
                definition = EXCLUDED.definition,
                status = EXCLUDED.status,
                dependency_status = EXCLUDED.dependency_status,
                generation = EXCLUDED.generation,
                error = EXCLUDED.error,
                published_at = EXCLUDED.published_at,
                modified_at = NOW()
            RETURNING {CONNECTOR_COLUMNS}
            "#
        );
        let id = connector.id;
        sqlx::query_as::<_, ConnectorRow>(&sql)
            .bind(connector.id.0)
            .bind(connector.processor_id.0)
            .bind(&connector.name)
            .bind(connector.connector_type.as_str())
            .bind(&connector.connector_external_id)
            .bind(&connector.topic_name)
            .bind(Json(&connector.definition))
            .bind(connector.status.as_str())
            .bind(connector.dependency_status.map(|s| s.as_str()))
            .bind(connector.generation)
            .bind(&connector.error)
            .bind(connector.submitted_at)
            .bind(connector.published_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, format_args!("connector {id}")))?
            .try_into()
    }

    async fn delete_connector(&self, id: ResourceId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM connectors WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_bridges_by_shard(&self, shard_id: &str) -> Result<Vec<Bridge>> {
        let sql = format!(
            "SELECT {BRIDGE_COLUMNS} FROM bridges WHERE shard_id = $1 \
             ORDER BY submitted_at"
        );
        sqlx::query_as::<_, BridgeRow>(&sql)
            .bind(shard_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Bridge::try_from)
            .collect()
    }

    async fn find_processors_by_shard(&self, shard_id: &str) -> Result<Vec<Processor>> {
        let sql = format!(
            "SELECT {PROCESSOR_COLUMNS} FROM processors WHERE shard_id = $1 \
             ORDER BY submitted_at"
        );
        sqlx::query_as::<_, ProcessorRow>(&sql)
            .bind(shard_id)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Processor::try_from)
            .collect()
    }
}
