//! Postgres-backed work ledger.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use smartevents_model::{OwnerId, ResourceId, ResourceType, WorkId, WorkItem};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, WorkError};

use super::ledger::WorkRepository;

const WORK_COLUMNS: &str = "id, managed_resource_id, resource_type, owner_id, \
     submitted_at, modified_at, attempts, version";

#[derive(Clone)]
pub struct PostgresWorkRepository {
    pool: PgPool,
}

impl fmt::Debug for PostgresWorkRepository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresWorkRepository")
            .field("pool_size", &self.pool.size())
            .field("idle_connections", &self.pool.num_idle())
            .finish()
    }
}

#[derive(sqlx::FromRow)]
struct WorkRow {
    id: Uuid,
    managed_resource_id: Uuid,
    resource_type: String,
    owner_id: String,
    submitted_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    attempts: i32,
    version: i64,
}

impl TryFrom<WorkRow> for WorkItem {
    type Error = WorkError;

    fn try_from(row: WorkRow) -> Result<Self> {
        let resource_type: ResourceType = row.resource_type.parse()?;
        let attempts = u32::try_from(row.attempts).map_err(|_| {
            WorkError::Internal(format!(
                "work {} has negative attempt count {}",
                row.id, row.attempts
            ))
        })?;
        Ok(WorkItem {
            id: WorkId(row.id),
            managed_resource_id: ResourceId(row.managed_resource_id),
            resource_type,
            owner_id: OwnerId(row.owner_id),
            submitted_at: row.submitted_at,
            modified_at: row.modified_at,
            attempts,
            version: row.version,
        })
    }
}

fn attempts_param(item: &WorkItem) -> Result<i32> {
    i32::try_from(item.attempts).map_err(|_| {
        WorkError::Internal(format!(
            "work {} attempt count {} overflows storage",
            item.id, item.attempts
        ))
    })
}

impl PostgresWorkRepository {
    /// Create the repository and verify the database is reachable.
    pub async fn new(pool: PgPool) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                WorkError::Internal(format!(
                    "Work ledger failed Postgres health check: {e}"
                ))
            })?;
        info!("Work ledger connected to Postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn insert(&self, item: &WorkItem) -> Result<WorkItem> {
        let sql = format!(
            "INSERT INTO work ({WORK_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {WORK_COLUMNS}"
        );
        let row = sqlx::query_as::<_, WorkRow>(&sql)
            .bind(item.id.0)
            .bind(item.managed_resource_id.0)
            .bind(item.resource_type.as_str())
            .bind(item.owner_id.as_str())
            .bind(item.submitted_at)
            .bind(item.modified_at)
            .bind(attempts_param(item)?)
            .bind(item.version)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    WorkError::Conflict(format!(
                        "work already exists for resource {}",
                        item.managed_resource_id
                    ))
                }
                other => WorkError::Database(other),
            })?;
        row.try_into()
    }
}

#[async_trait]
impl WorkRepository for PostgresWorkRepository {
    async fn find_by_resource_id(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<WorkItem>> {
        let sql = format!(
            "SELECT {WORK_COLUMNS} FROM work WHERE managed_resource_id = $1"
        );
        let row = sqlx::query_as::<_, WorkRow>(&sql)
            .bind(resource_id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkItem::try_from).transpose()
    }

    async fn find_by_owner_id(&self, owner_id: &OwnerId) -> Result<Vec<WorkItem>> {
        let sql = format!(
            "SELECT {WORK_COLUMNS} FROM work WHERE owner_id = $1 \
             ORDER BY submitted_at"
        );
        let rows = sqlx::query_as::<_, WorkRow>(&sql)
            .bind(owner_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(WorkItem::try_from).collect()
    }

    async fn find_by_id(&self, id: WorkId) -> Result<Option<WorkItem>> {
        let sql = format!("SELECT {WORK_COLUMNS} FROM work WHERE id = $1");
        let row = sqlx::query_as::<_, WorkRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(WorkItem::try_from).transpose()
    }

    async fn persist(&self, item: WorkItem) -> Result<WorkItem> {
        let sql = format!(
            "UPDATE work \
             SET owner_id = $2, modified_at = $3, attempts = $4, \
                 version = version + 1 \
             WHERE id = $1 AND version = $5 \
             RETURNING {WORK_COLUMNS}"
        );
        let updated = sqlx::query_as::<_, WorkRow>(&sql)
            .bind(item.id.0)
            .bind(item.owner_id.as_str())
            .bind(item.modified_at)
            .bind(attempts_param(&item)?)
            .bind(item.version)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = updated {
            return row.try_into();
        }

        let stored_version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM work WHERE id = $1")
                .bind(item.id.0)
                .fetch_optional(&self.pool)
                .await?;

        match stored_version {
            Some(found) => Err(WorkError::Conflict(format!(
                "work {} was modified concurrently (expected version {}, found {found})",
                item.id, item.version
            ))),
            None => self.insert(&item).await,
        }
    }

    async fn delete_by_id(&self, id: WorkId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM work WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn reassign_stale(
        &self,
        owner_id: &OwnerId,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE work
            SET owner_id = $1,
                modified_at = NOW(),
                version = version + 1
            WHERE owner_id <> $1
              AND modified_at < $2
            "#,
        )
        .bind(owner_id.as_str())
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        let reassigned = result.rows_affected();
        if reassigned > 0 {
            debug!(owner = %owner_id, reassigned, "claimed stale work rows");
        }
        Ok(reassigned)
    }
}
