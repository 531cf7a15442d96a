//! Postgres registry store over `mcp_servers` + `mcp_audit_log`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use super::store::{RegistryStore, StoreError, StoreResult};
use crate::models::{
    AuditEntry, ExecutionBackend, HealthStatus, NewAuditEntry, RecoveryHook, ServerUpdate,
    ToolManifest, ToolServerRecord,
};

const SERVER_COLUMNS: &str = "name, description, url, auth_key, enabled, priority, health_status, \
     last_health_check, tool_manifest, backend, health_path, accepted_statuses, recovery, \
     timeout_secs, created_at, updated_at";

#[derive(Debug, FromRow)]
struct ServerRow {
    name: String,
    description: String,
    url: String,
    auth_key: Option<String>,
    enabled: bool,
    priority: i32,
    health_status: String,
    last_health_check: Option<DateTime<Utc>>,
    tool_manifest: Option<Json<ToolManifest>>,
    backend: Json<ExecutionBackend>,
    health_path: Option<String>,
    accepted_statuses: Vec<i32>,
    recovery: Option<Json<RecoveryHook>>,
    timeout_secs: Option<i32>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ServerRow> for ToolServerRecord {
    fn from(row: ServerRow) -> Self {
        let health_status = row.health_status.parse().unwrap_or_else(|e| {
            tracing::warn!(server = %row.name, "{e}; treating as unknown");
            HealthStatus::Unknown
        });
        Self {
            name: row.name,
            description: row.description,
            url: row.url,
            auth_key: row.auth_key,
            enabled: row.enabled,
            priority: row.priority,
            health_status,
            last_health_check: row.last_health_check,
            tool_manifest: row.tool_manifest.map(|j| j.0),
            backend: row.backend.0,
            health_path: row.health_path,
            accepted_statuses: row
                .accepted_statuses
                .into_iter()
                .filter_map(|s| u16::try_from(s).ok())
                .collect(),
            recovery: row.recovery.map(|j| j.0),
            timeout_secs: row.timeout_secs.and_then(|t| u32::try_from(t).ok()),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    action: String,
    details: Value,
    actor: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PgRegistryStore {
    pool: PgPool,
}

impl PgRegistryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the bundled migrations. Safe to call on every start.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

fn statuses_column(statuses: &[u16]) -> Vec<i32> {
    statuses.iter().map(|s| i32::from(*s)).collect()
}

fn timeout_column(timeout: Option<u32>) -> Option<i32> {
    timeout.map(|t| i32::try_from(t).unwrap_or(i32::MAX))
}

#[async_trait]
impl RegistryStore for PgRegistryStore {
    async fn list(&self, enabled_only: bool) -> StoreResult<Vec<ToolServerRecord>> {
        let sql = if enabled_only {
            format!("SELECT {SERVER_COLUMNS} FROM mcp_servers WHERE enabled ORDER BY priority ASC, name ASC")
        } else {
            format!("SELECT {SERVER_COLUMNS} FROM mcp_servers ORDER BY priority ASC, name ASC")
        };
        let rows = sqlx::query_as::<_, ServerRow>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(ToolServerRecord::from).collect())
    }

    async fn get(&self, name: &str) -> StoreResult<Option<ToolServerRecord>> {
        let sql = format!("SELECT {SERVER_COLUMNS} FROM mcp_servers WHERE name = $1");
        let row = sqlx::query_as::<_, ServerRow>(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ToolServerRecord::from))
    }

    async fn insert(&self, record: &ToolServerRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO mcp_servers (name, description, url, auth_key, enabled, priority, \
             health_status, last_health_check, tool_manifest, backend, health_path, \
             accepted_statuses, recovery, timeout_secs, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.url)
        .bind(&record.auth_key)
        .bind(record.enabled)
        .bind(record.priority)
        .bind(record.health_status.as_str())
        .bind(record.last_health_check)
        .bind(record.tool_manifest.as_ref().map(Json))
        .bind(Json(&record.backend))
        .bind(&record.health_path)
        .bind(statuses_column(&record.accepted_statuses))
        .bind(record.recovery.as_ref().map(Json))
        .bind(timeout_column(record.timeout_secs))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update(
        &self,
        name: &str,
        update: &ServerUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ToolServerRecord>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {SERVER_COLUMNS} FROM mcp_servers WHERE name = $1 FOR UPDATE");
        let Some(row) = sqlx::query_as::<_, ServerRow>(&sql)
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let mut record = ToolServerRecord::from(row);
        update.apply_to(&mut record, now);

        sqlx::query(
            "UPDATE mcp_servers SET description = $2, url = $3, auth_key = $4, enabled = $5, \
             priority = $6, tool_manifest = $7, backend = $8, health_path = $9, \
             accepted_statuses = $10, recovery = $11, timeout_secs = $12, updated_at = $13 \
             WHERE name = $1",
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.url)
        .bind(&record.auth_key)
        .bind(record.enabled)
        .bind(record.priority)
        .bind(record.tool_manifest.as_ref().map(Json))
        .bind(Json(&record.backend))
        .bind(&record.health_path)
        .bind(statuses_column(&record.accepted_statuses))
        .bind(record.recovery.as_ref().map(Json))
        .bind(timeout_column(record.timeout_secs))
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(record))
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM mcp_servers WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_health(
        &self,
        name: &str,
        status: HealthStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE mcp_servers SET health_status = $2, last_health_check = $3 WHERE name = $1",
        )
        .bind(name)
        .bind(status.as_str())
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<()> {
        sqlx::query("INSERT INTO mcp_audit_log (action, details, actor) VALUES ($1, $2, $3)")
            .bind(&entry.action)
            .bind(&entry.details)
            .bind(&entry.actor)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, action, details, actor, created_at FROM mcp_audit_log \
             ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AuditEntry {
                id: r.id,
                action: r.action,
                details: r.details,
                actor: r.actor,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(StoreError::from)
    }
}
