//! Persistence port for tool server records and the audit log.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{AuditEntry, HealthStatus, NewAuditEntry, ServerUpdate, ToolServerRecord};

pub type StoreResult<T> = Result<T, StoreError>;

/// Backend failure. The registry maps every variant to `Unavailable`.
#[derive(Debug, Clone, Error)]
#[error("registry store error: {0}")]
pub struct StoreError(pub Arc<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Arc::new(err))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend(err)
    }
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// All records sorted by `priority` then `name`.
    async fn list(&self, enabled_only: bool) -> StoreResult<Vec<ToolServerRecord>>;

    async fn get(&self, name: &str) -> StoreResult<Option<ToolServerRecord>>;

    /// Returns `false` without writing when the name is already taken.
    async fn insert(&self, record: &ToolServerRecord) -> StoreResult<bool>;

    /// Returns the merged record, or `None` when the name is unknown.
    async fn update(
        &self,
        name: &str,
        update: &ServerUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ToolServerRecord>>;

    /// Returns whether a record existed.
    async fn delete(&self, name: &str) -> StoreResult<bool>;

    async fn record_health(
        &self,
        name: &str,
        status: HealthStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<()>;

    /// Newest first.
    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditEntry>>;

    async fn ping(&self) -> StoreResult<()>;
}
