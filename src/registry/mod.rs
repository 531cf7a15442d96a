//! Registry of downstream tool servers.
//!
//! `Registry` owns validation and auditing; persistence sits behind the
//! [`RegistryStore`] port with an in-memory and a Postgres adapter.

mod memory;
mod postgres;
mod store;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

pub use memory::MemoryRegistryStore;
pub use postgres::PgRegistryStore;
pub use store::{RegistryStore, StoreError, StoreResult};

use crate::audit;
use crate::models::{AuditEntry, HealthStatus, NewServer, ServerUpdate, ToolServerRecord};

pub const MAX_NAME_LEN: usize = 64;

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("server '{0}' already exists")]
    Conflict(String),

    #[error("server '{0}' not found")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("registry unavailable: {0}")]
    Unavailable(#[from] StoreError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn RegistryStore>,
}

impl Registry {
    pub fn new(store: Arc<dyn RegistryStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRegistryStore::new()))
    }

    pub fn store(&self) -> &dyn RegistryStore {
        self.store.as_ref()
    }

    pub async fn list(&self, enabled_only: bool) -> RegistryResult<Vec<ToolServerRecord>> {
        Ok(self.store.list(enabled_only).await?)
    }

    pub async fn get(&self, name: &str) -> RegistryResult<ToolServerRecord> {
        self.store
            .get(name)
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub async fn add(&self, req: NewServer) -> RegistryResult<ToolServerRecord> {
        validate_name(&req.name)?;
        validate_url(&req.url)?;
        if let Some(base) = backend_url(&req.backend) {
            validate_url(base)?;
        }
        validate_timeout(req.timeout_secs)?;

        let record = ToolServerRecord::from_new(req, Utc::now());
        if !self.store.insert(&record).await? {
            return Err(RegistryError::Conflict(record.name));
        }

        tracing::info!(server = %record.name, tools = record.tool_count(), "registry: server added");
        audit::record(
            self.store(),
            "add_server",
            json!({
                "name": record.name,
                "url": record.url,
                "priority": record.priority,
                "tools": record.tool_count(),
            }),
            audit::ACTOR_ADMIN,
        )
        .await;
        Ok(record)
    }

    pub async fn update(&self, name: &str, update: ServerUpdate) -> RegistryResult<ToolServerRecord> {
        if update.is_empty() {
            return Err(RegistryError::InvalidArgument("no fields to update".to_string()));
        }
        if let Some(url) = &update.url {
            validate_url(url)?;
        }
        if let Some(base) = backend_url(&update.backend) {
            validate_url(base)?;
        }
        validate_timeout(update.timeout_secs.flatten())?;

        let record = self
            .store
            .update(name, &update, Utc::now())
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        tracing::info!(server = %name, fields = ?update.field_names(), "registry: server updated");
        audit::record(
            self.store(),
            "update_server",
            json!({ "name": name, "fields": update.field_names() }),
            audit::ACTOR_ADMIN,
        )
        .await;
        Ok(record)
    }

    /// Idempotent: removing an unknown name succeeds with `false`.
    pub async fn remove(&self, name: &str) -> RegistryResult<bool> {
        let removed = self.store.delete(name).await?;
        if removed {
            tracing::info!(server = %name, "registry: server removed");
        } else {
            tracing::debug!(server = %name, "registry: remove of unknown server");
        }
        audit::record(
            self.store(),
            "remove_server",
            json!({ "name": name, "existed": removed }),
            audit::ACTOR_ADMIN,
        )
        .await;
        Ok(removed)
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) -> RegistryResult<ToolServerRecord> {
        let record = self
            .store
            .update(name, &ServerUpdate::enabled_only(enabled), Utc::now())
            .await?
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;

        let action = if enabled { "enable_server" } else { "disable_server" };
        tracing::info!(server = %name, enabled, "registry: server toggled");
        audit::record(self.store(), action, json!({ "name": name }), audit::ACTOR_ADMIN).await;
        Ok(record)
    }

    /// Mirror a probe result. Not audited: this runs on every monitor cycle.
    pub async fn record_health(
        &self,
        name: &str,
        status: HealthStatus,
        at: DateTime<Utc>,
    ) -> RegistryResult<()> {
        if self.store.record_health(name, status, at).await? {
            Ok(())
        } else {
            Err(RegistryError::NotFound(name.to_string()))
        }
    }

    pub async fn audit_log(&self, limit: usize) -> RegistryResult<Vec<AuditEntry>> {
        Ok(self.store.recent_audit(limit).await?)
    }

    pub async fn ping(&self) -> RegistryResult<()> {
        Ok(self.store.ping().await?)
    }
}

/// ASCII letters, digits, `-`, `_` and `.`. Never `:`, which separates the
/// server prefix in qualified tool names.
pub fn validate_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidArgument("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RegistryError::InvalidArgument(format!(
            "name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(RegistryError::InvalidArgument(format!(
            "name contains invalid character '{bad}'"
        )));
    }
    Ok(())
}

pub fn validate_url(raw: &str) -> RegistryResult<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| RegistryError::InvalidArgument(format!("invalid url '{raw}': {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(RegistryError::InvalidArgument(format!(
            "unsupported url scheme '{other}'"
        ))),
    }
}

/// A zero timeout would fail every call before it is sent.
pub fn validate_timeout(timeout_secs: Option<u32>) -> RegistryResult<()> {
    match timeout_secs {
        Some(0) => Err(RegistryError::InvalidArgument(
            "timeout_secs must be at least 1".to_string(),
        )),
        _ => Ok(()),
    }
}

fn backend_url(backend: &Option<crate::models::ExecutionBackend>) -> Option<&str> {
    use crate::models::ExecutionBackend;
    match backend.as_ref()? {
        ExecutionBackend::StaticForward { base_url } => base_url.as_deref(),
        ExecutionBackend::Webhook { url, .. } => Some(url),
        // Templates carry `{placeholders}` and are validated once filled.
        ExecutionBackend::Http { .. } => None,
    }
}
