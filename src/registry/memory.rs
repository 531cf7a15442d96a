//! In-memory registry store, used when no `DATABASE_URL` is configured and in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::store::{RegistryStore, StoreResult};
use crate::models::{AuditEntry, HealthStatus, NewAuditEntry, ServerUpdate, ToolServerRecord};

#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    servers: BTreeMap<String, ToolServerRecord>,
    audit: Vec<AuditEntry>,
    next_audit_id: i64,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with ready-made records (fixtures, bootstrap imports).
    pub fn with_records(records: impl IntoIterator<Item = ToolServerRecord>) -> Self {
        let servers = records
            .into_iter()
            .map(|r| (r.name.clone(), r))
            .collect::<BTreeMap<_, _>>();
        Self {
            state: RwLock::new(MemoryState {
                servers,
                ..MemoryState::default()
            }),
        }
    }
}

pub(crate) fn sort_records(records: &mut [ToolServerRecord]) {
    records.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn list(&self, enabled_only: bool) -> StoreResult<Vec<ToolServerRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<ToolServerRecord> = state
            .servers
            .values()
            .filter(|r| !enabled_only || r.enabled)
            .cloned()
            .collect();
        sort_records(&mut records);
        Ok(records)
    }

    async fn get(&self, name: &str) -> StoreResult<Option<ToolServerRecord>> {
        Ok(self.state.read().await.servers.get(name).cloned())
    }

    async fn insert(&self, record: &ToolServerRecord) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        if state.servers.contains_key(&record.name) {
            return Ok(false);
        }
        state.servers.insert(record.name.clone(), record.clone());
        Ok(true)
    }

    async fn update(
        &self,
        name: &str,
        update: &ServerUpdate,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<ToolServerRecord>> {
        let mut state = self.state.write().await;
        Ok(state.servers.get_mut(name).map(|record| {
            update.apply_to(record, now);
            record.clone()
        }))
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        Ok(self.state.write().await.servers.remove(name).is_some())
    }

    async fn record_health(
        &self,
        name: &str,
        status: HealthStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        match state.servers.get_mut(name) {
            Some(record) => {
                record.health_status = status;
                record.last_health_check = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> StoreResult<()> {
        let mut state = self.state.write().await;
        state.next_audit_id += 1;
        let id = state.next_audit_id;
        state.audit.push(AuditEntry {
            id,
            action: entry.action,
            details: entry.details,
            actor: entry.actor,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn recent_audit(&self, limit: usize) -> StoreResult<Vec<AuditEntry>> {
        let state = self.state.read().await;
        Ok(state.audit.iter().rev().take(limit).cloned().collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
