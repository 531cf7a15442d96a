//! Manifest aggregation: one qualified tool namespace over every enabled server.
//!
//! Manifests are pushed by the admin at registration time, so building the
//! index only reads the registry; nothing is fetched over the network.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::cache::TtlCache;
use crate::models::{ExecutionBackend, ToolServerRecord};
use crate::registry::{Registry, RegistryError};

/// Separator between server prefix and tool name. Server names cannot contain it.
pub const QUALIFIER: char = ':';

pub fn qualify(server: &str, tool: &str) -> String {
    format!("{server}{QUALIFIER}{tool}")
}

/// Routing data of the server that owns a tool, shared by all its tools.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOwner {
    pub server: String,
    pub url: String,
    pub auth_key: Option<String>,
    pub backend: ExecutionBackend,
    pub timeout_secs: Option<u32>,
}

impl From<&ToolServerRecord> for ToolOwner {
    fn from(r: &ToolServerRecord) -> Self {
        Self {
            server: r.name.clone(),
            url: r.url.clone(),
            auth_key: r.auth_key.clone(),
            backend: r.backend.clone(),
            timeout_secs: r.timeout_secs,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatedTool {
    pub qualified_name: String,
    /// Name as the owning server knows it.
    pub tool_name: String,
    pub description: String,
    pub input_schema: Value,
    pub owner: Arc<ToolOwner>,
}

#[derive(Debug, Default)]
pub struct ToolIndex {
    tools: Vec<AggregatedTool>,
    by_name: HashMap<String, usize>,
    server_count: usize,
}

impl ToolIndex {
    /// Build from records already in registry order. A repeated qualified name
    /// replaces the earlier entry but keeps its position.
    pub fn build(records: &[ToolServerRecord]) -> Self {
        let mut index = ToolIndex {
            server_count: records.len(),
            ..ToolIndex::default()
        };

        for record in records {
            let Some(manifest) = &record.tool_manifest else {
                continue;
            };
            let owner = Arc::new(ToolOwner::from(record));
            for tool in &manifest.tools {
                let entry = AggregatedTool {
                    qualified_name: qualify(&record.name, &tool.name),
                    tool_name: tool.name.clone(),
                    description: tool.description.clone(),
                    input_schema: tool.input_schema.clone(),
                    owner: Arc::clone(&owner),
                };
                match index.by_name.get(&entry.qualified_name) {
                    Some(&pos) => {
                        tracing::debug!(tool = %entry.qualified_name, "duplicate qualified name, replacing");
                        index.tools[pos] = entry;
                    }
                    None => {
                        index.by_name.insert(entry.qualified_name.clone(), index.tools.len());
                        index.tools.push(entry);
                    }
                }
            }
        }
        index
    }

    pub fn resolve(&self, qualified_name: &str) -> Option<&AggregatedTool> {
        self.by_name.get(qualified_name).map(|&pos| &self.tools[pos])
    }

    pub fn tools(&self) -> &[AggregatedTool] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Enabled servers that took part in this build, with or without tools.
    pub fn server_count(&self) -> usize {
        self.server_count
    }
}

#[derive(Debug, Clone, Error)]
pub enum AggregateError {
    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),
}

impl From<RegistryError> for AggregateError {
    fn from(err: RegistryError) -> Self {
        AggregateError::RegistryUnavailable(err.to_string())
    }
}

pub struct ManifestAggregator {
    registry: Registry,
    cache: TtlCache<ToolIndex>,
}

impl ManifestAggregator {
    pub fn new(registry: Registry, ttl: Duration) -> Self {
        Self {
            registry,
            cache: TtlCache::new("tool_index", ttl),
        }
    }

    async fn load(registry: &Registry) -> Result<ToolIndex, AggregateError> {
        let records = registry.list(true).await?;
        let index = ToolIndex::build(&records);
        tracing::debug!(tools = index.len(), servers = index.server_count(), "tool index rebuilt");
        Ok(index)
    }

    /// Current index. Fails only when the registry is down and nothing was ever
    /// loaded; otherwise a failed rebuild serves the previous index.
    pub async fn get_tools(&self, force: bool) -> Result<Arc<ToolIndex>, AggregateError> {
        let registry = &self.registry;
        self.cache.get(force, || Self::load(registry)).await
    }

    /// Strict rebuild for the admin refresh endpoint.
    pub async fn refresh(&self) -> Result<Arc<ToolIndex>, AggregateError> {
        let registry = &self.registry;
        let index = self.cache.refresh(|| Self::load(registry)).await?;
        tracing::info!(tools = index.len(), servers = index.server_count(), "tool index refreshed");
        Ok(index)
    }

    pub fn invalidate(&self) {
        self.cache.invalidate();
    }

    /// Index from the last successful build, without triggering a load.
    pub fn cached(&self) -> Option<Arc<ToolIndex>> {
        self.cache.peek()
    }

    pub fn cache_age(&self) -> Option<Duration> {
        self.cache.age()
    }
}
