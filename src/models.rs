use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

// ---------------------------------------------------------------------------
// Tool manifest (pushed by the admin at registration time)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_schema")]
    #[schema(value_type = Object)]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolManifest {
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

// ---------------------------------------------------------------------------
// Execution backends
// ---------------------------------------------------------------------------

/// How a `tools/call` for a server is executed. Persisted as tagged JSON;
/// every variant is plain data, nothing stored here is ever evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionBackend {
    /// `POST <base>/call` with `{tool, arguments}`. `base` falls back to the record URL.
    StaticForward {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        base_url: Option<String>,
    },
    /// Fixed endpoint receiving `{tool, params}`.
    Webhook {
        url: String,
        #[serde(default = "default_post")]
        method: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// URL template with `{arg}` placeholders; leftover scalar args become query params.
    Http {
        url_template: String,
        #[serde(default = "default_get")]
        method: String,
    },
}

impl Default for ExecutionBackend {
    fn default() -> Self {
        Self::StaticForward { base_url: None }
    }
}

fn default_post() -> String {
    "POST".to_string()
}

fn default_get() -> String {
    "GET".to_string()
}

// ---------------------------------------------------------------------------
// Recovery hooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryHook {
    /// Restart every Fly.io machine of `app` through the Machines API.
    FlyRestart { app: String },
    /// Hit an arbitrary restart endpoint with `{server, reason}`.
    Webhook {
        url: String,
        #[serde(default = "default_post")]
        method: String,
    },
}

// ---------------------------------------------------------------------------
// Health status (registry view)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unreachable,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Unknown => "unknown",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(HealthStatus::Unknown),
            "healthy" => Ok(HealthStatus::Healthy),
            "degraded" => Ok(HealthStatus::Degraded),
            "unreachable" => Ok(HealthStatus::Unreachable),
            other => Err(format!("unknown health status '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool server record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ToolServerRecord {
    pub name: String,
    pub description: String,
    pub url: String,
    pub auth_key: Option<String>,
    pub enabled: bool,
    pub priority: i32,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub tool_manifest: Option<ToolManifest>,
    pub backend: ExecutionBackend,
    pub health_path: Option<String>,
    pub accepted_statuses: Vec<u16>,
    pub recovery: Option<RecoveryHook>,
    pub timeout_secs: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ToolServerRecord {
    /// Build a fresh record from an add request. Server-generated fields get
    /// their defaults here.
    pub fn from_new(req: NewServer, now: DateTime<Utc>) -> Self {
        Self {
            name: req.name,
            description: req.description.unwrap_or_default(),
            url: req.url,
            auth_key: req.auth_key.filter(|k| !k.is_empty()),
            enabled: req.enabled.unwrap_or(true),
            priority: req.priority.unwrap_or(DEFAULT_PRIORITY),
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            tool_manifest: req.tool_manifest,
            backend: req.backend.unwrap_or_default(),
            health_path: req.health_path,
            accepted_statuses: req.accepted_statuses.unwrap_or_default(),
            recovery: req.recovery,
            timeout_secs: req.timeout_secs,
            created_at: now,
            updated_at: now,
        }
    }

    /// URL probed by health checks: `url + health_path`, or the bare URL when no
    /// path is configured. The auth key travels as `?key=`.
    pub fn probe_url(&self) -> String {
        let base = match &self.health_path {
            Some(path) => join_url(&self.url, path),
            None => self.url.clone(),
        };
        with_key_param(&base, self.auth_key.as_deref())
    }

    pub fn tool_count(&self) -> usize {
        self.tool_manifest.as_ref().map_or(0, |m| m.tools.len())
    }
}

pub const DEFAULT_PRIORITY: i32 = 100;

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Append `key=<key>` to a URL, respecting an existing query string.
pub fn with_key_param(base: &str, key: Option<&str>) -> String {
    match key {
        Some(k) if !k.is_empty() => match url::Url::parse(base) {
            Ok(mut parsed) => {
                parsed.query_pairs_mut().append_pair("key", k);
                parsed.to_string()
            }
            Err(_) => {
                let sep = if base.contains('?') { '&' } else { '?' };
                format!("{base}{sep}key={k}")
            }
        },
        _ => base.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Admin requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewServer {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub auth_key: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub tool_manifest: Option<ToolManifest>,
    #[serde(default)]
    pub backend: Option<ExecutionBackend>,
    #[serde(default)]
    pub health_path: Option<String>,
    #[serde(default)]
    pub accepted_statuses: Option<Vec<u16>>,
    #[serde(default)]
    pub recovery: Option<RecoveryHook>,
    #[serde(default)]
    pub timeout_secs: Option<u32>,
}

/// Partial update. Only supplied fields are written; an empty `auth_key`
/// clears the stored key, and an explicit `null` clears `recovery` or
/// `timeout_secs`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ServerUpdate {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub auth_key: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub tool_manifest: Option<ToolManifest>,
    #[serde(default)]
    pub backend: Option<ExecutionBackend>,
    #[serde(default)]
    pub health_path: Option<String>,
    #[serde(default)]
    pub accepted_statuses: Option<Vec<u16>>,
    #[serde(default, deserialize_with = "present")]
    #[schema(value_type = Option<RecoveryHook>)]
    pub recovery: Option<Option<RecoveryHook>>,
    #[serde(default, deserialize_with = "present")]
    #[schema(value_type = Option<u32>)]
    pub timeout_secs: Option<Option<u32>>,
}

// Absent field -> None (serde default); `null` -> Some(None); value -> Some(Some(v)).
fn present<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ServerUpdate {
    pub fn enabled_only(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.url.is_none()
            && self.auth_key.is_none()
            && self.enabled.is_none()
            && self.priority.is_none()
            && self.tool_manifest.is_none()
            && self.backend.is_none()
            && self.health_path.is_none()
            && self.accepted_statuses.is_none()
            && self.recovery.is_none()
            && self.timeout_secs.is_none()
    }

    /// Names of the supplied fields, for audit details.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.description.is_some() {
            names.push("description");
        }
        if self.url.is_some() {
            names.push("url");
        }
        if self.auth_key.is_some() {
            names.push("auth_key");
        }
        if self.enabled.is_some() {
            names.push("enabled");
        }
        if self.priority.is_some() {
            names.push("priority");
        }
        if self.tool_manifest.is_some() {
            names.push("tool_manifest");
        }
        if self.backend.is_some() {
            names.push("backend");
        }
        if self.health_path.is_some() {
            names.push("health_path");
        }
        if self.accepted_statuses.is_some() {
            names.push("accepted_statuses");
        }
        if self.recovery.is_some() {
            names.push("recovery");
        }
        if self.timeout_secs.is_some() {
            names.push("timeout_secs");
        }
        names
    }

    /// Overwrite the supplied fields on `record`. Shared by every store adapter
    /// so merge semantics are identical regardless of persistence.
    pub fn apply_to(&self, record: &mut ToolServerRecord, now: DateTime<Utc>) {
        if let Some(description) = &self.description {
            record.description = description.clone();
        }
        if let Some(url) = &self.url {
            record.url = url.clone();
        }
        if let Some(key) = &self.auth_key {
            record.auth_key = if key.is_empty() { None } else { Some(key.clone()) };
        }
        if let Some(enabled) = self.enabled {
            record.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            record.priority = priority;
        }
        if let Some(manifest) = &self.tool_manifest {
            record.tool_manifest = Some(manifest.clone());
        }
        if let Some(backend) = &self.backend {
            record.backend = backend.clone();
        }
        if let Some(path) = &self.health_path {
            record.health_path = if path.is_empty() { None } else { Some(path.clone()) };
        }
        if let Some(statuses) = &self.accepted_statuses {
            record.accepted_statuses = statuses.clone();
        }
        if let Some(recovery) = &self.recovery {
            record.recovery = recovery.clone();
        }
        if let Some(timeout) = self.timeout_secs {
            record.timeout_secs = timeout;
        }
        record.updated_at = now;
    }
}

/// Admin-facing view of a record. The auth key never leaves the process.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServerView {
    pub name: String,
    pub description: String,
    pub url: String,
    pub has_auth_key: bool,
    pub enabled: bool,
    pub priority: i32,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub tool_count: usize,
    pub tool_manifest: Option<ToolManifest>,
    pub backend: ExecutionBackend,
    pub health_path: Option<String>,
    pub accepted_statuses: Vec<u16>,
    pub recovery: Option<RecoveryHook>,
    pub timeout_secs: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ToolServerRecord> for ServerView {
    fn from(r: &ToolServerRecord) -> Self {
        Self {
            name: r.name.clone(),
            description: r.description.clone(),
            url: r.url.clone(),
            has_auth_key: r.auth_key.is_some(),
            enabled: r.enabled,
            priority: r.priority,
            health_status: r.health_status,
            last_health_check: r.last_health_check,
            tool_count: r.tool_count(),
            tool_manifest: r.tool_manifest.clone(),
            backend: r.backend.clone(),
            health_path: r.health_path.clone(),
            accepted_statuses: r.accepted_statuses.clone(),
            recovery: r.recovery.clone(),
            timeout_secs: r.timeout_secs,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    #[schema(value_type = Object)]
    pub details: Value,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: String,
    pub details: Value,
    pub actor: String,
}

// ---------------------------------------------------------------------------
// Health endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub app: String,
    pub uptime_seconds: u64,
}
