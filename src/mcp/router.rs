//! Request router: resolves qualified tool names and forwards calls to their owner.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use super::forward::{self, ForwardError};
use super::protocol::{self, JsonRpcError};
use crate::aggregator::{AggregateError, ManifestAggregator};
use crate::audit;
use crate::registry::Registry;

pub const SERVER_NAME: &str = "mcp-router";

#[derive(Debug, Error)]
pub enum ToolCallError {
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl ToolCallError {
    pub fn kind(&self) -> &'static str {
        match self {
            ToolCallError::ToolNotFound(_) => "tool_not_found",
            ToolCallError::Aggregate(AggregateError::RegistryUnavailable(_)) => "registry_unavailable",
            ToolCallError::Forward(ForwardError::Upstream { .. }) => "upstream_error",
            ToolCallError::Forward(ForwardError::Unreachable(_)) => "upstream_unreachable",
            ToolCallError::Forward(ForwardError::Timeout(_)) => "upstream_timeout",
            ToolCallError::Forward(ForwardError::InvalidRequest(_)) => "invalid_request",
        }
    }

    pub fn to_rpc(&self) -> JsonRpcError {
        let code = match self {
            ToolCallError::ToolNotFound(_) => protocol::TOOL_NOT_FOUND,
            ToolCallError::Aggregate(_) => protocol::REGISTRY_UNAVAILABLE,
            ToolCallError::Forward(ForwardError::Upstream { .. }) => protocol::UPSTREAM_ERROR,
            ToolCallError::Forward(ForwardError::Unreachable(_)) => protocol::UPSTREAM_UNREACHABLE,
            ToolCallError::Forward(ForwardError::Timeout(_)) => protocol::UPSTREAM_TIMEOUT,
            ToolCallError::Forward(ForwardError::InvalidRequest(_)) => protocol::INVALID_PARAMS,
        };
        let err = JsonRpcError::new(code, self.to_string(), self.kind());
        match self {
            ToolCallError::Forward(ForwardError::Upstream { status, .. }) => {
                err.with_data(json!({ "status": status }))
            }
            _ => err,
        }
    }
}

pub struct ToolRouter {
    aggregator: Arc<ManifestAggregator>,
    registry: Registry,
    client: Client,
    default_timeout: Duration,
}

impl ToolRouter {
    pub fn new(
        aggregator: Arc<ManifestAggregator>,
        registry: Registry,
        client: Client,
        default_timeout: Duration,
    ) -> Self {
        Self {
            aggregator,
            registry,
            client,
            default_timeout,
        }
    }

    pub fn initialize(&self, client_info: Option<&Value>) -> Value {
        if let Some(info) = client_info {
            let client = info.get("name").and_then(Value::as_str).unwrap_or("unknown");
            let version = info.get("version").and_then(Value::as_str).unwrap_or("?");
            tracing::info!(client, version, "mcp: client initialized");
        }
        json!({
            "protocolVersion": protocol::PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": true }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    pub async fn list_tools(&self) -> Result<Value, ToolCallError> {
        let index = self.aggregator.get_tools(false).await?;
        let tools: Vec<Value> = index
            .tools()
            .iter()
            .map(|t| {
                json!({
                    "name": t.qualified_name,
                    "description": format!("[{}] {}", t.owner.server, t.description),
                    "inputSchema": t.input_schema,
                })
            })
            .collect();
        Ok(json!({ "tools": tools }))
    }

    /// Timeout precedence: caller override, then the server's own, then the default.
    pub fn effective_timeout(&self, server_timeout: Option<u32>, caller: Option<Duration>) -> Duration {
        caller
            .or_else(|| server_timeout.map(|s| Duration::from_secs(u64::from(s))))
            .unwrap_or(self.default_timeout)
    }

    pub async fn call_tool(
        &self,
        qualified_name: &str,
        arguments: &Value,
        timeout_override: Option<Duration>,
    ) -> Result<Value, ToolCallError> {
        let index = self.aggregator.get_tools(false).await?;
        let tool = index
            .resolve(qualified_name)
            .ok_or_else(|| ToolCallError::ToolNotFound(qualified_name.to_string()))?;

        let owner = &tool.owner;
        let timeout = self.effective_timeout(owner.timeout_secs, timeout_override);
        tracing::info!(tool = %qualified_name, server = %owner.server, timeout_ms = timeout.as_millis() as u64, "mcp: tools/call");

        let started = std::time::Instant::now();
        match forward::execute(&self.client, owner, &tool.tool_name, arguments, timeout).await {
            Ok(result) => {
                tracing::debug!(tool = %qualified_name, elapsed_ms = started.elapsed().as_millis() as u64, "mcp: call ok");
                let text = serde_json::to_string_pretty(&result).unwrap_or_else(|_| result.to_string());
                Ok(json!({
                    "content": [{ "type": "text", "text": text }]
                }))
            }
            Err(e) => {
                let err = ToolCallError::from(e);
                tracing::warn!(tool = %qualified_name, server = %owner.server, kind = err.kind(), "mcp: call failed: {}", err);
                audit::record(
                    self.registry.store(),
                    "tool_call_failed",
                    json!({
                        "tool": qualified_name,
                        "server": owner.server,
                        "kind": err.kind(),
                        "error": err.to_string(),
                    }),
                    audit::ACTOR_ROUTER,
                )
                .await;
                Err(err)
            }
        }
    }
}
