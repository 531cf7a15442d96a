//! JSON-RPC 2.0 dispatch for the aggregated MCP endpoint.
//!
//! Supported methods:
//! - `initialize`: server info + capabilities
//! - `notifications/*`: client acks (no response)
//! - `tools/list`: every tool of every enabled server, qualified as `server:tool`
//! - `tools/call`: route to the owning server
//! - `ping`
//!
//! Batches (JSON arrays) are handled element by element.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use super::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use super::router::ToolRouter;
use crate::state::AppState;

/// Dispatch a raw request body. `None` means nothing to answer (only
/// notifications were received).
pub async fn dispatch(router: &ToolRouter, payload: &[u8]) -> Option<Value> {
    let parsed: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("mcp: unparseable request: {}", e);
            return Some(to_value(JsonRpcResponse::error(Value::Null, JsonRpcError::parse_error(e))));
        }
    };

    match parsed {
        Value::Array(items) if items.is_empty() => Some(to_value(JsonRpcResponse::error(
            Value::Null,
            JsonRpcError::invalid_request("Empty batch"),
        ))),
        Value::Array(items) => {
            let mut responses = Vec::with_capacity(items.len());
            for item in items {
                if let Some(resp) = handle_message(router, item).await {
                    responses.push(to_value(resp));
                }
            }
            (!responses.is_empty()).then_some(Value::Array(responses))
        }
        other => handle_message(router, other).await.map(to_value),
    }
}

fn to_value(resp: JsonRpcResponse) -> Value {
    serde_json::to_value(&resp).unwrap_or_else(|e| {
        json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": resp.id,
            "error": { "code": super::protocol::INTERNAL_ERROR, "message": e.to_string(), "data": { "kind": "internal" } }
        })
    })
}

async fn handle_message(router: &ToolRouter, message: Value) -> Option<JsonRpcResponse> {
    if !message.is_object() {
        return Some(JsonRpcResponse::error(
            Value::Null,
            JsonRpcError::invalid_request("Request must be a JSON object"),
        ));
    }

    let raw_id = message.get("id").cloned();
    let request: JsonRpcRequest = match serde_json::from_value(message) {
        Ok(r) => r,
        Err(e) => {
            return Some(JsonRpcResponse::error(
                raw_id.unwrap_or(Value::Null),
                JsonRpcError::invalid_request(format!("Invalid request: {e}")),
            ));
        }
    };

    if request.jsonrpc.as_deref().is_some_and(|v| v != JSONRPC_VERSION) {
        return Some(JsonRpcResponse::error(
            request.id.unwrap_or(Value::Null),
            JsonRpcError::invalid_request("Unsupported jsonrpc version"),
        ));
    }

    tracing::debug!(method = %request.method, "mcp: incoming request");
    let outcome = handle_request(router, &request).await;

    match request.id {
        None => {
            if let Err(e) = outcome {
                tracing::debug!(method = %request.method, "mcp: notification failed: {}", e.message);
            }
            None
        }
        Some(id) => Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(id, error),
        }),
    }
}

async fn handle_request(router: &ToolRouter, request: &JsonRpcRequest) -> Result<Value, JsonRpcError> {
    match request.method.as_str() {
        "initialize" => Ok(router.initialize(request.param("clientInfo"))),
        "ping" => Ok(json!({})),
        "tools/list" => router.list_tools().await.map_err(|e| e.to_rpc()),
        "tools/call" => {
            let name = request
                .param("name")
                .and_then(Value::as_str)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| JsonRpcError::invalid_params("Missing 'name' in params"))?;
            let arguments = request.param("arguments").cloned().unwrap_or_else(|| json!({}));
            let timeout = request
                .param("_meta")
                .and_then(|m| m.get("timeoutMs"))
                .and_then(Value::as_u64)
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis);
            router
                .call_tool(name, &arguments, timeout)
                .await
                .map_err(|e| e.to_rpc())
        }
        m if m.starts_with("notifications/") => Ok(json!({})),
        other => Err(JsonRpcError::method_not_found(other)),
    }
}

/// Render a dispatch outcome: 200 with the JSON-RPC body, or 202 when only
/// notifications were received.
pub fn into_http(outcome: Option<Value>) -> Response {
    match outcome {
        Some(body) => (StatusCode::OK, Json(body)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// POST /mcp: single-endpoint variant (no SSE session).
pub async fn mcp_handler(State(state): State<AppState>, body: Bytes) -> Response {
    into_http(dispatch(&state.router, &body).await)
}
