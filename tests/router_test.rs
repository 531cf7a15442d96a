// End-to-end MCP routing through `create_router`: tool listing, forwarding,
// downstream error mapping and index staleness.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use mcp_router::config::RouterConfig;
use mcp_router::models::{
    AuditEntry, ExecutionBackend, HealthStatus, NewAuditEntry, ServerUpdate, ToolServerRecord,
};
use mcp_router::registry::{MemoryRegistryStore, RegistryStore, StoreError, StoreResult};

async fn mcp(app: &axum::Router, body: Value) -> Value {
    let response = app
        .clone()
        .oneshot(json_req("POST", "/mcp", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

async fn add(app: &axum::Router, server: Value) {
    let response = app
        .clone()
        .oneshot(json_req("POST", "/api/servers", server))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

fn server_json(name: &str, url: &str, tools: &[&str]) -> Value {
    json!({
        "name": name,
        "url": url,
        "tool_manifest": { "tools": tools.iter().map(|t| json!({ "name": t, "description": format!("{t} tool") })).collect::<Vec<_>>() },
    })
}

// ═══════════════════════════════════════════════════════════════════════════
//  initialize / tools/list
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn initialize_reports_router_identity() {
    let app = mcp_router::create_router(memory_state());
    let resp = mcp(&app, rpc(1, "initialize", json!({ "clientInfo": { "name": "test" } }))).await;
    assert_eq!(resp["id"], 1);
    assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");
    assert_eq!(resp["result"]["serverInfo"]["name"], "mcp-router");
}

#[tokio::test]
async fn tools_list_qualifies_names_in_priority_order() {
    let (url, _ds) = spawn_downstream().await;
    let app = mcp_router::create_router(memory_state());

    let mut second = server_json("beta", &url, &["search"]);
    second["priority"] = json!(10);
    add(&app, server_json("alpha", &url, &["read", "write"])).await;
    add(&app, second).await;

    let resp = mcp(&app, rpc(2, "tools/list", json!({}))).await;
    let names: Vec<&str> = resp["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["beta:search", "alpha:read", "alpha:write"]);
    assert_eq!(resp["result"]["tools"][0]["description"], "[beta] search tool");
    assert_eq!(resp["result"]["tools"][0]["inputSchema"]["type"], "object");
}

#[tokio::test]
async fn disabled_servers_are_not_listed() {
    let (url, _ds) = spawn_downstream().await;
    let app = mcp_router::create_router(memory_state());
    let mut off = server_json("off", &url, &["hidden"]);
    off["enabled"] = json!(false);
    add(&app, off).await;
    add(&app, server_json("on", &url, &["shown"])).await;

    let resp = mcp(&app, rpc(1, "tools/list", json!({}))).await;
    let tools = resp["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0]["name"], "on:shown");
}

// ═══════════════════════════════════════════════════════════════════════════
//  tools/call forwarding
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn call_forwards_to_owner_with_bearer_key() {
    let (url, ds) = spawn_downstream().await;
    let app = mcp_router::create_router(memory_state());
    let mut server = server_json("files", &url, &["read"]);
    server["auth_key"] = json!("downstream-secret");
    add(&app, server).await;

    let resp = mcp(
        &app,
        rpc(3, "tools/call", json!({ "name": "files:read", "arguments": { "path": "/tmp/a" } })),
    )
    .await;

    assert_eq!(resp["id"], 3);
    let content = &resp["result"]["content"][0];
    assert_eq!(content["type"], "text");
    let echoed: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
    assert_eq!(echoed["tool"], "read");
    assert_eq!(echoed["echo"]["path"], "/tmp/a");
    assert_eq!(
        ds.seen_auth.lock().unwrap().as_slice(),
        ["Bearer downstream-secret".to_string()]
    );
}

#[tokio::test]
async fn unknown_tool_is_tool_not_found() {
    let app = mcp_router::create_router(memory_state());
    let resp = mcp(&app, rpc(4, "tools/call", json!({ "name": "nope:tool" }))).await;
    assert_eq!(resp["error"]["code"], -32001);
    assert_eq!(resp["error"]["data"]["kind"], "tool_not_found");
}

#[tokio::test]
async fn missing_tool_name_is_invalid_params() {
    let app = mcp_router::create_router(memory_state());
    let resp = mcp(&app, rpc(5, "tools/call", json!({ "arguments": {} }))).await;
    assert_eq!(resp["error"]["code"], -32602);
}

#[tokio::test]
async fn downstream_error_status_is_upstream_error_and_audited() {
    let (url, _ds) = spawn_downstream().await;
    let state = memory_state();
    let registry = state.registry.clone();
    let app = mcp_router::create_router(state);
    add(&app, server_json("svc", &url, &["fail"])).await;

    let resp = mcp(&app, rpc(6, "tools/call", json!({ "name": "svc:fail" }))).await;
    assert_eq!(resp["error"]["code"], -32002);
    assert_eq!(resp["error"]["data"]["status"], 500);
    assert!(resp["error"]["message"].as_str().unwrap().contains("boom"));

    let audit = registry.audit_log(1).await.unwrap();
    assert_eq!(audit[0].action, "tool_call_failed");
    assert_eq!(audit[0].actor, "router");
    assert_eq!(audit[0].details["tool"], "svc:fail");
}

#[tokio::test]
async fn unreachable_server_is_upstream_unreachable() {
    let url = dead_url().await;
    let app = mcp_router::create_router(memory_state());
    add(&app, server_json("gone", &url, &["ping"])).await;

    let resp = mcp(&app, rpc(7, "tools/call", json!({ "name": "gone:ping" }))).await;
    assert_eq!(resp["error"]["code"], -32003);
    assert_eq!(resp["error"]["data"]["kind"], "upstream_unreachable");
}

#[tokio::test]
async fn caller_timeout_override_is_upstream_timeout() {
    let (url, _ds) = spawn_downstream().await;
    let app = mcp_router::create_router(memory_state());
    add(&app, server_json("svc", &url, &["slow"])).await;

    let resp = mcp(
        &app,
        rpc(8, "tools/call", json!({ "name": "svc:slow", "_meta": { "timeoutMs": 200 } })),
    )
    .await;
    assert_eq!(resp["error"]["code"], -32004);
}

#[tokio::test]
async fn webhook_backend_receives_params() {
    let (url, _ds) = spawn_downstream().await;
    let app = mcp_router::create_router(memory_state());
    let mut server = server_json("hook", "http://unused.invalid", &["echo"]);
    server["backend"] = json!({ "kind": "webhook", "url": format!("{url}/call") });
    add(&app, server).await;

    let resp = mcp(
        &app,
        rpc(9, "tools/call", json!({ "name": "hook:echo", "arguments": { "q": 1 } })),
    )
    .await;
    let echoed: Value =
        serde_json::from_str(resp["result"]["content"][0]["text"].as_str().unwrap()).unwrap();
    assert_eq!(echoed["tool"], "echo");
    assert_eq!(echoed["params"]["q"], 1);
    assert!(echoed["echo"].is_null());
}

// ═══════════════════════════════════════════════════════════════════════════
//  Batches and notifications
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn notification_only_post_is_accepted() {
    let app = mcp_router::create_router(memory_state());
    let response = app
        .oneshot(json_req(
            "POST",
            "/mcp",
            json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn batch_answers_requests_only() {
    let app = mcp_router::create_router(memory_state());
    let resp = mcp(
        &app,
        json!([
            rpc(1, "ping", json!({})),
            { "jsonrpc": "2.0", "method": "notifications/initialized" },
            rpc(2, "unknown/method", json!({})),
        ]),
    )
    .await;
    let items = resp.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["id"], 1);
    assert_eq!(items[1]["error"]["code"], -32601);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Staleness
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn disabling_through_admin_api_takes_effect_immediately() {
    let (url, _ds) = spawn_downstream().await;
    let app = mcp_router::create_router(memory_state());
    add(&app, server_json("svc", &url, &["echo"])).await;

    let ok = mcp(&app, rpc(1, "tools/call", json!({ "name": "svc:echo" }))).await;
    assert!(ok.get("result").is_some());

    let toggled = app
        .clone()
        .oneshot(json_req("POST", "/api/servers/svc/toggle", json!({ "enabled": false })))
        .await
        .unwrap();
    assert_eq!(toggled.status(), StatusCode::OK);

    let resp = mcp(&app, rpc(2, "tools/call", json!({ "name": "svc:echo" }))).await;
    assert_eq!(resp["error"]["code"], -32001);
}

#[tokio::test]
async fn out_of_process_changes_wait_for_ttl() {
    let (url, _ds) = spawn_downstream().await;
    let store = Arc::new(MemoryRegistryStore::new());
    let config = RouterConfig {
        cache_ttl: Duration::from_millis(300),
        ..test_config()
    };
    let app = mcp_router::create_router(state_with(config, store.clone()));
    add(&app, server_json("svc", &url, &["echo"])).await;

    let first = mcp(&app, rpc(1, "tools/call", json!({ "name": "svc:echo" }))).await;
    assert!(first.get("result").is_some());

    // Another router sharing the store disables the server.
    store
        .update("svc", &ServerUpdate::enabled_only(false), Utc::now())
        .await
        .unwrap();

    let stale = mcp(&app, rpc(2, "tools/call", json!({ "name": "svc:echo" }))).await;
    assert!(stale.get("result").is_some(), "index is served until the TTL lapses");

    tokio::time::sleep(Duration::from_millis(400)).await;
    let fresh = mcp(&app, rpc(3, "tools/call", json!({ "name": "svc:echo" }))).await;
    assert_eq!(fresh["error"]["code"], -32001);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Registry failures
// ═══════════════════════════════════════════════════════════════════════════

/// A store whose every operation fails.
struct DownStore;

fn down() -> StoreError {
    StoreError::backend(std::io::Error::other("connection refused"))
}

#[async_trait]
impl RegistryStore for DownStore {
    async fn list(&self, _enabled_only: bool) -> StoreResult<Vec<ToolServerRecord>> {
        Err(down())
    }
    async fn get(&self, _name: &str) -> StoreResult<Option<ToolServerRecord>> {
        Err(down())
    }
    async fn insert(&self, _record: &ToolServerRecord) -> StoreResult<bool> {
        Err(down())
    }
    async fn update(
        &self,
        _name: &str,
        _update: &ServerUpdate,
        _now: DateTime<Utc>,
    ) -> StoreResult<Option<ToolServerRecord>> {
        Err(down())
    }
    async fn delete(&self, _name: &str) -> StoreResult<bool> {
        Err(down())
    }
    async fn record_health(
        &self,
        _name: &str,
        _status: HealthStatus,
        _at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Err(down())
    }
    async fn append_audit(&self, _entry: NewAuditEntry) -> StoreResult<()> {
        Err(down())
    }
    async fn recent_audit(&self, _limit: usize) -> StoreResult<Vec<AuditEntry>> {
        Err(down())
    }
    async fn ping(&self) -> StoreResult<()> {
        Err(down())
    }
}

#[tokio::test]
async fn cold_registry_failure_is_registry_unavailable() {
    let app = mcp_router::create_router(state_with(test_config(), Arc::new(DownStore)));

    let resp = mcp(&app, rpc(1, "tools/list", json!({}))).await;
    assert_eq!(resp["error"]["code"], -32005);
    assert_eq!(resp["error"]["data"]["kind"], "registry_unavailable");

    let admin = app.oneshot(get_req("/api/servers")).await.unwrap();
    assert_eq!(admin.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn static_forward_base_url_overrides_record_url() {
    let (url, _ds) = spawn_downstream().await;
    let store = Arc::new(MemoryRegistryStore::new());
    let mut record = ToolServerRecord::from_new(
        new_server("svc", "http://unused.invalid", &["echo"]),
        Utc::now(),
    );
    record.backend = ExecutionBackend::StaticForward {
        base_url: Some(format!("{url}/sse")),
    };
    store.insert(&record).await.unwrap();
    let app = mcp_router::create_router(state_with(test_config(), store));

    let resp = mcp(&app, rpc(1, "tools/call", json!({ "name": "svc:echo" }))).await;
    assert!(resp.get("result").is_some(), "got {resp}");
}
