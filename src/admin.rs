// ---------------------------------------------------------------------------
// admin.rs: registry management, probing, audit and monitor endpoints.
// Every route here sits behind `auth::require_auth`.
// ---------------------------------------------------------------------------

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::future::join_all;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::handlers::{ApiError, ApiJson};
use crate::models::{
    with_key_param, AuditEntry, HealthStatus, NewServer, ServerUpdate, ServerView,
};
use crate::monitor::{CycleReport, MonitorError, ServerTestResult};
use crate::state::AppState;

pub const CLIENT_ENTRY_NAME: &str = "mcp-router";
const DEFAULT_AUDIT_LIMIT: usize = 20;
const MAX_AUDIT_LIMIT: usize = 100;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/servers", get(list_servers).post(add_server))
        .route(
            "/api/servers/{name}",
            get(get_server).patch(update_server).delete(remove_server),
        )
        .route("/api/servers/{name}/toggle", post(toggle_server))
        .route("/api/servers/{name}/test", post(test_server))
        .route("/api/test-all", post(test_all))
        .route("/api/audit", get(audit_log))
        .route("/api/config/client", get(client_config))
        .route("/api/refresh", post(refresh_tools))
        .route("/api/monitor", get(monitor_status))
        .route("/api/monitor/check", post(monitor_check))
        .route("/api/monitor/heal/{name}", post(monitor_heal))
}

// ── Query / body types ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub enabled_only: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClientConfigQuery {
    #[serde(default)]
    pub direct: bool,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ToggleRequest {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

// ── Registry CRUD ───────────────────────────────────────────────────────────

#[utoipa::path(get, path = "/api/servers", tag = "servers",
    params(("enabled_only" = Option<bool>, Query, description = "Only enabled servers")),
    responses((status = 200, description = "Registered tool servers", body = Value))
)]
pub async fn list_servers(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = state.registry.list(q.enabled_only).await?;
    let servers: Vec<ServerView> = records.iter().map(ServerView::from).collect();
    Ok(Json(json!({ "servers": servers, "total": servers.len() })))
}

#[utoipa::path(get, path = "/api/servers/{name}", tag = "servers",
    params(("name" = String, Path, description = "Server name")),
    responses(
        (status = 200, description = "Server", body = ServerView),
        (status = 404, description = "Unknown server")
    )
)]
pub async fn get_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServerView>, ApiError> {
    let record = state.registry.get(&name).await?;
    Ok(Json(ServerView::from(&record)))
}

#[utoipa::path(post, path = "/api/servers", tag = "servers",
    request_body = NewServer,
    responses(
        (status = 201, description = "Server registered", body = ServerView),
        (status = 400, description = "Invalid name, URL or backend"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn add_server(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewServer>,
) -> Result<(StatusCode, Json<ServerView>), ApiError> {
    let record = state.registry.add(req).await?;
    state.aggregator.invalidate();
    tracing::info!(server = %record.name, "admin: server registered");
    Ok((StatusCode::CREATED, Json(ServerView::from(&record))))
}

#[utoipa::path(patch, path = "/api/servers/{name}", tag = "servers",
    params(("name" = String, Path, description = "Server name")),
    request_body = ServerUpdate,
    responses(
        (status = 200, description = "Updated server", body = ServerView),
        (status = 400, description = "Empty or invalid update"),
        (status = 404, description = "Unknown server")
    )
)]
pub async fn update_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    ApiJson(update): ApiJson<ServerUpdate>,
) -> Result<Json<ServerView>, ApiError> {
    let record = state.registry.update(&name, update).await?;
    state.aggregator.invalidate();
    Ok(Json(ServerView::from(&record)))
}

#[utoipa::path(delete, path = "/api/servers/{name}", tag = "servers",
    params(("name" = String, Path, description = "Server name")),
    responses((status = 200, description = "Removal result (removed=false when absent)", body = Value))
)]
pub async fn remove_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let removed = state.registry.remove(&name).await?;
    if removed {
        state.aggregator.invalidate();
    }
    Ok(Json(json!({ "name": name, "removed": removed })))
}

/// Body is optional; `{}` or no body enables the server.
#[utoipa::path(post, path = "/api/servers/{name}/toggle", tag = "servers",
    params(("name" = String, Path, description = "Server name")),
    request_body(content = ToggleRequest, description = "Optional; defaults to enabled=true"),
    responses(
        (status = 200, description = "Updated server", body = ServerView),
        (status = 404, description = "Unknown server")
    )
)]
pub async fn toggle_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<ServerView>, ApiError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        ToggleRequest { enabled: true }
    } else {
        serde_json::from_slice::<ToggleRequest>(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid toggle body: {e}")))?
    };
    let record = state.registry.set_enabled(&name, req.enabled).await?;
    state.aggregator.invalidate();
    Ok(Json(ServerView::from(&record)))
}

// ── Probing ─────────────────────────────────────────────────────────────────

#[utoipa::path(post, path = "/api/servers/{name}/test", tag = "servers",
    params(("name" = String, Path, description = "Server name")),
    responses(
        (status = 200, description = "Probe result", body = ServerTestResult),
        (status = 404, description = "Unknown server")
    )
)]
pub async fn test_server(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServerTestResult>, ApiError> {
    let record = state.registry.get(&name).await?;
    Ok(Json(state.monitor.test_server(&record).await))
}

#[utoipa::path(post, path = "/api/test-all", tag = "servers",
    responses((status = 200, description = "Probe every enabled server", body = Value))
)]
pub async fn test_all(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let records = state.registry.list(true).await?;
    let results: Vec<ServerTestResult> =
        join_all(records.iter().map(|r| state.monitor.test_server(r))).await;
    let healthy = results
        .iter()
        .filter(|r| r.status == HealthStatus::Healthy)
        .count();
    Ok(Json(json!({
        "results": results,
        "healthy": healthy,
        "total": results.len(),
    })))
}

// ── Audit ───────────────────────────────────────────────────────────────────

#[utoipa::path(get, path = "/api/audit", tag = "audit",
    params(("limit" = Option<usize>, Query, description = "Max entries (default 20, max 100)")),
    responses((status = 200, description = "Newest audit entries first", body = Vec<AuditEntry>))
)]
pub async fn audit_log(
    State(state): State<AppState>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_AUDIT_LIMIT);
    Ok(Json(state.registry.audit_log(limit).await?))
}

// ── Client configuration ────────────────────────────────────────────────────

#[utoipa::path(get, path = "/api/config/client", tag = "config",
    params(("direct" = Option<bool>, Query, description = "Also list each enabled server directly")),
    responses((status = 200, description = "mcpServers block for MCP clients", body = Value))
)]
pub async fn client_config(
    State(state): State<AppState>,
    Query(q): Query<ClientConfigQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = state.registry.list(true).await?;

    let sse_url = format!("{}/sse", state.config.public_url.trim_end_matches('/'));
    let mut entries = Map::new();
    entries.insert(
        CLIENT_ENTRY_NAME.to_string(),
        json!({ "url": with_key_param(&sse_url, state.auth_secret.as_deref()) }),
    );
    if q.direct {
        for r in &records {
            entries.insert(
                r.name.clone(),
                json!({ "url": with_key_param(&r.url, r.auth_key.as_deref()) }),
            );
        }
    }

    let servers: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
    let instruction = if q.direct {
        "Add these entries to the mcpServers section of your MCP client config. \
         The mcp-router entry exposes every tool; the direct entries bypass the router."
    } else {
        "Add this entry to the mcpServers section of your MCP client config. \
         All registered tools are available as <server>:<tool>."
    };

    Ok(Json(json!({
        "mcpServers": entries,
        "servers": servers,
        "instruction": instruction,
    })))
}

// ── Tool index ──────────────────────────────────────────────────────────────

#[utoipa::path(post, path = "/api/refresh", tag = "tools",
    responses(
        (status = 200, description = "Rebuilt tool index", body = Value),
        (status = 503, description = "Registry unavailable")
    )
)]
pub async fn refresh_tools(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let index = state.aggregator.refresh().await?;
    let tools: Vec<&str> = index
        .tools()
        .iter()
        .map(|t| t.qualified_name.as_str())
        .collect();
    tracing::info!(tools = tools.len(), servers = index.server_count(), "admin: tool index refreshed");
    Ok(Json(json!({ "tools": tools, "count": tools.len() })))
}

// ── Monitor ─────────────────────────────────────────────────────────────────

#[utoipa::path(get, path = "/api/monitor", tag = "monitor",
    responses((status = 200, description = "Monitor settings and per-server state", body = Value))
)]
pub async fn monitor_status(State(state): State<AppState>) -> Json<Value> {
    let settings = state.monitor.settings();
    Json(json!({
        "enabled": state.config.monitor_enabled,
        "interval_seconds": settings.interval.as_secs(),
        "recovery_cooldown_seconds": settings.policy.recovery_cooldown.num_seconds(),
        "alert_debounce_seconds": settings.policy.alert_debounce.num_seconds(),
        "states": state.monitor.states().await,
    }))
}

#[utoipa::path(post, path = "/api/monitor/check", tag = "monitor",
    responses((status = 200, description = "Run one monitor cycle now", body = CycleReport))
)]
pub async fn monitor_check(State(state): State<AppState>) -> Json<CycleReport> {
    Json(state.monitor.run_cycle().await)
}

#[utoipa::path(post, path = "/api/monitor/heal/{name}", tag = "monitor",
    params(("name" = String, Path, description = "Server name")),
    responses(
        (status = 200, description = "Recovery hook ran", body = Value),
        (status = 400, description = "Server has no recovery hook"),
        (status = 404, description = "Unknown server"),
        (status = 502, description = "Recovery hook failed")
    )
)]
pub async fn monitor_heal(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, axum::response::Response> {
    use axum::response::IntoResponse;

    match state.monitor.heal(&name).await {
        Ok(result) => Ok(Json(json!({ "name": name, "success": true, "result": result }))),
        Err(MonitorError::Recovery(e)) => Err(ApiError::Upstream(e.to_string())
            .with_details(json!({ "name": name, "error": e.to_string() }))
            .into_response()),
        Err(e) => Err(ApiError::from(e).into_response()),
    }
}
