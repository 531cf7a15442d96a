// ---------------------------------------------------------------------------
// handlers/system.rs: liveness, health, readiness and status endpoints
// ---------------------------------------------------------------------------

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::models::{HealthResponse, HealthStatus};
use crate::state::AppState;

use super::ApiError;

const APP_NAME: &str = "mcp-router";

/// GET /health: public liveness summary for load balancers and humans.
/// Reports the cached tool count without forcing an index build.
#[utoipa::path(get, path = "/health", tag = "health",
    responses((status = 200, description = "Router liveness with tool and server counts", body = Value))
)]
pub async fn liveness(State(state): State<AppState>) -> Json<Value> {
    let tools = state.aggregator.cached().map(|idx| idx.len()).unwrap_or(0);
    match state.registry.list(true).await {
        Ok(servers) => Json(json!({
            "status": "ok",
            "tools": tools,
            "servers": servers.len(),
        })),
        Err(e) => {
            tracing::warn!("health: registry unavailable: {}", e);
            Json(json!({
                "status": "degraded",
                "tools": tools,
                "servers": null,
            }))
        }
    }
}

#[utoipa::path(get, path = "/api/health", tag = "health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: if state.is_ready() { "ok" } else { "starting" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        app: APP_NAME.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// GET /api/health/ready: lightweight readiness probe (no registry round-trip).
#[utoipa::path(get, path = "/api/health/ready", tag = "health",
    responses(
        (status = 200, description = "Service ready", body = Value),
        (status = 503, description = "Service not ready", body = Value)
    )
)]
pub async fn readiness(State(state): State<AppState>) -> axum::response::Response {
    let ready = state.is_ready();
    let uptime = state.start_time.elapsed().as_secs();
    let body = json!({ "ready": ready, "uptime_seconds": uptime });

    if ready {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

/// GET /api/status: registry and cache overview for operators.
#[utoipa::path(get, path = "/api/status", tag = "health",
    responses(
        (status = 200, description = "Registry, cache and recent audit overview", body = Value),
        (status = 503, description = "Registry unavailable", body = Value)
    )
)]
pub async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let servers = state.registry.list(false).await?;
    let recent = state.registry.audit_log(5).await?;

    let enabled = servers.iter().filter(|s| s.enabled).count();
    let healthy = servers
        .iter()
        .filter(|s| s.enabled && s.health_status == HealthStatus::Healthy)
        .count();
    let cached = state.aggregator.cached();

    Ok(Json(json!({
        "total_servers": servers.len(),
        "enabled_servers": enabled,
        "healthy_servers": healthy,
        "cached_tools": cached.as_ref().map(|idx| idx.len()).unwrap_or(0),
        "cache_age_seconds": state.aggregator.cache_age().map(|d| d.as_secs()),
        "sessions": state.sessions.len(),
        "recent_actions": recent,
    })))
}
