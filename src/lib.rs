pub mod admin;
pub mod aggregator;
pub mod audit;
pub mod auth;
pub mod cache;
pub mod config;
pub mod handlers;
pub mod logs;
pub mod mcp;
pub mod models;
pub mod monitor;
pub mod registry;
pub mod state;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "mcp-router",
        description = "MCP tool registry, aggregator and router with health monitoring"
    ),
    paths(
        handlers::liveness,
        handlers::health,
        handlers::readiness,
        handlers::status,
        admin::list_servers,
        admin::get_server,
        admin::add_server,
        admin::update_server,
        admin::remove_server,
        admin::toggle_server,
        admin::test_server,
        admin::test_all,
        admin::audit_log,
        admin::client_config,
        admin::refresh_tools,
        admin::monitor_status,
        admin::monitor_check,
        admin::monitor_heal,
        logs::backend_logs,
        logs::clear_backend_logs,
    ),
    components(schemas(
        models::ToolDefinition,
        models::ToolManifest,
        models::ExecutionBackend,
        models::RecoveryHook,
        models::HealthStatus,
        models::NewServer,
        models::ServerUpdate,
        models::ServerView,
        models::AuditEntry,
        models::HealthResponse,
        admin::ToggleRequest,
        monitor::ServerTestResult,
        monitor::CycleReport,
        monitor::ServerCheck,
        monitor::CycleSummary,
        monitor::HealthState,
        monitor::ServerStatus,
    )),
    tags(
        (name = "health", description = "Liveness, readiness and status"),
        (name = "servers", description = "Tool server registry"),
        (name = "audit", description = "Registry audit log"),
        (name = "config", description = "MCP client configuration"),
        (name = "tools", description = "Aggregated tool index"),
        (name = "monitor", description = "Health monitor and recovery"),
        (name = "logs", description = "Backend log buffer"),
    )
)]
pub struct ApiDoc;

/// Build the application router with the given state.
/// Extracted from `main()` so integration tests can construct the app
/// without binding to a network port.
pub fn create_router(state: AppState) -> Router {
    // No auth: probes, and /message where the session id is the credential.
    let public = Router::new()
        .route("/health", get(handlers::liveness))
        .route("/api/health", get(handlers::health))
        .route("/api/health/ready", get(handlers::readiness))
        .route("/message", post(mcp::transport::message_handler));

    let protected = Router::new()
        // MCP transports
        .route("/sse", get(mcp::transport::sse_handler))
        .route("/mcp", post(mcp::server::mcp_handler))
        // Operator endpoints
        .route("/api/status", get(handlers::status))
        .route(
            "/api/logs",
            get(logs::backend_logs).delete(logs::clear_backend_logs),
        )
        .merge(admin::admin_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
