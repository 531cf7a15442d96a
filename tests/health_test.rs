// Public health endpoints and the auth boundary around everything else.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use common::*;
use mcp_router::config::RouterConfig;

fn secured_app() -> axum::Router {
    let config = RouterConfig {
        api_key: Some("router-secret".to_string()),
        ..test_config()
    };
    let store = std::sync::Arc::new(mcp_router::registry::MemoryRegistryStore::new());
    mcp_router::create_router(state_with(config, store))
}

// ═══════════════════════════════════════════════════════════════════════════
//  Health endpoints
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn liveness_reports_counts() {
    let (url, _ds) = spawn_downstream().await;
    let state = memory_state();
    state
        .registry
        .add(new_server("svc", &url, &["a", "b"]))
        .await
        .unwrap();
    state.aggregator.get_tools(true).await.unwrap();

    let response = mcp_router::create_router(state)
        .oneshot(get_req("/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["tools"], 2);
    assert_eq!(json["servers"], 1);
}

#[tokio::test]
async fn health_endpoint_returns_json_with_status_field() {
    let response = mcp_router::create_router(memory_state())
        .oneshot(get_req("/api/health"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "starting");
    assert_eq!(json["app"], "mcp-router");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn readiness_follows_startup() {
    let state = memory_state();
    let app = mcp_router::create_router(state.clone());

    let before = app.clone().oneshot(get_req("/api/health/ready")).await.unwrap();
    assert_eq!(before.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.mark_ready();
    let after = app.oneshot(get_req("/api/health/ready")).await.unwrap();
    assert_eq!(after.status(), StatusCode::OK);
    assert_eq!(body_json(after).await["ready"], true);
}

#[tokio::test]
async fn status_summarizes_registry() {
    let (url, _ds) = spawn_downstream().await;
    let state = memory_state();
    state.registry.add(new_server("one", &url, &["a"])).await.unwrap();
    let mut off = new_server("two", &url, &["b"]);
    off.enabled = Some(false);
    state.registry.add(off).await.unwrap();

    let json = body_json(
        mcp_router::create_router(state)
            .oneshot(get_req("/api/status"))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(json["total_servers"], 2);
    assert_eq!(json["enabled_servers"], 1);
    assert_eq!(json["healthy_servers"], 0);
    assert_eq!(json["recent_actions"][0]["action"], "add_server");
}

#[tokio::test]
async fn nonexistent_route_returns_404() {
    let response = mcp_router::create_router(memory_state())
        .oneshot(get_req("/api/does-not-exist"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ═══════════════════════════════════════════════════════════════════════════
//  Auth
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn health_stays_public_with_auth_enabled() {
    let app = secured_app();
    for uri in ["/health", "/api/health"] {
        let response = app.clone().oneshot(get_req(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}

#[tokio::test]
async fn protected_routes_require_key() {
    let app = secured_app();

    let missing = app.clone().oneshot(get_req("/api/servers")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/servers")
                .header("authorization", "Bearer nope")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let mcp = app
        .clone()
        .oneshot(json_req("POST", "/mcp", rpc(1, "ping", json!({}))))
        .await
        .unwrap();
    assert_eq!(mcp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn every_credential_form_is_accepted() {
    let app = secured_app();

    let bearer = Request::builder()
        .uri("/api/servers")
        .header("authorization", "Bearer router-secret")
        .body(Body::empty())
        .unwrap();
    let api_key = Request::builder()
        .uri("/api/servers")
        .header("x-api-key", "router-secret")
        .body(Body::empty())
        .unwrap();
    let query = get_req("/api/servers?key=router-secret");

    for request in [bearer, api_key, query] {
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn message_endpoint_is_gated_by_session_not_key() {
    let app = secured_app();

    let missing = app
        .clone()
        .oneshot(json_req("POST", "/message", rpc(1, "ping", json!({}))))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let unknown = app
        .oneshot(json_req("POST", "/message?session=not-a-session", rpc(1, "ping", json!({}))))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn message_relays_on_live_session() {
    let state = memory_state();
    let (session, mut rx) = state.sessions.create();
    let app = mcp_router::create_router(state);

    let response = app
        .oneshot(json_req(
            "POST",
            &format!("/message?session={session}"),
            rpc(7, "ping", json!({})),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["id"], 7);

    let pushed = rx.recv().await.unwrap();
    assert_eq!(pushed["id"], 7);
    assert_eq!(pushed["result"], json!({}));
}
