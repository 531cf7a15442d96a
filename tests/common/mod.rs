// Shared helpers for integration tests: app construction, a live downstream
// tool server on 127.0.0.1:0, and request/response shorthands.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};

use mcp_router::config::RouterConfig;
use mcp_router::logs::LogRingBuffer;
use mcp_router::models::{NewServer, ToolDefinition, ToolManifest};
use mcp_router::monitor::{Notification, Notifier, NotifyError};
use mcp_router::registry::{MemoryRegistryStore, RegistryStore};
use mcp_router::state::AppState;

pub fn test_config() -> RouterConfig {
    RouterConfig {
        public_url: "https://router.test".to_string(),
        probe_timeout: Duration::from_secs(2),
        recovery_settle: Duration::ZERO,
        ..RouterConfig::default()
    }
}

pub fn state_with(config: RouterConfig, store: Arc<dyn RegistryStore>) -> AppState {
    state_with_notifier(config, store, Arc::new(RecordingNotifier::default()))
}

pub fn state_with_notifier(
    config: RouterConfig,
    store: Arc<dyn RegistryStore>,
    notifier: Arc<dyn Notifier>,
) -> AppState {
    AppState::with_notifier(
        config,
        store,
        Arc::new(LogRingBuffer::new(100)),
        reqwest::Client::new(),
        notifier,
    )
}

pub fn memory_state() -> AppState {
    state_with(test_config(), Arc::new(MemoryRegistryStore::new()))
}

pub fn manifest(tools: &[&str]) -> ToolManifest {
    ToolManifest {
        tools: tools
            .iter()
            .map(|name| ToolDefinition {
                name: name.to_string(),
                description: format!("{name} tool"),
                input_schema: json!({ "type": "object" }),
            })
            .collect(),
    }
}

pub fn new_server(name: &str, url: &str, tools: &[&str]) -> NewServer {
    NewServer {
        name: name.to_string(),
        url: url.to_string(),
        description: Some(format!("{name} server")),
        auth_key: None,
        enabled: None,
        priority: None,
        tool_manifest: Some(manifest(tools)),
        backend: None,
        health_path: None,
        accepted_statuses: None,
        recovery: None,
        timeout_secs: None,
    }
}

// ── Live downstream server ─────────────────────────────────────────────────

/// Downstream tool server state: the status `/health` answers with, and the
/// bearer tokens seen on `/call`.
#[derive(Default)]
pub struct Downstream {
    pub health_status: AtomicU16,
    pub seen_auth: Mutex<Vec<String>>,
    pub heal_calls: AtomicU16,
}

impl Downstream {
    pub fn set_health(&self, status: u16) {
        self.health_status.store(status, Ordering::SeqCst);
    }
}

async fn call(
    State(ds): State<Arc<Downstream>>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> axum::response::Response {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        ds.seen_auth
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(auth.to_string());
    }
    match body["tool"].as_str().unwrap_or_default() {
        "fail" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "boom" })),
        )
            .into_response(),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "late": true })).into_response()
        }
        tool => Json(json!({ "tool": tool, "echo": body["arguments"], "params": body["params"] }))
            .into_response(),
    }
}

async fn health(State(ds): State<Arc<Downstream>>) -> StatusCode {
    StatusCode::from_u16(ds.health_status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

/// Recovery webhook: flips the health endpoint back to 200.
async fn heal(State(ds): State<Arc<Downstream>>, Json(_body): Json<Value>) -> Json<Value> {
    ds.heal_calls.fetch_add(1, Ordering::SeqCst);
    ds.set_health(200);
    Json(json!({ "restarted": true }))
}

/// Spawn a downstream server; returns its base URL and shared state.
pub async fn spawn_downstream() -> (String, Arc<Downstream>) {
    let ds = Arc::new(Downstream::default());
    ds.set_health(200);
    let app = Router::new()
        .route("/call", post(call))
        .route("/health", get(health))
        .route("/heal", post(heal))
        .with_state(Arc::clone(&ds));
    let addr = serve(app).await;
    (format!("http://{addr}"), ds)
}

pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub async fn dead_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

// ── Notifier ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ── Request helpers ────────────────────────────────────────────────────────

pub fn get_req(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn json_req(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn rpc(id: i64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
