// Backend log capture and the /api/logs endpoints.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::state::AppState;

pub const LOG_BUFFER_CAPACITY: usize = 1000;

// ── Log Ring Buffer ─────────────────────────────────────────────────────────
/// In-memory ring buffer for backend log entries (last N events).
/// Uses `std::sync::Mutex` because writes happen in the tracing Layer
/// (sync context, not inside a tokio runtime poll).

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

pub struct LogRingBuffer {
    entries: std::sync::Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: std::sync::Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let mut buf = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    /// Newest first, filtered by minimum level and a case-insensitive search
    /// over message and target.
    pub fn recent(&self, limit: usize, min_level: Option<&str>, search: Option<&str>) -> Vec<LogEntry> {
        let needle = search.map(str::to_lowercase);
        let buf = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        buf.iter()
            .rev()
            .filter(|e| min_level.is_none_or(|lvl| level_ord(&e.level) >= level_ord(lvl)))
            .filter(|e| {
                needle.as_deref().is_none_or(|s| {
                    e.message.to_lowercase().contains(s) || e.target.to_lowercase().contains(s)
                })
            })
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn level_ord(level: &str) -> u8 {
    match level.to_uppercase().as_str() {
        "ERROR" => 5,
        "WARN" => 4,
        "INFO" => 3,
        "DEBUG" => 2,
        "TRACE" => 1,
        _ => 0,
    }
}

// ── tracing Layer ───────────────────────────────────────────────────────────

/// Copies every event that passes the subscriber's filter into a ring buffer.
pub struct LogBufferLayer {
    buffer: Arc<LogRingBuffer>,
}

impl LogBufferLayer {
    pub fn new(buffer: Arc<LogRingBuffer>) -> Self {
        Self { buffer }
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl EventVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl<S> Layer<S> for LogBufferLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        self.buffer.push(LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            message: visitor.finish(),
        });
    }
}

// ── Query parameters ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BackendLogsQuery {
    pub limit: Option<usize>,
    pub level: Option<String>,
    pub search: Option<String>,
}

// ── GET /api/logs ───────────────────────────────────────────────────

#[utoipa::path(get, path = "/api/logs", tag = "logs",
    params(
        ("limit" = Option<usize>, Query, description = "Max entries (default 200, max 500)"),
        ("level" = Option<String>, Query, description = "Minimum level"),
        ("search" = Option<String>, Query, description = "Substring filter")
    ),
    responses((status = 200, description = "Recent backend log entries", body = Value))
)]
pub async fn backend_logs(
    State(state): State<AppState>,
    Query(q): Query<BackendLogsQuery>,
) -> Json<Value> {
    let limit = q.limit.unwrap_or(200).min(500);
    let entries = state.log_buffer.recent(limit, q.level.as_deref(), q.search.as_deref());
    Json(json!({ "logs": entries, "total": entries.len() }))
}

// ── DELETE /api/logs ────────────────────────────────────────────────

#[utoipa::path(delete, path = "/api/logs", tag = "logs",
    responses((status = 200, description = "Log buffer cleared", body = Value))
)]
pub async fn clear_backend_logs(State(state): State<AppState>) -> Json<Value> {
    state.log_buffer.clear();
    Json(json!({ "cleared": true }))
}
