//! SSE transport: `GET /sse` opens a session stream, `POST /message?session=`
//! feeds it.
//!
//! The session id is handed out only over an authenticated stream, so holding a
//! live id is what authorizes `/message`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::server;
use crate::state::AppState;

const CHANNEL_CAPACITY: usize = 64;
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("unknown session")]
    Unknown,
    #[error("session expired")]
    Expired,
}

struct Session {
    created_at: Instant,
    sender: mpsc::Sender<Value>,
}

pub struct SessionStore {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new session and return its id with the receiving half of its stream.
    pub fn create(&self) -> (String, mpsc::Receiver<Value>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.insert(
            id.clone(),
            Session {
                created_at: Instant::now(),
                sender,
            },
        );
        (id, receiver)
    }

    /// Sender for a live session. Expired sessions are dropped on lookup.
    pub fn lookup(&self, id: &str) -> Result<mpsc::Sender<Value>, SessionError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let session = sessions.get(id).ok_or(SessionError::Unknown)?;
        if session.created_at.elapsed() >= self.ttl {
            sessions.remove(id);
            return Err(SessionError::Expired);
        }
        Ok(session.sender.clone())
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        sessions.remove(id).is_some()
    }

    /// Drop expired sessions, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let before = sessions.len();
        sessions.retain(|_, s| s.created_at.elapsed() < self.ttl);
        before - sessions.len()
    }

    /// Drop every session; their SSE streams end once in-flight sends finish.
    pub fn close_all(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|p| p.into_inner());
        let count = sessions.len();
        sessions.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Periodically sweep expired sessions until `shutdown` fires.
pub fn spawn_sweeper(store: Arc<SessionStore>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let closed = store.close_all();
                    tracing::info!(closed, "session sweeper: shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let removed = store.sweep();
                    if removed > 0 {
                        tracing::info!(removed, remaining = store.len(), "session sweeper: expired sessions dropped");
                    }
                }
            }
        }
    })
}

// ── GET /sse ────────────────────────────────────────────────────────────────

pub async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (session_id, receiver) = state.sessions.create();
    tracing::info!(session = %session_id, "mcp: sse session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/message?session={session_id}"));
    let messages = ReceiverStream::new(receiver)
        .map(|message| Event::default().event("message").data(message.to_string()));
    let stream = stream::once(async move { endpoint })
        .chain(messages)
        .map(Ok::<_, Infallible>);

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL))
}

// ── POST /message ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    pub session: Option<String>,
}

pub async fn message_handler(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(session_id) = query.session.filter(|s| !s.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing session parameter" })),
        )
            .into_response();
    };

    let sender = match state.sessions.lookup(&session_id) {
        Ok(sender) => sender,
        Err(e) => {
            tracing::warn!(session = %session_id, "mcp: rejected message: {}", e);
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": e.to_string() }))).into_response();
        }
    };

    let outcome = server::dispatch(&state.router, &body).await;
    if let Some(response) = &outcome {
        // The stream may already be gone; the inline body still answers.
        if let Err(e) = sender.try_send(response.clone()) {
            tracing::debug!(session = %session_id, "mcp: stream push skipped: {}", e);
        }
    }
    server::into_http(outcome)
}
