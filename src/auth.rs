// Shared-secret authentication middleware.
// When ROUTER_API_KEY is set, protected routes accept the secret as
// `Authorization: Bearer <key>`, `X-API-Key: <key>` or `?key=<key>`
// (MCP clients that cannot set headers on the SSE GET use the query form).
// When unset, auth is disabled (dev mode).

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Middleware that enforces the shared secret when one is configured.
/// Public routes (health, readiness, /message) must NOT use this middleware.
pub async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let secret = match state.auth_secret.as_deref() {
        Some(s) => s,
        None => return Ok(next.run(request).await),
    };

    match presented_key(request.headers(), request.uri().query()) {
        Some(key) if keys_match(&key, secret) => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "auth failed: invalid key");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            tracing::warn!(path = %request.uri().path(), "auth failed: no credentials");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// First credential found, in order: bearer header, `X-API-Key`, `?key=`.
fn presented_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    let bearer = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if bearer.is_some() {
        return bearer;
    }

    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|t| t.trim().to_string());
    if api_key.is_some() {
        return api_key;
    }

    query.and_then(|q| {
        url::form_urlencoded::parse(q.as_bytes())
            .find(|(k, _)| k == "key")
            .map(|(_, v)| v.into_owned())
    })
}

fn keys_match(presented: &str, secret: &str) -> bool {
    presented.as_bytes().ct_eq(secret.as_bytes()).into()
}
