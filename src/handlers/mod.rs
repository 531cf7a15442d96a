// ---------------------------------------------------------------------------
// handlers/: shared HTTP error type and the public system endpoints.
// Admin routes live in crate::admin, MCP transports in crate::mcp.
// ---------------------------------------------------------------------------

// Sub-modules are pub(crate) so utoipa __path_* types are accessible from lib.rs OpenApi derive.
pub(crate) mod system;

pub use system::{health, liveness, readiness, status};

// The #[utoipa::path] attribute macro generates private structs like __path_health.
// The OpenApi derive in lib.rs expects them at `handlers::__path_health`.
pub use system::{__path_health, __path_liveness, __path_readiness, __path_status};

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::aggregator::AggregateError;
use crate::monitor::MonitorError;
use crate::registry::RegistryError;

// ---------------------------------------------------------------------------
// API error
// ---------------------------------------------------------------------------

/// Centralized API error type for all handlers.
/// Logs full details server-side, returns sanitized JSON to the client.
///
/// Response format:
/// ```json
/// {
///   "error": {
///     "code": "NOT_FOUND",
///     "message": "Human-readable description",
///     "request_id": "uuid",
///     "details": { ... }       // null when absent
///   }
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

/// Structured error response body, serialized inside `{ "error": ... }`.
#[derive(Debug, serde::Serialize)]
pub struct StructuredApiError {
    /// Machine-readable error code (e.g. "BAD_REQUEST", "CONFLICT").
    pub code: &'static str,
    /// Sanitized, safe to show to users.
    pub message: String,
    pub request_id: String,
    pub details: Option<Value>,
}

impl ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Upstream, Internal and Unavailable carry backend detail (store errors,
    /// downstream bodies) and are replaced with generic text.
    fn sanitized_message(&self) -> String {
        match self {
            ApiError::BadRequest(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::Unauthorized(m) => m.clone(),
            ApiError::Upstream(_) => "Upstream service error".to_string(),
            ApiError::Internal(_) => "Internal server error".to_string(),
            ApiError::Unavailable(_) => "Registry unavailable".to_string(),
        }
    }

    /// Attach structured details to the response body.
    pub fn with_details(self, details: Value) -> ApiErrorWithDetails {
        ApiErrorWithDetails {
            error: self,
            details: Some(details),
        }
    }

    fn current_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn render(&self, details: Option<Value>) -> axum::response::Response {
        use axum::response::IntoResponse;

        let status = self.status_code();
        let request_id = Self::current_request_id();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                code = self.error_code(),
                "API error ({}): {}",
                status.as_u16(),
                self
            );
        } else {
            tracing::warn!(
                request_id = %request_id,
                code = self.error_code(),
                "API error ({}): {}",
                status.as_u16(),
                self
            );
        }

        let body = json!({
            "error": StructuredApiError {
                code: self.error_code(),
                message: self.sanitized_message(),
                request_id,
                details,
            }
        });
        (status, Json(body)).into_response()
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        self.render(None)
    }
}

/// ApiError with structured details attached.
/// Use `ApiError::Upstream("msg".into()).with_details(json!({...}))` to construct.
pub struct ApiErrorWithDetails {
    pub error: ApiError,
    pub details: Option<Value>,
}

impl axum::response::IntoResponse for ApiErrorWithDetails {
    fn into_response(self) -> axum::response::Response {
        self.error.render(self.details)
    }
}

/// `Json` extractor whose rejections render as `ApiError::BadRequest`
/// instead of axum's plain-text 400/415/422.
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Conflict(_) => ApiError::Conflict(err.to_string()),
            RegistryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RegistryError::InvalidArgument(m) => ApiError::BadRequest(m),
            RegistryError::Unavailable(_) => ApiError::Unavailable(err.to_string()),
        }
    }
}

impl From<AggregateError> for ApiError {
    fn from(err: AggregateError) -> Self {
        ApiError::Unavailable(err.to_string())
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Registry(e) => e.into(),
            MonitorError::NoRecoveryHook(_) => ApiError::BadRequest(err.to_string()),
            MonitorError::Recovery(_) => ApiError::Upstream(err.to_string()),
        }
    }
}
