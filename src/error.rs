//! Error types for the gateway.
//!
//! [`GatewayError`] is the HTTP-facing error and maps each variant to a
//! status code and structured JSON body. The remaining enums cover the
//! core: [`BootError`] is fatal to startup, while [`ModuleError`],
//! [`HandlerError`] and [`SessionError`] are recovered where they occur.

use std::path::PathBuf;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::boot::Phase;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: topic name must not be empty",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                 |
/// |-----------|-----------------|-----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request             |
/// | 2000–2999 | Access / State  | 403 Forbidden / 503         |
/// | 3000–3999 | Server          | 500 Internal Server Error   |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The viewer may not observe the requested context.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Boot has not reached the ready stage.
    #[error("service not ready: {0}")]
    NotReady(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Forbidden(_) => 2001,
            Self::NotReady(_) => 2002,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SessionError> for GatewayError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Unauthorized(context) => Self::Forbidden(context),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Failure raised by a module's load, post-init or index hook.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ModuleError(String);

impl ModuleError {
    /// Creates a module error from any message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<StoreError> for ModuleError {
    fn from(err: StoreError) -> Self {
        Self(err.to_string())
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(err: std::io::Error) -> Self {
        Self(err.to_string())
    }
}

/// Fatal boot failures. Any of these stops the process before `Ready`.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// Two descriptors share a name within one phase.
    #[error("duplicate {phase} module: {name}")]
    DuplicateModule {
        /// Phase of the clashing descriptors.
        phase: Phase,
        /// Shared name.
        name: String,
    },

    /// A working directory could not be prepared.
    #[error("cannot prepare directory {}: {source}", path.display())]
    WorkDir {
        /// Directory that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Storage did not signal readiness within the configured bound.
    #[error("storage not ready after {0:?}")]
    ReadinessTimeout(Duration),

    /// The readiness gate was dropped before it fired.
    #[error("readiness gate dropped before firing")]
    ReadinessAborted,

    /// An index-maintenance hook failed; storage consistency is unknown.
    #[error("index maintenance failed for {module}: {source}")]
    IndexMaintenance {
        /// Model whose hook failed.
        module: String,
        /// Hook error.
        source: ModuleError,
    },

    /// The install/migration routine failed.
    #[error("schema migration to version {version} failed: {reason}")]
    Migration {
        /// Version that was being installed.
        version: u32,
        /// Failure description.
        reason: String,
    },

    /// The version marker could not be read or written.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Failure raised by a bus handler. Logged by the bus, never propagated.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// Handler-specific failure.
    #[error("{0}")]
    Failed(String),

    /// The subscriber's downstream queue is closed.
    #[error("subscriber queue closed")]
    Closed,

    /// The subscriber's downstream queue is full; the event was dropped.
    #[error("subscriber queue full")]
    QueueFull,
}

/// Connection-session failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The viewer may not observe the requested context. The session is
    /// closed and holds no subscription.
    #[error("viewer may not observe {0}")]
    Unauthorized(String),

    /// The session has already left the pending state.
    #[error("session already prepared")]
    AlreadyPrepared,

    /// The session is closed.
    #[error("session closed")]
    Closed,

    /// Re-fetching entities for a refresh request failed.
    #[error("fetch failed: {0}")]
    Fetch(String),
}

/// Storage collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The driver has not connected yet.
    #[error("storage not connected")]
    NotConnected,

    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value had an unexpected shape.
    #[error("malformed stored value for {key}: {reason}")]
    Malformed {
        /// Key that was read.
        key: String,
        /// What was wrong with it.
        reason: String,
    },
}
