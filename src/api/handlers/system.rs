//! System endpoints: health check and boot report.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::HealthResponse;
use crate::app_state::{AppState, BootSummary};
use crate::boot::BootStage;
use crate::error::{ErrorResponse, GatewayError};

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns liveness, the current boot stage, version and timestamp. Answers 200 during boot as well.",
    responses(
        (status = 200, description = "Service is alive", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stage = state.stage();
    let status = if stage == BootStage::Ready {
        "healthy"
    } else {
        "booting"
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: status.to_string(),
            stage,
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// `GET /boot` — Boot result: failed modules, active extensions and
/// per-module status.
///
/// # Errors
///
/// Returns [`GatewayError::NotReady`] while boot is still running.
#[utoipa::path(
    get,
    path = "/api/v1/boot",
    tag = "System",
    summary = "Boot report",
    description = "Returns `{ fail, active, modules }` once boot has finished.",
    responses(
        (status = 200, description = "Boot report", body = BootSummary),
        (status = 503, description = "Boot still running", body = ErrorResponse),
    )
)]
pub async fn boot_report(State(state): State<AppState>) -> Result<Json<BootSummary>, GatewayError> {
    state
        .summary()
        .cloned()
        .map(Json)
        .ok_or_else(|| GatewayError::NotReady(format!("boot stage {:?}", state.stage())))
}

/// System routes mounted at the root level (not under /api/v1).
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
