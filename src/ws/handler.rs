//! Axum WebSocket upgrade handlers for record connections.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use utoipa::IntoParams;

use super::connection::run_connection;
use super::permission::{SessionContext, Viewer};
use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};

/// Query for the list connection.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct RecordConnQuery {
    /// Group to follow; omit for ungrouped entities.
    #[serde(default)]
    pub group: Option<String>,
}

/// Query for the detail connection.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct RecordDetailQuery {
    /// Entity to follow.
    #[serde(default)]
    pub id: Option<String>,
}

/// `GET /record-conn` — Live updates for the entities of one group.
///
/// # Errors
///
/// Returns [`GatewayError::NotReady`] until boot has loaded the record
/// handler.
#[utoipa::path(
    get,
    path = "/record-conn",
    tag = "Sessions",
    summary = "Open a list session",
    description = "Upgrades to a WebSocket that streams redacted entity changes for one group. Ungrouped entities are always included.",
    params(RecordConnQuery),
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 503, description = "Boot not finished or record handler failed", body = ErrorResponse),
    )
)]
pub async fn record_conn(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecordConnQuery>,
) -> Result<Response, GatewayError> {
    state.ensure_sessions()?;
    let group = query.group.filter(|g| !g.trim().is_empty());
    Ok(upgrade(ws, &state, &headers, SessionContext::Group(group)))
}

/// `GET /record-detail-conn` — Live updates for a single entity.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] without an `id`, or
/// [`GatewayError::NotReady`] until boot has loaded the record handler.
#[utoipa::path(
    get,
    path = "/record-detail-conn",
    tag = "Sessions",
    summary = "Open a detail session",
    description = "Upgrades to a WebSocket that first sends the entity's current state, then streams its changes.",
    params(RecordDetailQuery),
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 400, description = "Missing entity id", body = ErrorResponse),
        (status = 503, description = "Boot not finished or record handler failed", body = ErrorResponse),
    )
)]
pub async fn record_detail_conn(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<RecordDetailQuery>,
) -> Result<Response, GatewayError> {
    let id = query
        .id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| GatewayError::InvalidRequest("id is required".to_string()))?;
    state.ensure_sessions()?;
    Ok(upgrade(ws, &state, &headers, SessionContext::Entity(id)))
}

fn upgrade(
    ws: WebSocketUpgrade,
    state: &AppState,
    headers: &HeaderMap,
    context: SessionContext,
) -> Response {
    let (session, outbound) = state.sessions.open(Viewer::from_headers(headers));
    tracing::debug!(session = %session.id(), %context, "opening session");
    ws.on_upgrade(move |socket| run_connection(socket, session, outbound, context))
        .into_response()
}
