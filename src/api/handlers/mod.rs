//! REST endpoint handlers organized by resource.

pub mod system;
pub mod topics;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/boot", get(system::boot_report))
        .merge(topics::routes())
}
