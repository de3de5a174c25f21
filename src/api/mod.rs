//! REST API layer: route handlers, DTOs, OpenAPI document and router
//! composition.
//!
//! Resource endpoints are mounted under `/api/v1`; `/health` and the
//! record WebSocket endpoints sit at the root.

pub mod dto;
pub mod handlers;
pub mod openapi;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;
use crate::ws::handler::{record_conn, record_detail_conn};

/// Builds the complete router with all REST and WebSocket endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
        .route("/record-conn", get(record_conn))
        .route("/record-detail-conn", get(record_detail_conn));
    openapi::mount(router)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tokio::sync::watch;
    use tower::ServiceExt;

    use super::*;
    use crate::boot::BootStage;
    use crate::domain::{EntityCache, EventBus, Topic};
    use crate::ws::{SessionHub, StandardPolicy};

    fn app() -> Router {
        let bus = EventBus::new();
        let sessions = SessionHub::new(
            bus.clone(),
            Arc::new(StandardPolicy::new()),
            Arc::new(EntityCache::new()),
            vec![Topic::record_change()],
            16,
        );
        let (_stage_tx, stage) = watch::channel(BootStage::LoadModels);
        build_router().with_state(AppState::new(bus, sessions, stage))
    }

    async fn call(request: Request<Body>) -> (StatusCode, Value) {
        let Ok(response) = app().oneshot(request).await else {
            panic!("router call failed");
        };
        let status = response.status();
        let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_request(uri: &str) -> Request<Body> {
        let Ok(request) = Request::get(uri).body(Body::empty()) else {
            panic!("bad request");
        };
        request
    }

    fn publish(topic: &str) -> Request<Body> {
        let Ok(request) = Request::post(format!("/api/v1/topics/{topic}/publish"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"payload":{"value":{"id":1}}}"#))
        else {
            panic!("bad request");
        };
        request
    }

    #[tokio::test]
    async fn health_reports_stage_during_boot() {
        let (status, body) = call(get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "booting");
    }

    #[tokio::test]
    async fn boot_report_unavailable_until_boot_finishes() {
        let (status, body) = call(get_request("/api/v1/boot")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], 2002);
    }

    #[tokio::test]
    async fn publish_without_subscribers_delivers_nothing() {
        let (status, body) = call(publish(Topic::RECORD_CHANGE)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["delivered"], 0);
    }

    #[tokio::test]
    async fn publish_on_reserved_topic_is_rejected() {
        let (status, _) = call(publish(Topic::DATABASE_CONNECTED)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (status, body) = call(get_request(openapi::OPENAPI_PATH)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"].get("/health").is_some());
    }
}
