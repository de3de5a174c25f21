//! Topic handlers: publish an event, list subscriber counts.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::dto::{PublishRequest, PublishResponse, TopicListResponse};
use crate::app_state::AppState;
use crate::domain::Topic;
use crate::error::{ErrorResponse, GatewayError};

/// `POST /topics/{topic}/publish` — Publish an event on a topic.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidRequest`] for an empty or reserved topic.
#[utoipa::path(
    post,
    path = "/api/v1/topics/{topic}/publish",
    tag = "Topics",
    summary = "Publish an event",
    description = "Delivers the payload to every current subscriber of the topic. Events with no subscribers are dropped.",
    params(("topic" = String, Path, description = "Topic name")),
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Event published", body = PublishResponse),
        (status = 400, description = "Empty or reserved topic", body = ErrorResponse),
    )
)]
pub async fn publish(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, GatewayError> {
    let name = topic.trim();
    if name.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "topic name must not be empty".to_string(),
        ));
    }
    if name == Topic::DATABASE_CONNECTED {
        return Err(GatewayError::InvalidRequest(format!(
            "topic {name} is reserved"
        )));
    }

    let topic = Topic::new(name);
    if !topic.is_entity_change() {
        tracing::debug!(%topic, "publishing on a non entity-change topic");
    }
    let delivered = state.bus.publish(topic.clone(), req.payload);
    tracing::info!(%topic, delivered, "event published");
    Ok(Json(PublishResponse {
        topic: topic.to_string(),
        delivered,
    }))
}

/// `GET /topics` — Subscriber counts per topic.
#[utoipa::path(
    get,
    path = "/api/v1/topics",
    tag = "Topics",
    summary = "List topics",
    description = "Returns every topic with at least one subscriber, plus bus totals.",
    responses(
        (status = 200, description = "Topic list", body = TopicListResponse),
    )
)]
pub async fn list_topics(State(state): State<AppState>) -> Json<TopicListResponse> {
    Json(TopicListResponse {
        topics: state.bus.topics(),
        published: state.bus.published(),
        handler_failures: state.bus.handler_failures(),
    })
}

/// Topic routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/topics", get(list_topics))
        .route("/topics/{topic}/publish", post(publish))
}
