//! Topic publish and listing DTOs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::domain::TopicStats;

/// Body of `POST /api/v1/topics/{topic}/publish`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PublishRequest {
    /// Event payload. Entity changes carry `{"value": {...}}`, batch
    /// notifications `{"ids": [...]}`.
    #[schema(value_type = Object)]
    pub payload: Value,
}

/// Result of a publish.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublishResponse {
    /// Topic the event was published on.
    pub topic: String,
    /// Handlers that accepted the event.
    pub delivered: usize,
}

/// Subscriber counts per topic plus bus totals.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TopicListResponse {
    /// Topics with at least one subscriber.
    pub topics: Vec<TopicStats>,
    /// Publish calls since start.
    pub published: u64,
    /// Handler invocations that failed.
    pub handler_failures: u64,
}
