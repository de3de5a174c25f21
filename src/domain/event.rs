//! Events carried by the [`super::EventBus`].
//!
//! An [`Event`] is a `(topic, payload)` pair. The payload is an opaque JSON
//! value; by convention entity-change events carry `{ "value": <snapshot> }`
//! and batch notifications carry `{ "ids": [...] }`, in which case the
//! subscriber re-fetches the entities itself.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use super::Topic;

/// Snapshot field holding the entity identifier.
pub const ID_FIELD: &str = "id";
/// Snapshot field holding the parent grouping key (e.g. a contest id).
pub const GROUP_FIELD: &str = "group";
/// Snapshot field holding the owning user's id.
pub const OWNER_FIELD: &str = "owner";

/// A published event.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    /// Topic the event was published on.
    pub topic: Topic,
    /// Opaque structured payload.
    pub payload: Value,
    /// Publication timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event with an arbitrary payload.
    #[must_use]
    pub fn new(topic: Topic, payload: Value) -> Self {
        Self {
            topic,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Creates an entity-change event wrapping the entity's current state.
    #[must_use]
    pub fn changed(topic: Topic, snapshot: Value) -> Self {
        Self::new(topic, serde_json::json!({ "value": snapshot }))
    }

    /// Creates a batch notification carrying only identifiers.
    #[must_use]
    pub fn batch(topic: Topic, ids: &[String]) -> Self {
        Self::new(topic, serde_json::json!({ "ids": ids }))
    }

    /// Returns the entity snapshot (`payload.value`), if present.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.payload.get("value").filter(|v| !v.is_null())
    }

    /// Returns the identifiers of a batch notification (`payload.ids`).
    ///
    /// Non-string, non-numeric entries are skipped.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.payload
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(scalar_key).collect())
            .unwrap_or_default()
    }

    /// Identifier of the entity in `payload.value`.
    #[must_use]
    pub fn entity_id(&self) -> Option<String> {
        self.value().and_then(|v| field_key(v, ID_FIELD))
    }

    /// Parent grouping key of the entity in `payload.value`.
    #[must_use]
    pub fn entity_group(&self) -> Option<String> {
        self.value().and_then(|v| field_key(v, GROUP_FIELD))
    }
}

/// Reads `field` from an object as a string key. Numbers are stringified
/// so that `{"id": 7}` and `{"id": "7"}` address the same entity.
#[must_use]
pub fn field_key(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(scalar_key)
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
