//! Latest-snapshot cache for changed entities.
//!
//! [`EntityCache`] listens on an entity-change topic and keeps the most
//! recent snapshot per entity id. Connection sessions read it for the pull
//! path (explicit refresh of known ids) and for the initial push of a
//! detail session.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::event::{ID_FIELD, field_key};
use super::{Event, EventBus, Listener, SubscriberId, Topic};
use crate::error::StoreError;

/// Source of current entity snapshots, keyed by id.
#[async_trait]
pub trait EntitySource: Send + Sync {
    /// Returns the snapshots that exist among `ids`, in request order.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backing store is unavailable.
    async fn fetch(&self, ids: &[String]) -> Result<Vec<Value>, StoreError>;
}

/// In-memory map from entity id to its latest snapshot.
#[derive(Debug)]
pub struct EntityCache {
    entries: RwLock<HashMap<String, Value>>,
    subscriber: SubscriberId,
}

impl EntityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            subscriber: SubscriberId::new(),
        }
    }

    /// Stores `snapshot` under its `id` field, replacing any older one.
    ///
    /// Returns the id, or `None` when the snapshot has no usable id.
    pub fn upsert(&self, snapshot: Value) -> Option<String> {
        let id = field_key(&snapshot, ID_FIELD)?;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), snapshot);
        Some(id)
    }

    /// Returns the cached snapshot for `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of cached entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes the cache to `topic`. Every event carrying a snapshot
    /// updates the cache; batch notifications are ignored.
    ///
    /// Returns the registered listener so the caller can unsubscribe.
    pub fn listen(self: &Arc<Self>, bus: &EventBus, topic: Topic) -> Listener {
        let cache = Arc::clone(self);
        let listener: Listener = Arc::new(move |event: &Event| {
            if let Some(snapshot) = event.value() {
                cache.upsert(snapshot.clone());
            }
            Ok(())
        });
        bus.subscribe(&[topic], self.subscriber, &listener);
        listener
    }

    /// Subscriber identity used by [`listen`](Self::listen).
    #[must_use]
    pub fn subscriber(&self) -> SubscriberId {
        self.subscriber
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntitySource for EntityCache {
    async fn fetch(&self, ids: &[String]) -> Result<Vec<Value>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(ids.iter().filter_map(|id| entries.get(id).cloned()).collect())
    }
}
