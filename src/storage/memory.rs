//! In-process storage driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::Storage;
use crate::domain::{EventBus, Topic};
use crate::error::StoreError;

/// Storage kept in a process-local map. Connects instantly.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    system: RwLock<HashMap<String, Value>>,
    connected: AtomicBool,
}

impl MemoryStorage {
    /// Creates an empty, unconnected store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with `system` values.
    #[must_use]
    pub fn with_values(values: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            system: RwLock::new(values.into_iter().collect()),
            connected: AtomicBool::new(false),
        }
    }

    /// Returns `true` once [`Storage::connect`] has run.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self, bus: &EventBus) -> Result<(), StoreError> {
        self.connected.store(true, Ordering::Release);
        bus.publish(
            Topic::database_connected(),
            serde_json::json!({ "driver": self.name() }),
        );
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .system
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.system
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}
