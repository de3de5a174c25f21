//! PostgreSQL storage driver.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;

use super::Storage;
use crate::domain::{EventBus, Topic};
use crate::error::StoreError;

/// PostgreSQL-backed storage using `sqlx::PgPool`.
///
/// The pool is created on [`Storage::connect`]; every other call fails
/// with [`StoreError::NotConnected`] until then.
#[derive(Debug)]
pub struct PostgresStorage {
    url: String,
    max_connections: u32,
    connect_timeout: Duration,
    pool: OnceCell<PgPool>,
}

impl PostgresStorage {
    /// Creates an unconnected driver.
    #[must_use]
    pub fn new(url: impl Into<String>, max_connections: u32, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            max_connections,
            connect_timeout,
            pool: OnceCell::new(),
        }
    }

    fn pool(&self) -> Result<&PgPool, StoreError> {
        self.pool.get().ok_or(StoreError::NotConnected)
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn connect(&self, bus: &EventBus) -> Result<(), StoreError> {
        self.pool
            .get_or_try_init(|| async {
                PgPoolOptions::new()
                    .max_connections(self.max_connections)
                    .acquire_timeout(self.connect_timeout)
                    .connect(&self.url)
                    .await
            })
            .await?;
        tracing::info!(max_connections = self.max_connections, "database pool connected");
        bus.publish(
            Topic::database_connected(),
            serde_json::json!({ "driver": self.name() }),
        );
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS system (\
             key TEXT PRIMARY KEY, \
             value JSONB NOT NULL, \
             updated_at TIMESTAMPTZ NOT NULL DEFAULT now())",
        )
        .execute(self.pool()?)
        .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = sqlx::query_scalar::<_, Value>("SELECT value FROM system WHERE key = $1")
            .bind(key)
            .fetch_optional(self.pool()?)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO system (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(key)
        .bind(value)
        .execute(self.pool()?)
        .await?;
        Ok(())
    }
}
