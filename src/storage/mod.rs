//! Storage collaborators used during boot.
//!
//! [`Storage`] is the narrow interface the orchestrator needs from a
//! storage driver: connect (and announce readiness on the bus), maintain
//! its own indexes, and read/write the `system` key-value table that holds
//! the schema version marker. [`Installer`] is the one-time install routine
//! run when the marker is behind.
//!
//! Two drivers are provided: [`MemoryStorage`] (in-process) and
//! [`PostgresStorage`] (`sqlx::PgPool`).

pub mod memory;
pub mod postgres;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::EventBus;
use crate::error::{ModuleError, StoreError};

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

/// Key of the persisted schema version marker.
pub const SCHEMA_VERSION_KEY: &str = "db.ver";

/// Storage driver and `system` key-value store.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short driver name for logs.
    fn name(&self) -> &'static str;

    /// Establishes connectivity, then publishes
    /// [`crate::domain::Topic::DATABASE_CONNECTED`] on `bus`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the backend cannot be reached; nothing
    /// is published in that case.
    async fn connect(&self, bus: &EventBus) -> Result<(), StoreError>;

    /// Creates or verifies the driver's own tables and indexes.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] on any inconsistency.
    async fn ensure_indexes(&self) -> Result<(), StoreError>;

    /// Reads a `system` value.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store is unavailable.
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Writes a `system` value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store is unavailable.
    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Reads the schema version marker. A missing key reads as `None`.
///
/// # Errors
///
/// Returns [`StoreError::Malformed`] if the stored value is not a
/// non-negative integer that fits in `u32`.
pub async fn schema_version(storage: &dyn Storage) -> Result<Option<u32>, StoreError> {
    let Some(value) = storage.get(SCHEMA_VERSION_KEY).await? else {
        return Ok(None);
    };
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .map(Some)
        .ok_or_else(|| StoreError::Malformed {
            key: SCHEMA_VERSION_KEY.to_string(),
            reason: format!("expected an integer, found {value}"),
        })
}

/// Identity the install routine creates as the first administrator.
#[derive(Clone)]
pub struct BootstrapIdentity {
    /// Administrator user name.
    pub username: String,
    /// Initial password.
    pub password: String,
}

impl fmt::Debug for BootstrapIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapIdentity")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One-time install/migration routine.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Brings storage to `version`, creating `identity` as administrator.
    ///
    /// # Errors
    ///
    /// Returns a [`ModuleError`] describing the failure; boot stops.
    async fn install(&self, identity: &BootstrapIdentity, version: u32) -> Result<(), ModuleError>;
}

/// Default installer: records the administrator account and install time
/// in the `system` table.
///
/// The password is handed to the account provisioning collaborator only;
/// it is never written to `system`.
pub struct SystemInstaller<S: ?Sized> {
    storage: std::sync::Arc<S>,
}

impl<S: Storage + ?Sized> SystemInstaller<S> {
    /// Creates an installer writing through `storage`.
    #[must_use]
    pub fn new(storage: std::sync::Arc<S>) -> Self {
        Self { storage }
    }
}

impl<S: ?Sized> fmt::Debug for SystemInstaller<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemInstaller").finish_non_exhaustive()
    }
}

#[async_trait]
impl<S: Storage + ?Sized> Installer for SystemInstaller<S> {
    async fn install(&self, identity: &BootstrapIdentity, version: u32) -> Result<(), ModuleError> {
        if identity.username.trim().is_empty() {
            return Err(ModuleError::new("bootstrap username must not be empty"));
        }
        if identity.password.len() < 6 {
            return Err(ModuleError::new("bootstrap password must be at least 6 characters"));
        }
        self.storage
            .set(
                "user.root",
                serde_json::json!({ "uname": identity.username, "priv": "all" }),
            )
            .await?;
        self.storage
            .set(
                "install.completed_at",
                serde_json::json!(chrono::Utc::now().to_rfc3339()),
            )
            .await?;
        tracing::info!(username = %identity.username, version, "install routine completed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn identity(password: &str) -> BootstrapIdentity {
        BootstrapIdentity {
            username: "Root".to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn schema_version_reads_integer_marker() {
        let storage = MemoryStorage::new();
        assert!(matches!(schema_version(&storage).await, Ok(None)));

        let Ok(()) = storage.set(SCHEMA_VERSION_KEY, serde_json::json!(1)).await else {
            panic!("set failed");
        };
        assert!(matches!(schema_version(&storage).await, Ok(Some(1))));
    }

    #[tokio::test]
    async fn schema_version_rejects_non_integer() {
        let storage = MemoryStorage::new();
        let Ok(()) = storage.set(SCHEMA_VERSION_KEY, serde_json::json!("one")).await else {
            panic!("set failed");
        };
        assert!(matches!(
            schema_version(&storage).await,
            Err(StoreError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn installer_records_root_without_password() {
        let storage = Arc::new(MemoryStorage::new());
        let installer = SystemInstaller::new(Arc::clone(&storage));
        assert!(installer.install(&identity("rootroot"), 1).await.is_ok());

        let Ok(Some(root)) = storage.get("user.root").await else {
            panic!("root user missing");
        };
        assert_eq!(root.get("uname"), Some(&serde_json::json!("Root")));
        assert!(!root.to_string().contains("rootroot"));
    }

    #[tokio::test]
    async fn installer_rejects_weak_password() {
        let storage = Arc::new(MemoryStorage::new());
        let installer = SystemInstaller::new(storage);
        assert!(installer.install(&identity("root"), 1).await.is_err());
    }

    #[test]
    fn identity_debug_redacts_password() {
        let dbg = format!("{:?}", identity("rootroot"));
        assert!(!dbg.contains("rootroot"));
    }
}
