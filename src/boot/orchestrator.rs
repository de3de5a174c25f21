//! Dependency-ordered boot sequence.
//!
//! [`BootstrapOrchestrator`] walks a fixed, linear sequence of stages:
//!
//! ```text
//! Init → PrepareStorage → WaitReadiness → LoadLibs → LoadServices
//!      → LoadModels → EnsureIndexes → MigrateSchema → LoadConfig
//!      → RunPostInit → Ready
//! ```
//!
//! Module load failures are isolated: each becomes a [`FailRecord`] and the
//! remaining modules still load. Post-init failures are logged. Only index
//! maintenance, schema migration and storage readiness are fatal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;

use super::module::{ModuleOrigin, Phase};
use super::registry::{ModuleRegistry, ModuleStatus};
use super::workdir;
use crate::config::GatewayConfig;
use crate::domain::{EventBus, ReadinessGate, Topic};
use crate::error::BootError;
use crate::storage::{self, BootstrapIdentity, Installer, SCHEMA_VERSION_KEY, Storage};

/// Boot stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BootStage {
    /// Nothing has run yet.
    Init,
    /// Creating working directories.
    PrepareStorage,
    /// Waiting for the storage-readiness signal.
    WaitReadiness,
    /// Loading [`Phase::Lib`] modules.
    LoadLibs,
    /// Loading [`Phase::Service`] modules.
    LoadServices,
    /// Loading [`Phase::Model`] then [`Phase::Handler`] modules.
    LoadModels,
    /// Running model index hooks.
    EnsureIndexes,
    /// Checking the schema version marker.
    MigrateSchema,
    /// Loading [`Phase::Config`] modules.
    LoadConfig,
    /// Running post-init hooks.
    RunPostInit,
    /// Boot finished.
    Ready,
}

/// A module that failed to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct FailRecord {
    /// Module name.
    pub module: String,
    /// Error description.
    pub error: String,
}

impl FailRecord {
    /// Creates a fail record.
    #[must_use]
    pub fn new(module: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            error: error.into(),
        }
    }
}

/// Result handed to the process supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct BootReport {
    /// Modules that failed to load, in attempt order.
    pub fail: Vec<FailRecord>,
    /// Extension modules that loaded successfully, each listed once even
    /// when it contributes to several phases.
    pub active: Vec<String>,
}

/// Boot parameters.
#[derive(Debug, Clone)]
pub struct BootSettings {
    /// Root of the prepared working directories.
    pub work_dir: PathBuf,
    /// Expected schema version marker.
    pub schema_version: u32,
    /// Bound on the readiness wait; `None` waits indefinitely.
    pub readiness_timeout: Option<Duration>,
    /// Identity passed to the install routine.
    pub identity: BootstrapIdentity,
}

impl From<&GatewayConfig> for BootSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            schema_version: config.schema_version,
            readiness_timeout: config.readiness_timeout,
            identity: BootstrapIdentity {
                username: config.bootstrap_username.clone(),
                password: config.bootstrap_password.clone(),
            },
        }
    }
}

/// A finished boot: the report plus the now read-only registry.
#[derive(Debug)]
pub struct BootOutcome {
    /// Fail list and active extensions.
    pub report: BootReport,
    /// Registry with final load statuses.
    pub registry: ModuleRegistry,
}

/// Drives a [`ModuleRegistry`] through the boot stages.
pub struct BootstrapOrchestrator {
    bus: EventBus,
    registry: ModuleRegistry,
    storage: Arc<dyn Storage>,
    installer: Arc<dyn Installer>,
    settings: BootSettings,
    gate: ReadinessGate,
    stage: watch::Sender<BootStage>,
    report: BootReport,
}

impl BootstrapOrchestrator {
    /// Creates an orchestrator over a populated registry.
    #[must_use]
    pub fn new(
        bus: EventBus,
        registry: ModuleRegistry,
        storage: Arc<dyn Storage>,
        installer: Arc<dyn Installer>,
        settings: BootSettings,
    ) -> Self {
        let (stage, _) = watch::channel(BootStage::Init);
        Self {
            bus,
            registry,
            storage,
            installer,
            settings,
            gate: ReadinessGate::new(),
            stage,
            report: BootReport::default(),
        }
    }

    /// Seeds the fail list, e.g. with extensions the catalog could not
    /// resolve before boot.
    #[must_use]
    pub fn with_failures(mut self, fail: Vec<FailRecord>) -> Self {
        self.report.fail.extend(fail);
        self
    }

    /// Readiness gate waited on during [`BootStage::WaitReadiness`]. Firing
    /// it directly is equivalent to publishing the readiness topic.
    #[must_use]
    pub fn readiness(&self) -> ReadinessGate {
        self.gate.clone()
    }

    /// Observes stage transitions.
    #[must_use]
    pub fn stage(&self) -> watch::Receiver<BootStage> {
        self.stage.subscribe()
    }

    /// Runs the whole sequence.
    ///
    /// # Errors
    ///
    /// Returns a [`BootError`] if working directories cannot be prepared,
    /// storage never becomes ready within the configured bound, an index
    /// hook fails, or the schema migration fails.
    pub async fn run(mut self) -> Result<BootOutcome, BootError> {
        self.advance(BootStage::PrepareStorage);
        let dirs = workdir::prepare(&self.settings.work_dir).await?;
        tracing::debug!(dirs = ?dirs, "working directories ready");

        self.advance(BootStage::WaitReadiness);
        self.wait_readiness().await?;

        self.advance(BootStage::LoadLibs);
        self.load_phase(Phase::Lib).await;

        self.advance(BootStage::LoadServices);
        self.load_phase(Phase::Service).await;

        self.advance(BootStage::LoadModels);
        self.load_phase(Phase::Model).await;
        self.load_phase(Phase::Handler).await;

        self.advance(BootStage::EnsureIndexes);
        self.ensure_indexes().await?;

        self.advance(BootStage::MigrateSchema);
        self.migrate().await?;

        self.advance(BootStage::LoadConfig);
        self.load_phase(Phase::Config).await;

        self.advance(BootStage::RunPostInit);
        self.run_post_init().await;

        self.advance(BootStage::Ready);
        tracing::info!(
            failed = self.report.fail.len(),
            active = self.report.active.len(),
            modules = self.registry.len(),
            "boot complete"
        );
        Ok(BootOutcome {
            report: self.report,
            registry: self.registry,
        })
    }

    fn advance(&self, stage: BootStage) {
        tracing::info!(?stage, "boot stage");
        self.stage.send_replace(stage);
    }

    async fn wait_readiness(&self) -> Result<(), BootError> {
        let bridge = self.gate.bridge(&self.bus, Topic::database_connected());

        let storage = Arc::clone(&self.storage);
        let bus = self.bus.clone();
        tokio::spawn(async move {
            if let Err(err) = storage.connect(&bus).await {
                tracing::error!(driver = storage.name(), error = %err, "storage connect failed");
            }
        });

        let result = self.gate.wait_timeout(self.settings.readiness_timeout).await;
        bridge.detach();
        result?;
        tracing::info!(driver = self.storage.name(), "storage ready");
        Ok(())
    }

    async fn load_phase(&mut self, phase: Phase) {
        let attempts: Vec<_> = self
            .registry
            .phase(phase)
            .map(|(descriptor, origin)| {
                (
                    descriptor.name().to_string(),
                    origin,
                    descriptor.load(&self.bus),
                )
            })
            .collect();
        if attempts.is_empty() {
            return;
        }

        let (meta, futures): (Vec<_>, Vec<_>) = attempts
            .into_iter()
            .map(|(name, origin, fut)| ((name, origin), fut))
            .unzip();
        let results = join_all(futures).await;

        for ((name, origin), result) in meta.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    tracing::debug!(%phase, module = %name, "module loaded");
                    self.registry.set_status(phase, &name, ModuleStatus::Loaded);
                    if origin == ModuleOrigin::Extension && !self.report.active.contains(&name) {
                        self.report.active.push(name);
                    }
                }
                Err(err) => {
                    tracing::warn!(%phase, module = %name, error = %err, "module failed to load");
                    self.registry.set_status(phase, &name, ModuleStatus::Failed);
                    self.report.fail.push(FailRecord::new(name, err.to_string()));
                }
            }
        }
    }

    async fn ensure_indexes(&self) -> Result<(), BootError> {
        let hooks: Vec<_> = self
            .registry
            .loaded()
            .filter(|d| d.phase() == Phase::Model)
            .filter_map(|d| d.ensure_indexes(&self.bus).map(|f| (d.name().to_string(), f)))
            .collect();
        for (module, hook) in hooks {
            hook.await.map_err(|source| {
                tracing::error!(module = %module, error = %source, "index maintenance failed");
                BootError::IndexMaintenance { module, source }
            })?;
        }
        Ok(())
    }

    async fn migrate(&self) -> Result<(), BootError> {
        let expected = self.settings.schema_version;
        let current = storage::schema_version(self.storage.as_ref()).await?;
        if current == Some(expected) {
            tracing::debug!(version = expected, "schema up to date");
            return Ok(());
        }

        tracing::info!(?current, expected, "running install routine");
        self.installer
            .install(&self.settings.identity, expected)
            .await
            .map_err(|err| BootError::Migration {
                version: expected,
                reason: err.to_string(),
            })?;
        self.storage
            .set(SCHEMA_VERSION_KEY, serde_json::json!(expected))
            .await?;
        Ok(())
    }

    async fn run_post_init(&self) {
        let hooks: Vec<_> = self
            .registry
            .loaded()
            .filter_map(|d| d.post_init(&self.bus).map(|f| (d.name().to_string(), f)))
            .collect();
        for (module, hook) in hooks {
            if let Err(err) = hook.await {
                tracing::error!(module = %module, error = %err, "post-init failed");
            }
        }
    }
}

impl std::fmt::Debug for BootstrapOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapOrchestrator")
            .field("stage", &*self.stage.borrow())
            .field("modules", &self.registry.len())
            .field("storage", &self.storage.name())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::boot::ModuleDescriptor;
    use crate::error::ModuleError;
    use crate::storage::{MemoryStorage, SystemInstaller};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(dir: &std::path::Path) -> BootSettings {
        BootSettings {
            work_dir: dir.join("work"),
            schema_version: 1,
            readiness_timeout: Some(Duration::from_secs(5)),
            identity: BootstrapIdentity {
                username: "Root".to_string(),
                password: "rootroot".to_string(),
            },
        }
    }

    fn orchestrator(
        dir: &std::path::Path,
        registry: ModuleRegistry,
        storage: Arc<MemoryStorage>,
    ) -> BootstrapOrchestrator {
        let installer = Arc::new(SystemInstaller::new(Arc::clone(&storage)));
        BootstrapOrchestrator::new(EventBus::new(), registry, storage, installer, settings(dir))
    }

    #[tokio::test]
    async fn empty_registry_reaches_ready_and_sets_marker() {
        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let storage = Arc::new(MemoryStorage::new());
        let boot = orchestrator(tmp.path(), ModuleRegistry::new(), Arc::clone(&storage));
        let stage = boot.stage();

        let Ok(outcome) = boot.run().await else {
            panic!("boot failed");
        };
        assert_eq!(outcome.report, BootReport::default());
        assert_eq!(*stage.borrow(), BootStage::Ready);
        assert!(matches!(
            storage::schema_version(storage.as_ref()).await,
            Ok(Some(1))
        ));
        assert!(tmp.path().join("work").join("tmp").is_dir());
    }

    #[tokio::test]
    async fn failing_module_is_recorded_and_siblings_still_load() {
        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let loads = Arc::new(AtomicUsize::new(0));
        let mut registry = ModuleRegistry::new();
        for name in ["a", "b", "c"] {
            let loads = Arc::clone(&loads);
            let fail = name == "b";
            let module = ModuleDescriptor::new(name, Phase::Lib, move |_| {
                let loads = Arc::clone(&loads);
                async move {
                    loads.fetch_add(1, Ordering::SeqCst);
                    if fail {
                        Err(ModuleError::new("syntax error"))
                    } else {
                        Ok(())
                    }
                }
            });
            assert!(registry.register_builtin(module).is_ok());
        }

        let boot = orchestrator(tmp.path(), registry, Arc::new(MemoryStorage::new()));
        let Ok(outcome) = boot.run().await else {
            panic!("boot failed");
        };
        assert_eq!(loads.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.report.fail, vec![FailRecord::new("b", "syntax error")]);
        assert_eq!(
            outcome.registry.status(Phase::Lib, "c"),
            Some(ModuleStatus::Loaded)
        );
    }

    #[tokio::test]
    async fn extensions_that_load_are_active() {
        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let mut registry = ModuleRegistry::new();
        let ok = ModuleDescriptor::new("ext_ok", Phase::Service, |_| async { Ok(()) });
        let bad = ModuleDescriptor::new("ext_bad", Phase::Service, |_| async {
            Err(ModuleError::new("boom"))
        });
        assert!(registry.register_extension(ok).is_ok());
        assert!(registry.register_extension(bad).is_ok());

        let boot = orchestrator(tmp.path(), registry, Arc::new(MemoryStorage::new()))
            .with_failures(vec![FailRecord::new("ghost", "extension not found")]);
        let Ok(outcome) = boot.run().await else {
            panic!("boot failed");
        };
        assert_eq!(outcome.report.active, vec!["ext_ok".to_string()]);
        let failed: Vec<&str> = outcome.report.fail.iter().map(|f| f.module.as_str()).collect();
        assert_eq!(failed, vec!["ghost", "ext_bad"]);
    }

    #[tokio::test]
    async fn multi_phase_extension_is_active_once() {
        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let mut registry = ModuleRegistry::new();
        for phase in [Phase::Model, Phase::Handler] {
            let part = ModuleDescriptor::new("scoreboard", phase, |_| async { Ok(()) });
            assert!(registry.register_extension(part).is_ok());
        }

        let boot = orchestrator(tmp.path(), registry, Arc::new(MemoryStorage::new()));
        let Ok(outcome) = boot.run().await else {
            panic!("boot failed");
        };
        assert_eq!(outcome.report.active, vec!["scoreboard".to_string()]);
        assert_eq!(
            outcome.registry.status(Phase::Handler, "scoreboard"),
            Some(ModuleStatus::Loaded)
        );
    }

    #[tokio::test]
    async fn index_failure_is_fatal() {
        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let mut registry = ModuleRegistry::new();
        let model = ModuleDescriptor::new("record", Phase::Model, |_| async { Ok(()) })
            .with_ensure_indexes(|_| async { Err(ModuleError::new("duplicate key")) });
        assert!(registry.register_builtin(model).is_ok());

        let storage = Arc::new(MemoryStorage::new());
        let boot = orchestrator(tmp.path(), registry, Arc::clone(&storage));
        let result = boot.run().await;
        assert!(matches!(result, Err(BootError::IndexMaintenance { .. })));
        assert!(matches!(
            storage::schema_version(storage.as_ref()).await,
            Ok(None)
        ));
    }

    #[tokio::test]
    async fn index_hook_of_failed_model_is_skipped() {
        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let mut registry = ModuleRegistry::new();
        let model = ModuleDescriptor::new("broken", Phase::Model, |_| async {
            Err(ModuleError::new("cannot load"))
        })
        .with_ensure_indexes(|_| async { Err(ModuleError::new("never runs")) });
        assert!(registry.register_builtin(model).is_ok());

        let boot = orchestrator(tmp.path(), registry, Arc::new(MemoryStorage::new()));
        let Ok(outcome) = boot.run().await else {
            panic!("boot should survive a failed model");
        };
        assert_eq!(outcome.report.fail.len(), 1);
    }

    #[tokio::test]
    async fn post_init_failure_does_not_stop_others() {
        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let ran = Arc::new(AtomicUsize::new(0));
        let mut registry = ModuleRegistry::new();
        let first = ModuleDescriptor::new("first", Phase::Service, |_| async { Ok(()) })
            .with_post_init(|_| async { Err(ModuleError::new("cache warmup failed")) });
        let counter = Arc::clone(&ran);
        let second = ModuleDescriptor::new("second", Phase::Service, |_| async { Ok(()) })
            .with_post_init(move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        assert!(registry.register_builtin(first).is_ok());
        assert!(registry.register_builtin(second).is_ok());

        let boot = orchestrator(tmp.path(), registry, Arc::new(MemoryStorage::new()));
        let Ok(outcome) = boot.run().await else {
            panic!("boot failed");
        };
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(outcome.report.fail.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_timeout_is_fatal() {
        struct Unreachable;

        #[async_trait::async_trait]
        impl Storage for Unreachable {
            fn name(&self) -> &'static str {
                "unreachable"
            }
            async fn connect(&self, _bus: &EventBus) -> Result<(), crate::error::StoreError> {
                Err(crate::error::StoreError::NotConnected)
            }
            async fn ensure_indexes(&self) -> Result<(), crate::error::StoreError> {
                Ok(())
            }
            async fn get(
                &self,
                _key: &str,
            ) -> Result<Option<serde_json::Value>, crate::error::StoreError> {
                Ok(None)
            }
            async fn set(
                &self,
                _key: &str,
                _value: serde_json::Value,
            ) -> Result<(), crate::error::StoreError> {
                Ok(())
            }
        }

        let Ok(tmp) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let storage: Arc<dyn Storage> = Arc::new(Unreachable);
        let installer = Arc::new(SystemInstaller::new(Arc::clone(&storage)));
        let boot = BootstrapOrchestrator::new(
            EventBus::new(),
            ModuleRegistry::new(),
            storage,
            installer,
            settings(tmp.path()),
        );
        let result = boot.run().await;
        assert!(matches!(result, Err(BootError::ReadinessTimeout(_))));
    }
}
