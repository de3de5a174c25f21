//! End-to-end boot sequence over the built-in module set.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use judge_gateway::boot::{
    BootSettings, BootStage, BootstrapOrchestrator, ModuleDescriptor, ModuleRegistry,
    ModuleStatus, Phase, RECORD_HANDLER, builtin_modules, extension_catalog,
};
use judge_gateway::domain::{EntityCache, Event, EventBus, Topic};
use judge_gateway::error::{BootError, ModuleError};
use judge_gateway::storage::{
    BootstrapIdentity, Installer, MemoryStorage, SCHEMA_VERSION_KEY, Storage, SystemInstaller,
};

#[derive(Debug, Default)]
struct CountingInstaller {
    calls: AtomicUsize,
}

#[async_trait]
impl Installer for CountingInstaller {
    async fn install(&self, _identity: &BootstrapIdentity, _version: u32) -> Result<(), ModuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug)]
struct FailingInstaller;

#[async_trait]
impl Installer for FailingInstaller {
    async fn install(&self, _identity: &BootstrapIdentity, _version: u32) -> Result<(), ModuleError> {
        Err(ModuleError::new("disk full"))
    }
}

fn settings(dir: &std::path::Path) -> BootSettings {
    BootSettings {
        work_dir: dir.join("work"),
        schema_version: 3,
        readiness_timeout: Some(Duration::from_secs(5)),
        identity: BootstrapIdentity {
            username: "Root".to_string(),
            password: "rootroot".to_string(),
        },
    }
}

fn registry_with_builtins(storage: &Arc<MemoryStorage>, cache: &Arc<EntityCache>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    let storage: Arc<dyn Storage> = Arc::clone(storage) as Arc<dyn Storage>;
    for module in builtin_modules(storage, Arc::clone(cache), None) {
        assert!(registry.register_builtin(module).is_ok());
    }
    registry
}

#[tokio::test]
async fn full_boot_loads_builtins_and_extensions() {
    let Ok(tmp) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let bus = EventBus::new();
    let storage = Arc::new(MemoryStorage::new());
    let cache = Arc::new(EntityCache::new());
    let mut registry = registry_with_builtins(&storage, &cache);
    let missing = extension_catalog().install(
        &["audit".to_string(), "scoreboard".to_string()],
        &mut registry,
    );
    assert_eq!(missing.len(), 1);

    let installer = Arc::new(SystemInstaller::new(Arc::clone(&storage)));
    let boot = BootstrapOrchestrator::new(
        bus.clone(),
        registry,
        Arc::clone(&storage) as Arc<dyn Storage>,
        installer,
        settings(tmp.path()),
    )
    .with_failures(missing);
    let stage = boot.stage();

    let Ok(outcome) = boot.run().await else {
        panic!("boot failed");
    };
    assert_eq!(*stage.borrow(), BootStage::Ready);
    assert_eq!(outcome.report.active, vec!["audit".to_string()]);
    let failed: Vec<&str> = outcome.report.fail.iter().map(|f| f.module.as_str()).collect();
    assert_eq!(failed, vec!["scoreboard"]);
    assert_eq!(
        outcome.registry.status(Phase::Handler, RECORD_HANDLER),
        Some(ModuleStatus::Loaded)
    );

    assert!(matches!(storage.get(SCHEMA_VERSION_KEY).await, Ok(Some(v)) if v == json!(3)));
    assert!(matches!(storage.get("system.boot_at").await, Ok(Some(_))));
    let Ok(Some(root)) = storage.get("user.root").await else {
        panic!("root user missing");
    };
    assert_eq!(root["uname"], "Root");
    assert!(root.get("password").is_none());

    // Cache and audit listener are both attached to the record topic.
    assert_eq!(bus.subscriber_count(&Topic::record_change()), 2);
    bus.emit(&Event::changed(Topic::record_change(), json!({ "id": "r1" })));
    assert!(cache.get("r1").is_some());
}

#[tokio::test]
async fn current_marker_skips_installer() {
    let Ok(tmp) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let storage = Arc::new(MemoryStorage::with_values([(
        SCHEMA_VERSION_KEY.to_string(),
        json!(3),
    )]));
    let installer = Arc::new(CountingInstaller::default());

    for _ in 0..2 {
        let boot = BootstrapOrchestrator::new(
            EventBus::new(),
            ModuleRegistry::new(),
            Arc::clone(&storage) as Arc<dyn Storage>,
            Arc::clone(&installer) as Arc<dyn Installer>,
            settings(tmp.path()),
        );
        assert!(boot.run().await.is_ok());
    }
    assert_eq!(installer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_marker_runs_installer_once_then_stays_current() {
    let Ok(tmp) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let storage = Arc::new(MemoryStorage::with_values([(
        SCHEMA_VERSION_KEY.to_string(),
        json!(2),
    )]));
    let installer = Arc::new(CountingInstaller::default());

    for _ in 0..2 {
        let boot = BootstrapOrchestrator::new(
            EventBus::new(),
            ModuleRegistry::new(),
            Arc::clone(&storage) as Arc<dyn Storage>,
            Arc::clone(&installer) as Arc<dyn Installer>,
            settings(tmp.path()),
        );
        assert!(boot.run().await.is_ok());
    }
    assert_eq!(installer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn migration_failure_stops_boot_before_config() {
    let Ok(tmp) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let config_loaded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&config_loaded);
    let mut registry = ModuleRegistry::new();
    let config = ModuleDescriptor::new("options", Phase::Config, move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    assert!(registry.register_builtin(config).is_ok());

    let boot = BootstrapOrchestrator::new(
        EventBus::new(),
        registry,
        Arc::new(MemoryStorage::new()),
        Arc::new(FailingInstaller),
        settings(tmp.path()),
    );
    let stage = boot.stage();
    let result = boot.run().await;
    assert!(matches!(result, Err(BootError::Migration { version: 3, .. })));
    assert_eq!(*stage.borrow(), BootStage::MigrateSchema);
    assert_eq!(config_loaded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn repeated_readiness_signal_is_harmless() {
    let Ok(tmp) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let bus = EventBus::new();
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let mut registry = ModuleRegistry::new();
    let lib = ModuleDescriptor::new("lib", Phase::Lib, move |_| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    });
    assert!(registry.register_builtin(lib).is_ok());

    let storage = Arc::new(MemoryStorage::new());
    let boot = BootstrapOrchestrator::new(
        bus.clone(),
        registry,
        Arc::clone(&storage) as Arc<dyn Storage>,
        Arc::new(SystemInstaller::new(Arc::clone(&storage))),
        settings(tmp.path()),
    );
    let gate = boot.readiness();
    assert!(boot.run().await.is_ok());

    assert!(gate.is_fired());
    assert!(!gate.fire());
    assert_eq!(bus.publish(Topic::database_connected(), json!({})), 0);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}
