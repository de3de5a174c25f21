//! Module registry and extension catalog.
//!
//! [`ModuleRegistry`] is the explicit, lifecycle-scoped table of modules
//! grouped by [`Phase`]. It is built before boot, mutated only by the
//! orchestrator while booting (load status), and read-only afterwards.
//!
//! [`ExtensionCatalog`] replaces load-by-name discovery: extensions are
//! compiled-in factories registered under a name, and only the names the
//! operator enables are instantiated into the registry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::module::{ModuleDescriptor, ModuleOrigin, Phase};
use super::orchestrator::FailRecord;
use crate::error::BootError;

/// Load status of a registered module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Not attempted yet.
    Pending,
    /// Load hook succeeded.
    Loaded,
    /// Load hook failed; recorded in the fail list.
    Failed,
}

#[derive(Debug, Clone)]
struct Entry {
    descriptor: ModuleDescriptor,
    origin: ModuleOrigin,
    status: ModuleStatus,
}

/// Summary of one registered module.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ModuleInfo {
    /// Module name.
    pub name: String,
    /// Boot phase.
    pub phase: Phase,
    /// Built-in or extension.
    pub origin: ModuleOrigin,
    /// Current load status.
    pub status: ModuleStatus,
}

/// Table of modules grouped by phase.
///
/// Within a phase, built-ins come before extensions, each in registration
/// order.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    phases: BTreeMap<Phase, Vec<Entry>>,
}

impl ModuleRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a compiled-in module.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::DuplicateModule`] if the phase already holds a
    /// module with the same name.
    pub fn register_builtin(&mut self, descriptor: ModuleDescriptor) -> Result<(), BootError> {
        self.insert(descriptor, ModuleOrigin::Builtin)
    }

    /// Registers an optional extension module.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::DuplicateModule`] if the phase already holds a
    /// module with the same name. Extensions cannot shadow built-ins.
    pub fn register_extension(&mut self, descriptor: ModuleDescriptor) -> Result<(), BootError> {
        self.insert(descriptor, ModuleOrigin::Extension)
    }

    fn insert(&mut self, descriptor: ModuleDescriptor, origin: ModuleOrigin) -> Result<(), BootError> {
        let phase = descriptor.phase();
        let entries = self.phases.entry(phase).or_default();
        if entries.iter().any(|e| e.descriptor.name() == descriptor.name()) {
            return Err(BootError::DuplicateModule {
                phase,
                name: descriptor.name().to_string(),
            });
        }
        let entry = Entry {
            descriptor,
            origin,
            status: ModuleStatus::Pending,
        };
        match origin {
            ModuleOrigin::Extension => entries.push(entry),
            ModuleOrigin::Builtin => {
                let at = entries
                    .iter()
                    .position(|e| e.origin == ModuleOrigin::Extension)
                    .unwrap_or(entries.len());
                entries.insert(at, entry);
            }
        }
        Ok(())
    }

    /// Descriptors of `phase` with their origin, in load order.
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = (&ModuleDescriptor, ModuleOrigin)> {
        self.phases
            .get(&phase)
            .into_iter()
            .flatten()
            .map(|e| (&e.descriptor, e.origin))
    }

    /// Successfully loaded descriptors across all phases, in phase order.
    pub fn loaded(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.phases
            .values()
            .flatten()
            .filter(|e| e.status == ModuleStatus::Loaded)
            .map(|e| &e.descriptor)
    }

    /// Load status of the named module.
    #[must_use]
    pub fn status(&self, phase: Phase, name: &str) -> Option<ModuleStatus> {
        self.phases
            .get(&phase)?
            .iter()
            .find(|e| e.descriptor.name() == name)
            .map(|e| e.status)
    }

    pub(crate) fn set_status(&mut self, phase: Phase, name: &str, status: ModuleStatus) {
        if let Some(entry) = self
            .phases
            .get_mut(&phase)
            .and_then(|entries| entries.iter_mut().find(|e| e.descriptor.name() == name))
        {
            entry.status = status;
        }
    }

    /// Summaries of every registered module, in load order.
    #[must_use]
    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.phases
            .values()
            .flatten()
            .map(|e| ModuleInfo {
                name: e.descriptor.name().to_string(),
                phase: e.descriptor.phase(),
                origin: e.origin,
                status: e.status,
            })
            .collect()
    }

    /// Total number of registered modules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.phases.values().map(Vec::len).sum()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type Factory = Arc<dyn Fn() -> Vec<ModuleDescriptor> + Send + Sync>;

/// Startup-time table mapping extension names to descriptor factories.
#[derive(Default, Clone)]
pub struct ExtensionCatalog {
    factories: HashMap<String, Factory>,
}

impl ExtensionCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes an extension available under `name`. The factory returns the
    /// descriptors the extension contributes (possibly across phases).
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Vec<ModuleDescriptor> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Returns `true` if an extension is available under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Instantiates each enabled extension into `registry`.
    ///
    /// Unknown names and descriptors rejected by the registry do not stop
    /// the remaining extensions; they are returned as fail records.
    pub fn install(&self, enabled: &[String], registry: &mut ModuleRegistry) -> Vec<FailRecord> {
        let mut fail = Vec::new();
        for name in enabled {
            let Some(factory) = self.factories.get(name) else {
                tracing::warn!(extension = %name, "extension not found in catalog");
                fail.push(FailRecord::new(name, "extension not found"));
                continue;
            };
            for descriptor in factory() {
                let module = descriptor.name().to_string();
                if let Err(err) = registry.register_extension(descriptor) {
                    tracing::warn!(extension = %name, module = %module, error = %err, "extension rejected");
                    fail.push(FailRecord::new(module, err.to_string()));
                }
            }
        }
        fail
    }
}

impl fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ExtensionCatalog")
            .field("extensions", &names)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn module(name: &str, phase: Phase) -> ModuleDescriptor {
        ModuleDescriptor::new(name, phase, |_| async { Ok(()) })
    }

    fn names(registry: &ModuleRegistry, phase: Phase) -> Vec<String> {
        registry
            .phase(phase)
            .map(|(d, _)| d.name().to_string())
            .collect()
    }

    #[test]
    fn builtins_precede_extensions() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.register_extension(module("ext", Phase::Lib)).is_ok());
        assert!(registry.register_builtin(module("core_a", Phase::Lib)).is_ok());
        assert!(registry.register_builtin(module("core_b", Phase::Lib)).is_ok());

        assert_eq!(names(&registry, Phase::Lib), vec!["core_a", "core_b", "ext"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn duplicate_name_in_phase_is_rejected() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.register_builtin(module("record", Phase::Model)).is_ok());
        let result = registry.register_extension(module("record", Phase::Model));
        assert!(matches!(result, Err(BootError::DuplicateModule { .. })));
        assert!(registry.register_builtin(module("record", Phase::Handler)).is_ok());
    }

    #[test]
    fn status_tracks_loads() {
        let mut registry = ModuleRegistry::new();
        assert!(registry.register_builtin(module("a", Phase::Service)).is_ok());
        assert!(registry.register_builtin(module("b", Phase::Service)).is_ok());
        assert_eq!(registry.status(Phase::Service, "a"), Some(ModuleStatus::Pending));

        registry.set_status(Phase::Service, "a", ModuleStatus::Loaded);
        registry.set_status(Phase::Service, "b", ModuleStatus::Failed);

        let loaded: Vec<&str> = registry.loaded().map(ModuleDescriptor::name).collect();
        assert_eq!(loaded, vec!["a"]);
        assert_eq!(registry.status(Phase::Lib, "a"), None);
    }

    #[test]
    fn catalog_installs_enabled_and_reports_unknown() {
        let mut catalog = ExtensionCatalog::new();
        catalog.register("scoreboard", || {
            vec![
                ModuleDescriptor::new("scoreboard", Phase::Model, |_| async { Ok(()) }),
                ModuleDescriptor::new("scoreboard", Phase::Handler, |_| async { Ok(()) }),
            ]
        });
        catalog.register("unused", || vec![module("unused", Phase::Lib)]);

        let mut registry = ModuleRegistry::new();
        let fail = catalog.install(
            &["scoreboard".to_string(), "missing".to_string()],
            &mut registry,
        );

        assert_eq!(registry.len(), 2);
        assert!(registry.status(Phase::Lib, "unused").is_none());
        assert_eq!(fail.len(), 1);
        assert_eq!(fail.first().map(|f| f.module.as_str()), Some("missing"));
    }

    #[test]
    fn catalog_reports_extension_shadowing_builtin() {
        let mut catalog = ExtensionCatalog::new();
        catalog.register("evil", || vec![module("storage", Phase::Service)]);

        let mut registry = ModuleRegistry::new();
        assert!(registry.register_builtin(module("storage", Phase::Service)).is_ok());
        let fail = catalog.install(&["evil".to_string()], &mut registry);

        assert_eq!(fail.len(), 1);
        assert_eq!(registry.len(), 1);
        assert!(catalog.contains("evil"));
    }
}
