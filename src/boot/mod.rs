//! Module bootstrap: descriptors, registry and the staged boot sequence.
//!
//! A [`ModuleRegistry`] is populated with built-in modules
//! ([`builtin_modules`]) and the extensions enabled through an
//! [`ExtensionCatalog`], then handed to a [`BootstrapOrchestrator`] which
//! loads everything in dependency order and returns a [`BootReport`].

pub mod builtin;
pub mod module;
pub mod orchestrator;
pub mod registry;
pub mod workdir;

pub use builtin::{RECORD_HANDLER, builtin_modules, extension_catalog};
pub use module::{BootContext, ModuleDescriptor, ModuleOrigin, Phase};
pub use orchestrator::{
    BootOutcome, BootReport, BootSettings, BootStage, BootstrapOrchestrator, FailRecord,
};
pub use registry::{ExtensionCatalog, ModuleInfo, ModuleRegistry, ModuleStatus};
