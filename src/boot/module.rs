//! Module descriptors: named units loaded during boot.
//!
//! A [`ModuleDescriptor`] bundles a name, a [`Phase`], a load hook and two
//! optional hooks (post-init, index maintenance). Hooks are typed closures
//! returning boxed futures, so a descriptor can be built from any async
//! function without dynamic dispatch by name.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::domain::EventBus;
use crate::error::ModuleError;

/// Boot phase. Phases load in declaration order; all modules of one phase
/// finish before the next phase starts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, utoipa::ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Shared libraries.
    Lib,
    /// Long-lived services.
    Service,
    /// Data models (may expose an index hook).
    Model,
    /// Request and connection handlers.
    Handler,
    /// Configuration providers, loaded after migration.
    Config,
}

impl Phase {
    /// All phases in load order.
    pub const ALL: [Self; 5] = [
        Self::Lib,
        Self::Service,
        Self::Model,
        Self::Handler,
        Self::Config,
    ];

    /// Lowercase phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lib => "lib",
            Self::Service => "service",
            Self::Model => "model",
            Self::Handler => "handler",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a module is compiled in or was enabled as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ModuleOrigin {
    /// Part of the built-in set.
    Builtin,
    /// Optional extension enabled at startup.
    Extension,
}

/// Handles passed to every hook.
#[derive(Debug, Clone)]
pub struct BootContext {
    /// The process event bus.
    pub bus: EventBus,
    /// Phase of the module whose hook is running.
    pub phase: Phase,
}

type Hook = Arc<dyn Fn(BootContext) -> BoxFuture<'static, Result<(), ModuleError>> + Send + Sync>;

fn hook<F, Fut>(f: F) -> Hook
where
    F: Fn(BootContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
{
    Arc::new(move |ctx| f(ctx).boxed())
}

/// A named unit of functionality registered for boot.
#[derive(Clone)]
pub struct ModuleDescriptor {
    name: String,
    phase: Phase,
    load: Hook,
    post_init: Option<Hook>,
    ensure_indexes: Option<Hook>,
}

impl ModuleDescriptor {
    /// Creates a descriptor with the given load hook.
    #[must_use]
    pub fn new<F, Fut>(name: impl Into<String>, phase: Phase, load: F) -> Self
    where
        F: Fn(BootContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            phase,
            load: hook(load),
            post_init: None,
            ensure_indexes: None,
        }
    }

    /// Adds a hook that runs once every phase has loaded and the schema is
    /// current. Its failure is logged and never aborts boot.
    #[must_use]
    pub fn with_post_init<F, Fut>(mut self, post_init: F) -> Self
    where
        F: Fn(BootContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
    {
        self.post_init = Some(hook(post_init));
        self
    }

    /// Adds an index-maintenance hook. Only honoured for [`Phase::Model`];
    /// its failure is fatal to boot.
    #[must_use]
    pub fn with_ensure_indexes<F, Fut>(mut self, ensure_indexes: F) -> Self
    where
        F: Fn(BootContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ModuleError>> + Send + 'static,
    {
        self.ensure_indexes = Some(hook(ensure_indexes));
        self
    }

    /// Module name, unique within its phase.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Boot phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Returns `true` if a post-init hook is set.
    #[must_use]
    pub fn has_post_init(&self) -> bool {
        self.post_init.is_some()
    }

    /// Returns `true` if an index hook is set.
    #[must_use]
    pub fn has_index_hook(&self) -> bool {
        self.ensure_indexes.is_some()
    }

    pub(crate) fn load(&self, bus: &EventBus) -> BoxFuture<'static, Result<(), ModuleError>> {
        guarded((self.load)(self.context(bus)))
    }

    pub(crate) fn post_init(
        &self,
        bus: &EventBus,
    ) -> Option<BoxFuture<'static, Result<(), ModuleError>>> {
        self.post_init
            .as_ref()
            .map(|f| guarded(f(self.context(bus))))
    }

    pub(crate) fn ensure_indexes(
        &self,
        bus: &EventBus,
    ) -> Option<BoxFuture<'static, Result<(), ModuleError>>> {
        self.ensure_indexes
            .as_ref()
            .map(|f| guarded(f(self.context(bus))))
    }

    fn context(&self, bus: &EventBus) -> BootContext {
        BootContext {
            bus: bus.clone(),
            phase: self.phase,
        }
    }
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("post_init", &self.has_post_init())
            .field("ensure_indexes", &self.has_index_hook())
            .finish()
    }
}

/// Turns a panic inside a hook into a [`ModuleError`].
fn guarded(
    fut: BoxFuture<'static, Result<(), ModuleError>>,
) -> BoxFuture<'static, Result<(), ModuleError>> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .map(|outcome| match outcome {
            Ok(result) => result,
            Err(panic) => Err(ModuleError::new(panic_message(panic.as_ref()))),
        })
        .boxed()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_string()
    }
}
