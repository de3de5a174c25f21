//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OnceCell, watch};
use utoipa::ToSchema;

use crate::boot::{
    BootOutcome, BootReport, BootStage, ModuleInfo, ModuleStatus, Phase, RECORD_HANDLER,
};
use crate::domain::EventBus;
use crate::error::GatewayError;
use crate::ws::session::SessionHub;

/// What the HTTP layer keeps from a finished boot.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BootSummary {
    /// Fail list and active extensions.
    #[serde(flatten)]
    pub report: BootReport,
    /// Every registered module with its final status.
    pub modules: Vec<ModuleInfo>,
}

impl BootSummary {
    fn module_loaded(&self, phase: Phase, name: &str) -> bool {
        self.modules
            .iter()
            .any(|m| m.phase == phase && m.name == name && m.status == ModuleStatus::Loaded)
    }
}

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Process event bus.
    pub bus: EventBus,
    /// Opens connection sessions.
    pub sessions: SessionHub,
    stage: watch::Receiver<BootStage>,
    boot: Arc<OnceCell<BootSummary>>,
}

impl AppState {
    /// Creates state for a server that starts before boot completes.
    #[must_use]
    pub fn new(bus: EventBus, sessions: SessionHub, stage: watch::Receiver<BootStage>) -> Self {
        Self {
            bus,
            sessions,
            stage,
            boot: Arc::new(OnceCell::new()),
        }
    }

    /// Current boot stage.
    #[must_use]
    pub fn stage(&self) -> BootStage {
        *self.stage.borrow()
    }

    /// Records the boot outcome. Only the first call is kept.
    pub fn complete(&self, outcome: &BootOutcome) {
        let summary = BootSummary {
            report: outcome.report.clone(),
            modules: outcome.registry.modules(),
        };
        if self.boot.set(summary).is_err() {
            tracing::warn!("boot summary already recorded");
        }
    }

    /// The boot summary, once boot has finished.
    #[must_use]
    pub fn summary(&self) -> Option<&BootSummary> {
        self.boot.get()
    }

    /// Succeeds when boot finished and the record handler loaded.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotReady`] otherwise.
    pub fn ensure_sessions(&self) -> Result<(), GatewayError> {
        let summary = self
            .summary()
            .ok_or_else(|| GatewayError::NotReady(format!("boot stage {:?}", self.stage())))?;
        if summary.module_loaded(Phase::Handler, RECORD_HANDLER) {
            Ok(())
        } else {
            Err(GatewayError::NotReady(
                "record handler is not loaded".to_string(),
            ))
        }
    }
}
