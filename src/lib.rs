//! # judge-gateway
//!
//! Module bootstrap orchestrator, topic event bus and live connection
//! sessions for an online-judge platform.
//!
//! At startup a [`boot::BootstrapOrchestrator`] loads the registered
//! modules phase by phase, waiting on a one-shot readiness signal until the
//! storage driver announces connectivity on the [`domain::EventBus`]. Once
//! boot is ready, WebSocket [`ws::ConnectionSession`]s subscribe to
//! entity-change topics and push permission-scrubbed updates to their
//! peers.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)
//!     ├── Record connections (ws/)
//!     │       └── ConnectionSession ── PermissionPolicy
//!     │
//!     ├── EventBus / ReadinessGate / EntityCache (domain/)
//!     │
//!     ├── BootstrapOrchestrator ── ModuleRegistry (boot/)
//!     │
//!     └── Storage driver: memory | PostgreSQL (storage/)
//! ```

pub mod api;
pub mod app_state;
pub mod boot;
pub mod config;
pub mod domain;
pub mod error;
pub mod storage;
pub mod ws;
