//! judge-gateway server entry point.
//!
//! Starts the HTTP server right away so `/health` reports boot progress,
//! then runs the boot sequence. A fatal boot error stops the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use judge_gateway::api;
use judge_gateway::app_state::AppState;
use judge_gateway::boot::{
    BootSettings, BootstrapOrchestrator, ModuleRegistry, builtin_modules, extension_catalog,
};
use judge_gateway::config::{GatewayConfig, LogFormat, StorageBackend};
use judge_gateway::domain::{EntityCache, EventBus, Topic};
use judge_gateway::storage::{MemoryStorage, PostgresStorage, Storage, SystemInstaller};
use judge_gateway::ws::{SessionHub, StandardPolicy};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config =
        GatewayConfig::from_env().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Initialize tracing
    init_tracing(config.log_format);
    tracing::info!(addr = %config.listen_addr, backend = ?config.storage_backend, "starting judge-gateway");

    // Build domain layer
    let bus = EventBus::new();
    let cache = Arc::new(EntityCache::new());
    let storage: Arc<dyn Storage> = match config.storage_backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Postgres => Arc::new(PostgresStorage::new(
            config.database_url.clone(),
            config.database_max_connections,
            config.database_connect_timeout,
        )),
    };

    // Populate the module registry
    let mut registry = ModuleRegistry::new();
    for module in builtin_modules(
        Arc::clone(&storage),
        Arc::clone(&cache),
        config.options_file.clone(),
    ) {
        registry
            .register_builtin(module)
            .context("registering built-in modules")?;
    }
    let missing = extension_catalog().install(&config.extensions, &mut registry);

    let installer = Arc::new(SystemInstaller::new(Arc::clone(&storage)));
    let orchestrator = BootstrapOrchestrator::new(
        bus.clone(),
        registry,
        storage,
        installer,
        BootSettings::from(&config),
    )
    .with_failures(missing);

    // Build application state
    if !config.hidden_groups.is_empty() {
        tracing::info!(groups = ?config.hidden_groups, "hidden groups configured");
    }
    let policy = StandardPolicy::new().with_hidden_groups(config.hidden_groups.iter().cloned());
    let sessions = SessionHub::new(
        bus.clone(),
        Arc::new(policy),
        cache,
        vec![Topic::record_change()],
        config.session_queue_capacity,
    );
    let app_state = AppState::new(bus, sessions, orchestrator.stage());

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(app_state.clone());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // Boot
    let outcome = orchestrator.run().await.context("boot failed")?;
    for fail in &outcome.report.fail {
        tracing::warn!(module = %fail.module, error = %fail.error, "module failed during boot");
    }
    app_state.complete(&outcome);

    server.await.context("server task panicked")??;
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
