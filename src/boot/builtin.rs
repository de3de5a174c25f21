//! Built-in modules and the compiled-in extension catalog.

use std::sync::Arc;

use crate::config::OptionsFile;
use crate::domain::{EntityCache, Event, Listener, SubscriberId, Topic};
use crate::error::ModuleError;
use crate::storage::Storage;

use super::module::{ModuleDescriptor, Phase};
use super::registry::ExtensionCatalog;

/// Name of the handler module serving record connections. Its load status
/// gates the record WebSocket endpoints.
pub const RECORD_HANDLER: &str = "record";

/// Builds the built-in module set.
///
/// - `storage` (service): stamps `system.boot_at` after boot.
/// - `system` (model): maintains the storage driver's own tables.
/// - `record` (model): feeds `record_change` snapshots into `cache`.
/// - `record` (handler): enables the record connection endpoints.
/// - `options` (config): reports the options file in use.
#[must_use]
pub fn builtin_modules(
    storage: Arc<dyn Storage>,
    cache: Arc<EntityCache>,
    options: Option<OptionsFile>,
) -> Vec<ModuleDescriptor> {
    let storage_service = {
        let storage = Arc::clone(&storage);
        ModuleDescriptor::new("storage", Phase::Service, |_| async { Ok(()) }).with_post_init(
            move |_| {
                let storage = Arc::clone(&storage);
                async move {
                    storage
                        .set(
                            "system.boot_at",
                            serde_json::json!(chrono::Utc::now().to_rfc3339()),
                        )
                        .await?;
                    tracing::info!(driver = storage.name(), "storage service started");
                    Ok(())
                }
            },
        )
    };

    let system_model = {
        let storage = Arc::clone(&storage);
        ModuleDescriptor::new("system", Phase::Model, |_| async { Ok(()) }).with_ensure_indexes(
            move |_| {
                let storage = Arc::clone(&storage);
                async move { storage.ensure_indexes().await.map_err(ModuleError::from) }
            },
        )
    };

    let record_model = ModuleDescriptor::new(RECORD_HANDLER, Phase::Model, move |ctx| {
        let cache = Arc::clone(&cache);
        async move {
            cache.listen(&ctx.bus, Topic::record_change());
            tracing::debug!(cached = cache.len(), "record cache attached");
            Ok(())
        }
    });

    let record_handler = ModuleDescriptor::new(RECORD_HANDLER, Phase::Handler, |_| async {
        tracing::info!(routes = ?["/record-conn", "/record-detail-conn"], "record connections enabled");
        Ok(())
    });

    let options_config = ModuleDescriptor::new("options", Phase::Config, move |_| {
        let options = options.clone();
        async move {
            match options {
                Some(file) => {
                    tracing::info!(path = %file.path.display(), "options file loaded");
                }
                None => tracing::info!("no options file found, using environment only"),
            }
            Ok(())
        }
    });

    vec![
        storage_service,
        system_model,
        record_model,
        record_handler,
        options_config,
    ]
}

/// Extensions that can be enabled by name through `EXTENSIONS`.
///
/// - `audit` (lib): logs every record change with its id and group.
#[must_use]
pub fn extension_catalog() -> ExtensionCatalog {
    let mut catalog = ExtensionCatalog::new();
    catalog.register("audit", || {
        vec![ModuleDescriptor::new("audit", Phase::Lib, |ctx| async move {
            let listener: Listener = Arc::new(|event: &Event| {
                tracing::info!(
                    topic = %event.topic,
                    id = ?event.entity_id(),
                    group = ?event.entity_group(),
                    ids = ?event.ids(),
                    "record changed"
                );
                Ok(())
            });
            ctx.bus
                .subscribe(&[Topic::record_change()], SubscriberId::new(), &listener);
            Ok(())
        })]
    });
    catalog
}
