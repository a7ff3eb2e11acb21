//! Metadata plugins: out-of-process binaries that annotate domain entries.
//!
//! The registry owns every configured plugin for the life of the process.
//! Construction materializes each binary through the [cache::PluginCache],
//! spawns it with [client::PluginClient], and initializes it; after that the
//! only operations are enrichment and teardown.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ConfigFile;
use crate::domain::{check_valid_alias, DomainEntry};
use crate::error::DehydratedApiError;
use crate::plugins::cache::PluginCache;
use crate::plugins::client::PluginClient;
use crate::plugins::proto::DehydratedConfig;
use crate::plugins::value::ValueMap;

pub mod cache;
pub mod client;
pub mod proto;
pub mod value;

/// The capability the registry needs from a plugin: initialize once, answer
/// metadata calls, shut down. [client::PluginClient] is the real thing.
#[async_trait]
pub trait MetadataSource: Send {
    async fn initialize(
        &mut self,
        config: &ValueMap,
        dehydrated: &DehydratedConfig,
    ) -> Result<(), DehydratedApiError>;

    async fn get_metadata(
        &mut self,
        entry: &DomainEntry,
        dehydrated: &DehydratedConfig,
    ) -> Result<ValueMap, DehydratedApiError>;

    async fn close(&mut self) -> Result<(), DehydratedApiError>;
}

struct PluginHandle {
    name: String,
    /// The mutex serializes calls into one plugin; None once closed.
    source: Mutex<Option<Box<dyn MetadataSource>>>,
}

/// All active plugins, in registration order.
pub struct PluginRegistry {
    plugins: Vec<PluginHandle>,
    dehydrated: DehydratedConfig,
}

impl PluginRegistry {
    /// Materialize, spawn, and initialize every enabled plugin from the
    /// config. A plugin that fails validation, spawn, or initialize is
    /// dropped from the active set; the rest keep going.
    ///
    /// Registration order is the lexicographic order of plugin names, which
    /// keeps enrichment deterministic across runs.
    pub async fn build(
        config: &ConfigFile,
        cache: &PluginCache,
    ) -> Result<Self, DehydratedApiError> {
        let dehydrated = config.dehydrated();
        let mut plugins: Vec<PluginHandle> = Vec::new();

        for (name, plugin_config) in &config.plugins {
            if !plugin_config.enabled {
                debug!("Plugin {name} is disabled, skipping");
                continue;
            }
            check_valid_alias(name)
                .map_err(|_| DehydratedApiError::ConfigError(format!("invalid plugin name {name:?}")))?;
            let Some(registry) = &plugin_config.registry else {
                warn!("Plugin {name} has no registry configured, disabling it");
                continue;
            };

            let executable = match cache.add(name, registry).await {
                Ok(path) => path,
                Err(err) => {
                    warn!("Failed to materialize plugin {name}, disabling it: {err}");
                    continue;
                }
            };

            let mut client = match PluginClient::spawn(name, &executable).await {
                Ok(client) => client,
                Err(err) => {
                    warn!("Failed to start plugin {name}, disabling it: {err}");
                    continue;
                }
            };

            if let Err(err) = client.initialize(&plugin_config.config, &dehydrated).await {
                warn!("Plugin {name} failed to initialize, disabling it: {err}");
                if let Err(close_err) = client.close().await {
                    debug!("Cleanup of failed plugin {name}: {close_err}");
                }
                continue;
            }

            info!("Plugin {name} ready ({})", executable.display());
            plugins.push(PluginHandle {
                name: name.clone(),
                source: Mutex::new(Some(Box::new(client))),
            });
        }

        Ok(PluginRegistry { plugins, dehydrated })
    }

    /// A registry with injected sources, used by tests.
    pub fn with_sources(
        sources: Vec<(String, Box<dyn MetadataSource>)>,
        dehydrated: DehydratedConfig,
    ) -> Self {
        PluginRegistry {
            plugins: sources
                .into_iter()
                .map(|(name, source)| PluginHandle {
                    name,
                    source: Mutex::new(Some(source)),
                })
                .collect(),
            dehydrated,
        }
    }

    /// Names of the active plugins, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name.clone()).collect()
    }

    /// Walk the plugins in order and fill `entry.metadata`. A failing
    /// plugin leaves its slot absent; the entry always comes back.
    pub async fn enrich(&self, entry: &mut DomainEntry) {
        for handle in &self.plugins {
            let mut guard = handle.source.lock().await;
            let Some(source) = guard.as_mut() else {
                continue;
            };
            match source.get_metadata(entry, &self.dehydrated).await {
                Ok(metadata) => {
                    entry.metadata.insert(handle.name.clone(), metadata);
                }
                Err(err) => {
                    warn!(
                        plugin = handle.name.as_str(),
                        domain = entry.domain.as_str(),
                        "Metadata call failed: {err}"
                    );
                }
            }
        }
    }

    /// Close every plugin once, newest first, continuing past errors.
    /// Safe to call more than once.
    pub async fn close(&self) {
        for handle in self.plugins.iter().rev() {
            let mut guard = handle.source.lock().await;
            if let Some(mut source) = guard.take() {
                if let Err(err) = source.close().await {
                    warn!("Plugin {} close failed: {err}", handle.name);
                }
            }
        }
    }
}
