//! Builds the whole serving process in the required order and tears it
//! down in reverse: config is already loaded when we get here, then token
//! gate, plugin cache, plugins, domain registry, watcher, listener.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::auth::TokenGate;
use crate::config::ConfigFile;
use crate::error::DehydratedApiError;
use crate::plugins::cache::PluginCache;
use crate::plugins::PluginRegistry;
use crate::registry::DomainRegistry;
use crate::watcher::DomainsFileWatcher;
use crate::web::{build_router, AppState};
use crate::PLUGIN_CACHE_DIR;

/// Run the server until a shutdown signal arrives. Startup failures come
/// back as errors; the caller turns them into a non-zero exit.
pub async fn run(config: ConfigFile) -> Result<(), DehydratedApiError> {
    let token_gate = match &config.auth {
        Some(auth) => Some(Arc::new(TokenGate::new(auth)?)),
        None => {
            info!("No auth configured, the API is open");
            None
        }
    };

    let cache_root = std::env::current_dir()?.join(PLUGIN_CACHE_DIR);
    let cache = PluginCache::new(cache_root)?;
    let plugins = Arc::new(PluginRegistry::build(&config, &cache).await?);
    if !plugins.names().is_empty() {
        info!("Active plugins: {}", plugins.names().join(", "));
    }

    let registry = Arc::new(DomainRegistry::new(config.domains_file_path(), plugins.clone()).await?);

    let (reload_tx, mut reload_rx) = mpsc::channel::<()>(8);
    let watcher = match config.enable_watcher {
        true => Some(DomainsFileWatcher::spawn(
            &config.domains_file_path(),
            reload_tx,
        )?),
        false => None,
    };
    let reload_task = {
        let registry = registry.clone();
        tokio::spawn(async move {
            while reload_rx.recv().await.is_some() {
                if let Err(err) = registry.reload().await {
                    error!("Reload after external edit failed: {err}");
                }
            }
        })
    };

    let addr = config.api_listener_address();
    let state = AppState {
        registry,
        config: Arc::new(config),
        token_gate,
    };
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await.map_err(|err| {
        DehydratedApiError::StartupError(format!("failed to bind {addr}: {err}"))
    })?;
    info!("Started API server on http://{addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| DehydratedApiError::Generic(format!("server error: {err}")))?;

    info!("Shutting down");
    if let Some(watcher) = watcher {
        watcher.close().await;
    }
    reload_task.abort();
    plugins.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {err:?}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!("Failed to listen for SIGTERM: {err:?}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
