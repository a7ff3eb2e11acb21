//! Watches the domains file for edits made behind the registry's back.
//!
//! The watch is established on the parent directory rather than the file
//! itself: editors and the ACME tooling replace the file by rename, which
//! changes the inode, and a directory watch survives that. Bursts of events
//! are coalesced into a single reload message.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::DehydratedApiError;
use crate::WATCH_DEBOUNCE_MS;

/// Poll interval for the fallback watcher
const POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct DomainsFileWatcher {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DomainsFileWatcher {
    /// Start watching `path`, sending one message per (debounced) change on
    /// `reload_tx`. Fails when neither the native notification facility nor
    /// the polling fallback can be established.
    pub fn spawn(
        path: &Path,
        reload_tx: mpsc::Sender<()>,
    ) -> Result<DomainsFileWatcher, DehydratedApiError> {
        let watch_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_name = path
            .file_name()
            .ok_or_else(|| {
                DehydratedApiError::Watcher(format!("{} has no file name", path.display()))
            })?
            .to_os_string();

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let handler = move |result: notify::Result<Event>| {
            let _ = raw_tx.send(result);
        };

        let watcher: Box<dyn Watcher + Send> = match RecommendedWatcher::new(
            handler.clone(),
            notify::Config::default(),
        )
        .and_then(|mut watcher| {
            watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
            Ok(watcher)
        }) {
            Ok(watcher) => Box::new(watcher),
            Err(err) => {
                warn!(
                    "Native file notifications unavailable ({err}), falling back to polling every {POLL_INTERVAL:?}"
                );
                let mut poller = PollWatcher::new(
                    handler,
                    notify::Config::default().with_poll_interval(POLL_INTERVAL),
                )?;
                poller.watch(&watch_dir, RecursiveMode::NonRecursive)?;
                Box::new(poller)
            }
        };
        debug!("Watching {} for changes", path.display());

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(watcher, raw_rx, reload_tx, file_name, shutdown_rx));
        Ok(DomainsFileWatcher { shutdown, handle })
    }

    /// Stop watching. Idempotent; no reloads fire after this returns.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        // the task only ends on shutdown, so this can't hang
        while !self.handle.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn run(
    // owns the watcher so the OS watch lives exactly as long as this task
    _watcher: Box<dyn Watcher + Send>,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    reload_tx: mpsc::Sender<()>,
    file_name: std::ffi::OsString,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let debounce = Duration::from_millis(WATCH_DEBOUNCE_MS);
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            maybe = raw_rx.recv() => {
                let Some(result) = maybe else { break };
                if !is_relevant(&result, &file_name) {
                    continue;
                }
                trace!("Domains file changed, starting debounce window");
                let deadline = tokio::time::sleep(debounce);
                tokio::pin!(deadline);
                let mut open = true;
                while open {
                    tokio::select! {
                        () = &mut deadline => open = false,
                        _ = shutdown_rx.changed() => return,
                        more = raw_rx.recv() => {
                            if more.is_none() {
                                open = false;
                            }
                        }
                    }
                }
                if reload_tx.send(()).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("File watcher stopped");
}

fn is_relevant(result: &notify::Result<Event>, file_name: &std::ffi::OsStr) -> bool {
    match result {
        Ok(event) => {
            if !(event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove()) {
                return false;
            }
            event
                .paths
                .iter()
                .any(|path| path.file_name() == Some(file_name))
        }
        Err(err) => {
            warn!("File watcher backend error: {err:?}");
            false
        }
    }
}
