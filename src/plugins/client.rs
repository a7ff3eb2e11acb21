//! Spawns a plugin binary and speaks the RPC described in [super::proto].
//!
//! The client owns its subprocess for its whole life: spawn, handshake over
//! a socket in a private temp directory, serve calls one at a time, then
//! tear the whole thing down again no matter which step failed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, warn};

use crate::error::DehydratedApiError;
use crate::plugins::proto::{
    DehydratedConfig, PluginRequest, PluginResponse, PLUGIN_SOCKET_ENV,
};
use crate::plugins::value::ValueMap;
use crate::plugins::MetadataSource;

/// How long the plugin gets to bring up its socket
const SOCKET_WAIT: Duration = Duration::from_secs(5);
/// Poll interval while waiting for the socket to appear
const SOCKET_POLL: Duration = Duration::from_millis(50);
/// Upper bound on any single RPC round trip
const RPC_TIMEOUT: Duration = Duration::from_secs(30);
/// Longest response line we'll accept from a plugin
const MAX_FRAME: usize = 8 * 1024 * 1024;

type Connection = Framed<UnixStream, LinesCodec>;

#[derive(Debug)]
pub struct PluginClient {
    name: String,
    child: Child,
    conn: Option<Connection>,
    /// Holds the socket; removed on drop, even if teardown half-failed
    #[allow(dead_code)]
    workdir: TempDir,
}

impl PluginClient {
    /// Spawn the plugin binary and wait for it to open its socket.
    pub async fn spawn(name: &str, executable: &Path) -> Result<Self, DehydratedApiError> {
        let workdir = tempfile::Builder::new()
            .prefix("dehydrated-api-plugin-")
            .tempdir()
            .map_err(|err| plugin_error(name, format!("failed to create work dir: {err}")))?;
        let socket_path = workdir.path().join("plugin.sock");

        debug!(
            "Spawning plugin {name} from {} with socket {}",
            executable.display(),
            socket_path.display()
        );
        let mut child = Command::new(executable)
            .env(PLUGIN_SOCKET_ENV, &socket_path)
            .current_dir(workdir.path())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| plugin_error(name, format!("failed to spawn: {err}")))?;

        if let Err(err) = wait_for_socket(&socket_path, &mut child).await {
            // don't leave an orphan behind when the handshake never happened
            if let Err(kill_err) = child.kill().await {
                warn!("Failed to kill plugin {name} after handshake failure: {kill_err:?}");
            }
            return Err(plugin_error(name, err));
        }

        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|err| plugin_error(name, format!("failed to connect socket: {err}")))?;
        let conn = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME));

        Ok(PluginClient {
            name: name.to_string(),
            child,
            conn: Some(conn),
            workdir,
        })
    }

    async fn call(&mut self, request: &PluginRequest) -> Result<PluginResponse, DehydratedApiError> {
        let name = self.name.clone();
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| plugin_error(&name, "connection already closed".to_string()))?;
        let line = serde_json::to_string(request)?;

        timeout(RPC_TIMEOUT, async {
            conn.send(line)
                .await
                .map_err(|err| plugin_error(&name, format!("send failed: {err}")))?;
            match conn.next().await {
                Some(Ok(response)) => serde_json::from_str(&response)
                    .map_err(|err| plugin_error(&name, format!("bad response: {err}"))),
                Some(Err(err)) => Err(plugin_error(&name, format!("read failed: {err}"))),
                None => Err(plugin_error(&name, "plugin closed the socket".to_string())),
            }
        })
        .await
        .map_err(|_| plugin_error(&name, "call timed out".to_string()))?
    }

    async fn expect_ok(&mut self, request: &PluginRequest) -> Result<Option<ValueMap>, DehydratedApiError> {
        match self.call(request).await? {
            PluginResponse::Ok { metadata } => Ok(metadata),
            PluginResponse::Error { message } => Err(plugin_error(&self.name, message)),
        }
    }
}

#[async_trait::async_trait]
impl MetadataSource for PluginClient {
    async fn initialize(
        &mut self,
        config: &ValueMap,
        dehydrated: &DehydratedConfig,
    ) -> Result<(), DehydratedApiError> {
        self.expect_ok(&PluginRequest::Initialize {
            config: config.clone(),
            dehydrated: dehydrated.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn get_metadata(
        &mut self,
        entry: &crate::domain::DomainEntry,
        dehydrated: &DehydratedConfig,
    ) -> Result<ValueMap, DehydratedApiError> {
        let metadata = self
            .expect_ok(&PluginRequest::GetMetadata {
                entry: entry.clone(),
                dehydrated: dehydrated.clone(),
            })
            .await?;
        Ok(metadata.unwrap_or_default())
    }

    /// Three-step teardown: polite RPC close, then the socket, then the
    /// process. Every step runs even when an earlier one failed; the temp
    /// directory goes away with the client either way.
    async fn close(&mut self) -> Result<(), DehydratedApiError> {
        let mut errors: Vec<String> = Vec::new();

        if self.conn.is_some() {
            if let Err(err) = self.call(&PluginRequest::Close).await {
                errors.push(format!("close rpc: {err}"));
            }
        }

        if let Some(conn) = self.conn.take() {
            let mut stream = conn.into_inner();
            if let Err(err) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
                errors.push(format!("socket shutdown: {err}"));
            }
        }

        match self.child.kill().await {
            Ok(()) => {
                if let Err(err) = self.child.wait().await {
                    errors.push(format!("wait: {err}"));
                }
            }
            Err(err) => errors.push(format!("kill: {err}")),
        }

        match errors.is_empty() {
            true => Ok(()),
            false => Err(plugin_error(&self.name, errors.join("; "))),
        }
    }
}

fn plugin_error(name: &str, message: String) -> DehydratedApiError {
    DehydratedApiError::Plugin {
        plugin: name.to_string(),
        message,
    }
}

async fn wait_for_socket(socket_path: &PathBuf, child: &mut Child) -> Result<(), String> {
    let deadline = Instant::now() + SOCKET_WAIT;
    loop {
        if socket_path.exists() {
            return Ok(());
        }
        // a plugin that died will never create the socket
        if let Ok(Some(status)) = child.try_wait() {
            return Err(format!("exited during handshake with {status}"));
        }
        if Instant::now() >= deadline {
            return Err(format!(
                "socket {} did not appear within {SOCKET_WAIT:?}",
                socket_path.display()
            ));
        }
        sleep(SOCKET_POLL).await;
    }
}
