//! Shared plumbing for the end-to-end tests: a real listener on an
//! OS-assigned port, a scratch domains file, scripted plugins, and token
//! helpers.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::TokenGate;
use crate::config::{AuthConfig, ConfigFile};
use crate::domain::DomainEntry;
use crate::error::DehydratedApiError;
use crate::plugins::proto::DehydratedConfig;
use crate::plugins::value::{Value, ValueMap};
use crate::plugins::{MetadataSource, PluginRegistry};
use crate::registry::DomainRegistry;
use crate::watcher::DomainsFileWatcher;
use crate::web::{build_router, AppState};

pub const TEST_TENANT: &str = "11111111-2222-3333-4444-555555555555";
pub const TEST_AUDIENCE: &str = "api://dehydrated-test";

/// In-process plugin: answers `{"plugin": <name>}` or fails on demand.
pub struct StubPlugin {
    pub name: &'static str,
    pub fail: bool,
}

#[async_trait]
impl MetadataSource for StubPlugin {
    async fn initialize(
        &mut self,
        _config: &ValueMap,
        _dehydrated: &DehydratedConfig,
    ) -> Result<(), DehydratedApiError> {
        Ok(())
    }

    async fn get_metadata(
        &mut self,
        _entry: &DomainEntry,
        _dehydrated: &DehydratedConfig,
    ) -> Result<ValueMap, DehydratedApiError> {
        if self.fail {
            return Err(DehydratedApiError::Plugin {
                plugin: self.name.to_string(),
                message: "scripted failure".to_string(),
            });
        }
        Ok(ValueMap::from([(
            "plugin".to_string(),
            Value::from(self.name),
        )]))
    }

    async fn close(&mut self) -> Result<(), DehydratedApiError> {
        Ok(())
    }
}

pub fn stub_plugins(specs: &[(&'static str, bool)]) -> Vec<(String, Box<dyn MetadataSource>)> {
    specs
        .iter()
        .map(|&(name, fail)| {
            (
                name.to_string(),
                Box::new(StubPlugin { name, fail }) as Box<dyn MetadataSource>,
            )
        })
        .collect()
}

pub struct TestServer {
    pub base_url: String,
    pub dir: tempfile::TempDir,
    pub registry: Arc<DomainRegistry>,
    pub server: JoinHandle<()>,
    watcher: Option<DomainsFileWatcher>,
    reload_task: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn domains_path(&self) -> PathBuf {
        self.dir.path().join(crate::DOMAINS_FILENAME)
    }

    pub async fn stop(self) {
        if let Some(watcher) = &self.watcher {
            watcher.close().await;
        }
        if let Some(task) = self.reload_task {
            task.abort();
        }
        self.server.abort();
    }
}

/// Stand up the whole stack short of real plugin subprocesses.
pub async fn start_test_server(
    sources: Vec<(String, Box<dyn MetadataSource>)>,
    auth: Option<AuthConfig>,
    enable_watcher: bool,
) -> TestServer {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let path = dir.path().join(crate::DOMAINS_FILENAME);

    let plugins = Arc::new(PluginRegistry::with_sources(
        sources,
        DehydratedConfig::default(),
    ));
    let registry = Arc::new(
        DomainRegistry::new(path.clone(), plugins)
            .await
            .expect("failed to build registry"),
    );

    let (watcher, reload_task) = match enable_watcher {
        true => {
            let (reload_tx, mut reload_rx) = mpsc::channel(8);
            let watcher = DomainsFileWatcher::spawn(&path, reload_tx).expect("watcher failed");
            let reload_registry = registry.clone();
            let task = tokio::spawn(async move {
                while reload_rx.recv().await.is_some() {
                    let _ = reload_registry.reload().await;
                }
            });
            (Some(watcher), Some(task))
        }
        false => (None, None),
    };

    let token_gate =
        auth.map(|auth| Arc::new(TokenGate::new(&auth).expect("token gate build failed")));
    let state = AppState {
        registry: registry.clone(),
        config: Arc::new(ConfigFile::default()),
        token_gate,
    };

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let addr = listener.local_addr().expect("no local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, build_router(state)).await;
    });
    println!("Started test API server on {addr}");

    TestServer {
        base_url: format!("http://{addr}"),
        dir,
        registry,
        server,
        watcher,
        reload_task,
    }
}

/// Auth config pointing at nothing, signature checks off: the gate still
/// enforces every claim check.
pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        tenant_id: TEST_TENANT.to_string(),
        client_id: "dehydrated-test".to_string(),
        allowed_audiences: vec![TEST_AUDIENCE.to_string()],
        enable_signature_validation: false,
        ..Default::default()
    }
}

/// A claims-complete token the disabled-signature gate will accept.
pub fn test_token(exp_offset: i64, audience: &str, tenant: &str) -> String {
    let header = serde_json::json!({"alg": "RS256", "typ": "JWT", "kid": "test-key"});
    let claims = serde_json::json!({
        "sub": "tester@example.com",
        "exp": chrono::Utc::now().timestamp() + exp_offset,
        "aud": audience,
        "iss": format!("https://sts.windows.net/{tenant}/"),
    });
    format!(
        "{}.{}.c2ln",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}
