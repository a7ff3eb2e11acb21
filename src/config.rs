use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::check_valid_alias;
use crate::error::DehydratedApiError;
use crate::plugins::cache::PluginRegistrySource;
use crate::plugins::proto::DehydratedConfig;
use crate::plugins::value::ValueMap;
use crate::DOMAINS_FILENAME;

/// Default config path when the CLI doesn't give one
pub const DEFAULT_CONFIG_FILE: &str = "dehydrated-api.yaml";

#[derive(Debug, Deserialize, PartialEq, Clone, Serialize)]
#[serde(rename_all = "camelCase", default)]
/// The main config blob, loaded from a YAML file. Every field has a
/// default so a minimal deployment can run with an empty file.
pub struct ConfigFile {
    /// API listener port, default is 8080
    pub port: u16,
    /// Where dehydrated keeps its state; the domains file lives here
    pub dehydrated_base_dir: String,
    /// dehydrated's own config file, passed through to plugins
    pub dehydrated_config_file: String,
    /// Reload the registry when something else edits the domains file
    pub enable_watcher: bool,
    pub logging: LoggingConfig,
    /// Bearer-token authentication; absent means the API is open
    pub auth: Option<AuthConfig>,
    /// Plugin bindings by name
    pub plugins: BTreeMap<String, PluginConfig>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        ConfigFile {
            port: 8080,
            dehydrated_base_dir: ".".to_string(),
            dehydrated_config_file: "config".to_string(),
            enable_watcher: true,
            logging: LoggingConfig::default(),
            auth: None,
            plugins: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// Default is "info"
    pub level: String,
    /// "console" or "json"
    pub encoding: String,
    /// "stdout", "stderr", or a file path
    pub output_path: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            encoding: "console".to_string(),
            output_path: "stdout".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// The identity provider tenant the tokens must come from
    pub tenant_id: String,
    /// Our application's client id at the provider
    pub client_id: String,
    /// Base URL the JWKS document is fetched under
    pub authority: Url,
    /// `aud` must be one of these
    pub allowed_audiences: Vec<String>,
    /// Turning this off skips signature checks; only for test rigs
    pub enable_signature_validation: bool,
    /// Seconds a fetched signing key stays fresh
    pub key_cache_ttl: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        let authority = match Url::parse("https://login.microsoftonline.com") {
            Ok(val) => val,
            Err(err) => panic!("static authority URL failed to parse: {err:?}"),
        };
        AuthConfig {
            tenant_id: String::new(),
            client_id: String::new(),
            authority,
            allowed_audiences: Vec::new(),
            enable_signature_validation: true,
            key_cache_ttl: 86400,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfig {
    pub enabled: bool,
    pub registry: Option<PluginRegistrySource>,
    /// Forwarded verbatim to the plugin's Initialize call
    pub config: ValueMap,
}

impl Default for PluginConfig {
    fn default() -> Self {
        PluginConfig {
            enabled: true,
            registry: None,
            config: ValueMap::new(),
        }
    }
}

impl ConfigFile {
    /// Load config from a YAML file. With no explicit path the default
    /// location is used and may be absent, leaving everything defaulted.
    pub fn try_from_file(filename: Option<&str>) -> Result<ConfigFile, DehydratedApiError> {
        let (path, required) = match filename {
            Some(path) => (path, true),
            None => (DEFAULT_CONFIG_FILE, false),
        };
        let expanded = shellexpand::tilde(path).to_string();
        let content = match std::fs::read_to_string(&expanded) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                return Ok(ConfigFile::default());
            }
            Err(err) => {
                return Err(DehydratedApiError::ConfigError(format!("{expanded}: {err}")));
            }
        };
        Self::try_from_yaml(&content)
            .map_err(|err| DehydratedApiError::ConfigError(format!("{expanded}: {err}")))
    }

    fn try_from_yaml(content: &str) -> Result<ConfigFile, serde_yaml::Error> {
        // an empty document is a valid "all defaults" config
        match content.trim().is_empty() {
            true => Ok(ConfigFile::default()),
            false => serde_yaml::from_str(content),
        }
    }

    /// Collect everything wrong with this config rather than bailing on
    /// the first problem, so the operator gets one complete report.
    pub fn check_config(&self) -> Result<(), Vec<String>> {
        let mut errors: Vec<String> = vec![];

        if self.port == 0 {
            errors.push("port must be between 1 and 65535".to_string());
        }
        if !self.base_dir().is_dir() {
            errors.push(format!(
                "dehydratedBaseDir {:?} is not a directory",
                self.dehydrated_base_dir
            ));
        }
        match self.logging.encoding.as_str() {
            "console" | "json" => {}
            other => errors.push(format!("logging.encoding {other:?} is not console or json")),
        }

        if let Some(auth) = &self.auth {
            if auth.tenant_id.is_empty() {
                errors.push("auth.tenantId must be set".to_string());
            }
            if auth.allowed_audiences.is_empty() {
                errors.push("auth.allowedAudiences must not be empty".to_string());
            }
            if auth.key_cache_ttl == 0 {
                errors.push("auth.keyCacheTTL must be at least one second".to_string());
            }
        }

        for (name, plugin) in &self.plugins {
            if check_valid_alias(name).is_err() {
                errors.push(format!("plugin name {name:?} is not a valid identifier"));
            }
            if plugin.enabled && plugin.registry.is_none() {
                errors.push(format!("plugin {name:?} is enabled but has no registry"));
            }
        }

        match errors.is_empty() {
            true => Ok(()),
            false => Err(errors),
        }
    }

    /// get a bindable address for the API listener
    pub fn api_listener_address(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn base_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dehydrated_base_dir).to_string())
    }

    /// The domains file always sits in the base directory.
    pub fn domains_file_path(&self) -> PathBuf {
        self.base_dir().join(DOMAINS_FILENAME)
    }

    pub fn dehydrated_config_path(&self) -> PathBuf {
        let configured = PathBuf::from(shellexpand::tilde(&self.dehydrated_config_file).to_string());
        match configured.is_absolute() {
            true => configured,
            false => self.base_dir().join(configured),
        }
    }

    /// The host-side record forwarded verbatim to plugins.
    pub fn dehydrated(&self) -> DehydratedConfig {
        DehydratedConfig {
            base_dir: self.base_dir().to_string_lossy().to_string(),
            config_file: self.dehydrated_config_path().to_string_lossy().to_string(),
            domains_file: self.domains_file_path().to_string_lossy().to_string(),
        }
    }
}
