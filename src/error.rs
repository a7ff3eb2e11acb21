use std::fmt::Display;

/// When things go awry
#[derive(Debug)]
pub enum DehydratedApiError {
    /// A domain name failed the DNS grammar check
    InvalidDomainName(String),
    /// An alias contained characters outside the identifier class
    InvalidAlias(String),
    /// Create would duplicate a (domain, alias) pair
    DuplicateDomain { domain: String, alias: Option<String> },
    /// The referenced entry isn't in the registry
    DomainNotFound { domain: String, alias: Option<String> },
    /// Bad pagination or query parameters
    InvalidQuery(String),
    IoError(std::io::Error),
    /// Something failed in the start up of the platform
    StartupError(String),
    ConfigError(String),
    ReqwestError(reqwest::Error),
    FileError(String),
    /// The filesystem watcher couldn't be established or fell over
    Watcher(String),
    /// A plugin misbehaved; the plugin name is always attached
    Plugin { plugin: String, message: String },
    /// Fetching or selecting a release asset failed
    Release(String),
    /// A bearer token was rejected; the message is safe to show the caller
    Unauthorized(String),
    /// No verifier known for this key id
    KeyNotFound(String),
    Jwt(jsonwebtoken::errors::Error),
    /// Failed to send something across a tokio channel
    SendError(String),
    SerdeJson(serde_json::Error),
    Regex(String),
    Generic(String),
}

impl Display for DehydratedApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DehydratedApiError::InvalidDomainName(name) => {
                write!(f, "Invalid domain name: {name}")
            }
            DehydratedApiError::InvalidAlias(alias) => write!(f, "Invalid alias: {alias}"),
            DehydratedApiError::DuplicateDomain { domain, alias } => match alias {
                Some(alias) => write!(f, "Domain {domain} with alias {alias} already exists"),
                None => write!(f, "Domain {domain} already exists"),
            },
            DehydratedApiError::DomainNotFound { domain, alias } => match alias {
                Some(alias) => write!(f, "Domain {domain} with alias {alias} not found"),
                None => write!(f, "Domain {domain} not found"),
            },
            DehydratedApiError::InvalidQuery(msg) => write!(f, "{msg}"),
            DehydratedApiError::IoError(err) => write!(f, "IO error: {err}"),
            DehydratedApiError::StartupError(msg) => write!(f, "Startup error: {msg}"),
            DehydratedApiError::ConfigError(msg) => write!(f, "Configuration error: {msg}"),
            DehydratedApiError::ReqwestError(err) => write!(f, "HTTP error: {err}"),
            DehydratedApiError::FileError(msg) => write!(f, "File error: {msg}"),
            DehydratedApiError::Watcher(msg) => write!(f, "Watcher error: {msg}"),
            DehydratedApiError::Plugin { plugin, message } => {
                write!(f, "Plugin {plugin}: {message}")
            }
            DehydratedApiError::Release(msg) => write!(f, "Release error: {msg}"),
            DehydratedApiError::Unauthorized(msg) => write!(f, "{msg}"),
            DehydratedApiError::KeyNotFound(kid) => write!(f, "No signing key for kid {kid}"),
            DehydratedApiError::Jwt(err) => write!(f, "Token error: {err}"),
            DehydratedApiError::SendError(msg) => write!(f, "Channel send failed: {msg}"),
            DehydratedApiError::SerdeJson(err) => write!(f, "JSON error: {err}"),
            DehydratedApiError::Regex(msg) => write!(f, "Regex error: {msg}"),
            DehydratedApiError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DehydratedApiError {}

impl From<regex::Error> for DehydratedApiError {
    fn from(error: regex::Error) -> Self {
        DehydratedApiError::Regex(error.to_string())
    }
}

impl From<std::io::Error> for DehydratedApiError {
    fn from(error: std::io::Error) -> Self {
        DehydratedApiError::IoError(error)
    }
}

impl From<reqwest::Error> for DehydratedApiError {
    fn from(error: reqwest::Error) -> Self {
        DehydratedApiError::ReqwestError(error)
    }
}

impl From<serde_json::Error> for DehydratedApiError {
    fn from(error: serde_json::Error) -> Self {
        DehydratedApiError::SerdeJson(error)
    }
}

impl From<jsonwebtoken::errors::Error> for DehydratedApiError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        DehydratedApiError::Jwt(error)
    }
}

impl From<notify::Error> for DehydratedApiError {
    fn from(error: notify::Error) -> Self {
        DehydratedApiError::Watcher(error.to_string())
    }
}

impl From<DehydratedApiError> for std::io::Error {
    fn from(error: DehydratedApiError) -> Self {
        match error {
            DehydratedApiError::IoError(err) => err,
            other => std::io::Error::other(other.to_string()),
        }
    }
}
