//! Fetches and caches the identity provider's signing keys.
//!
//! The provider publishes a JWKS document; each RSA entry becomes a
//! verifier keyed by its `kid`. Keys are cached with a fetch timestamp and
//! refreshed lazily: the first miss (or stale hit) after the TTL triggers
//! one refetch of the whole set, no matter how many requests miss at once.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use url::Url;

use crate::config::AuthConfig;
use crate::error::DehydratedApiError;

/// JWKS endpoints answer fast or not at all
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

struct CachedKey {
    key: DecodingKey,
    fetched: DateTime<Utc>,
}

pub struct KeyManager {
    jwks_url: Url,
    ttl: TimeDelta,
    client: reqwest::Client,
    keys: RwLock<HashMap<String, CachedKey>>,
    /// Single-flight guard: concurrent misses line up here and all but the
    /// first find the cache already refreshed.
    refresh: Mutex<()>,
}

impl KeyManager {
    pub fn new(auth: &AuthConfig) -> Result<KeyManager, DehydratedApiError> {
        let jwks_url = auth
            .authority
            .join(&format!("{}/discovery/v2.0/keys", auth.tenant_id))
            .map_err(|err| {
                DehydratedApiError::ConfigError(format!("can't build JWKS URL: {err}"))
            })?;
        let client = reqwest::Client::builder()
            .user_agent(format!("dehydrated-api/{}", env!("CARGO_PKG_VERSION")))
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(KeyManager {
            jwks_url,
            ttl: TimeDelta::seconds(auth.key_cache_ttl.min(i64::MAX as u64) as i64),
            client,
            keys: RwLock::new(HashMap::new()),
            refresh: Mutex::new(()),
        })
    }

    /// A verifier for `kid`, from cache when fresh, else after one refetch
    /// of the provider's key set.
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, DehydratedApiError> {
        if let Some(key) = self.fresh_key(kid).await {
            return Ok(key);
        }

        let _guard = self.refresh.lock().await;
        // someone else may have refreshed while we queued for the guard
        if let Some(key) = self.fresh_key(kid).await {
            return Ok(key);
        }
        self.refresh().await?;

        self.fresh_key(kid)
            .await
            .ok_or_else(|| DehydratedApiError::KeyNotFound(kid.to_string()))
    }

    async fn fresh_key(&self, kid: &str) -> Option<DecodingKey> {
        let keys = self.keys.read().await;
        let cached = keys.get(kid)?;
        match Utc::now() - cached.fetched < self.ttl {
            true => Some(cached.key.clone()),
            false => None,
        }
    }

    /// Fetch the whole key set and install every usable key with the
    /// current timestamp. On failure the previous cache stays as it was.
    async fn refresh(&self) -> Result<(), DehydratedApiError> {
        debug!("Fetching signing keys from {}", self.jwks_url);
        let set: JwkSet = self
            .client
            .get(self.jwks_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let now = Utc::now();
        let mut fetched: HashMap<String, CachedKey> = HashMap::new();
        for jwk in set.keys {
            let Some(kid) = jwk.kid else {
                warn!("Skipping key without kid in JWKS response");
                continue;
            };
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key {kid}");
                continue;
            }
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                warn!("Skipping RSA key {kid} without modulus/exponent");
                continue;
            };
            match DecodingKey::from_rsa_components(n, e) {
                Ok(key) => {
                    fetched.insert(kid, CachedKey { key, fetched: now });
                }
                Err(err) => warn!("Skipping unparseable key {kid}: {err}"),
            }
        }
        debug!("Installed {} signing keys", fetched.len());

        let mut keys = self.keys.write().await;
        *keys = fetched;
        Ok(())
    }
}
