//! Bearer-token authentication for the API.
//!
//! Requests carry `Authorization: Bearer <jwt>`; the gate checks header
//! shape, signature (against the provider's published keys), expiry,
//! audience, and issuer before a handler ever runs. Failures are a 401 with
//! a short reason. The token itself is never logged.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::DehydratedApiError;
use crate::web::api::ErrorResult;
use crate::web::AppState;

pub mod keys;

use keys::KeyManager;

/// The only algorithms the provider signs with
const RSA_ALGORITHMS: [Algorithm; 3] = [Algorithm::RS256, Algorithm::RS384, Algorithm::RS512];

/// The claims we keep after validation; everything load-bearing is checked
/// by the validation itself.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
}

pub struct TokenGate {
    keys: KeyManager,
    allowed_audiences: Vec<String>,
    issuer: String,
    validate_signature: bool,
}

impl TokenGate {
    pub fn new(auth: &AuthConfig) -> Result<TokenGate, DehydratedApiError> {
        if !auth.enable_signature_validation {
            warn!(
                "Token signature validation is disabled; anyone can mint accepted tokens. Never run production like this."
            );
        }
        Ok(TokenGate {
            keys: KeyManager::new(auth)?,
            allowed_audiences: auth.allowed_audiences.clone(),
            issuer: format!("https://sts.windows.net/{}/", auth.tenant_id),
            validate_signature: auth.enable_signature_validation,
        })
    }

    /// Run the whole check list against one token.
    pub async fn verify(&self, token: &str) -> Result<Claims, DehydratedApiError> {
        let header =
            decode_header(token).map_err(|_| unauthorized("invalid token header"))?;
        let Some(kid) = header.kid else {
            return Err(unauthorized("token missing key id"));
        };
        if !RSA_ALGORITHMS.contains(&header.alg) {
            return Err(unauthorized("unsupported signing algorithm"));
        }

        let mut validation = Validation::new(header.alg);
        validation.algorithms = RSA_ALGORITHMS.to_vec();
        validation.set_audience(&self.allowed_audiences);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);

        let key = match self.validate_signature {
            true => self.keys.get_key(&kid).await.map_err(|err| {
                debug!("Signing key lookup for kid failed: {err}");
                unauthorized("unknown signing key")
            })?,
            false => {
                validation.insecure_disable_signature_validation();
                DecodingKey::from_secret(&[])
            }
        };

        let data = decode::<Claims>(token, &key, &validation)
            .map_err(|err| unauthorized(reject_reason(err.kind())))?;
        Ok(data.claims)
    }
}

fn unauthorized(reason: &str) -> DehydratedApiError {
    DehydratedApiError::Unauthorized(reason.to_string())
}

fn reject_reason(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::ExpiredSignature => "token expired",
        ErrorKind::ImmatureSignature => "token not yet valid",
        ErrorKind::InvalidAudience => "invalid audience",
        ErrorKind::InvalidIssuer => "invalid issuer",
        ErrorKind::InvalidSignature => "invalid signature",
        ErrorKind::InvalidAlgorithm => "unsupported signing algorithm",
        ErrorKind::MissingRequiredClaim(_) => "token missing a required claim",
        _ => "invalid token",
    }
}

/// Middleware in front of every non-health route. With no auth configured
/// the request passes straight through.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(gate) = state.token_gate.as_ref() else {
        return next.run(request).await;
    };

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return reject("missing bearer token");
    };

    match gate.verify(token).await {
        Ok(_claims) => next.run(request).await,
        Err(err) => reject(&err.to_string()),
    }
}

fn reject(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResult {
            message: message.to_string(),
        }),
    )
        .into_response()
}
