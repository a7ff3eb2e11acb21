//! # Web things
//!
//! axum/tower for the protocol, one shared state blob for everything else.

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenGate;
use crate::config::ConfigFile;
use crate::registry::DomainRegistry;

pub mod api;

#[derive(Clone)]
/// Everything a handler can reach, cheap to clone per request.
pub struct AppState {
    pub registry: Arc<DomainRegistry>,
    pub config: Arc<ConfigFile>,
    /// None when no auth block is configured; the gate then waves
    /// everything through
    pub token_gate: Option<Arc<TokenGate>>,
}

/// Assemble the full router. Everything except `/health` sits behind the
/// token gate.
pub fn build_router(state: AppState) -> Router {
    let gated = Router::new()
        .route(
            "/api/v1/domains",
            get(api::list_domains).post(api::create_domain),
        )
        .route(
            "/api/v1/domains/{domain}",
            get(api::get_domain)
                .put(api::update_domain)
                .delete(api::delete_domain),
        )
        .route("/config", get(api::get_config))
        .route_layer(from_fn_with_state(state.clone(), crate::auth::require_auth));

    Router::new()
        .route("/health", get(api::health))
        .merge(gated)
        .fallback(api::handler_404)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new()),
        )
}
