#[macro_use]
extern crate lazy_static;

#[cfg(test)]
#[macro_use(defer)]
extern crate scopeguard;

/// Token-gate middleware and signing-key management
pub mod auth;
pub mod cli;
/// Configuration handling for the server
pub mod config;
/// The domain entry model and name validation
pub mod domain;
/// Parser/emitter for the domains file shared with dehydrated
pub mod domainsfile;
pub mod error;
pub mod logging;
/// Metadata plugin handling: cache, subprocess clients, registry
pub mod plugins;
/// The in-memory view of the domains file and its mutation API
pub mod registry;
pub mod servers;
#[cfg(test)]
mod tests;
pub mod watcher;
/// Configuration and management API
pub mod web;

/// Where plugin binaries are materialized, relative to the working directory.
/// Kept compatible with the cache location the shell tooling already expects.
pub const PLUGIN_CACHE_DIR: &str = ".dehydrated-api-go/plugins";

/// The file dehydrated reads its certificate subjects from
pub const DOMAINS_FILENAME: &str = "domains.txt";

/// Default page size for domain listings
pub const DEFAULT_PER_PAGE: u32 = 100;
/// Hard cap on the `per_page` query parameter
pub const MAX_PER_PAGE: u32 = 1000;

/// How long a reload waits for further watcher events before firing
pub const WATCH_DEBOUNCE_MS: u64 = 250;
