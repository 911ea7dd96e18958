//! Runtime bootstrap: settings, tracing and metric descriptions.

pub mod error;
pub mod telemetry;

use std::path::Path;
use std::sync::Arc;

use crate::cache::{CacheConfig, CacheState, MemoryStore};
use crate::config::{self, Settings};

use self::error::InfraError;

/// Load settings, install the tracing subscriber and wire an in-memory cache.
pub fn bootstrap(config_file: Option<&Path>) -> Result<(Settings, CacheState), InfraError> {
    let settings = config::load(config_file)?;
    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings);
    let store = Arc::new(MemoryStore::new(&cache_config));
    let state = CacheState::new(cache_config, store);

    tracing::info!(
        enabled = state.config.enabled,
        key_prefix = %state.config.key_prefix,
        invalidation = %state.config.invalidation,
        default_ttl_seconds = state.config.default_ttl_seconds,
        "Query cache ready"
    );

    Ok((settings, state))
}
