use thiserror::Error;

use crate::engine::EngineError;

use super::store::StoreError;

/// Errors surfaced by cached reads and invalidation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The store failed and fail-open is off.
    #[error("cache store unavailable: {0}")]
    Unavailable(#[from] StoreError),
    /// Propagated unchanged; failed executions are never cached.
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to encode result of `{operation}`: {source}")]
    Serialization {
        operation: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid cache configuration: {message}")]
    Configuration { message: String },
}

impl CacheError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
