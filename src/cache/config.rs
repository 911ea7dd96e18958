//! Cache configuration.
//!
//! Runtime knobs for the caching decorator and the invalidation pipeline,
//! resolved from [`crate::config::CacheSettings`] or built directly in tests.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use serde::Deserialize;

use super::ttl::DEFAULT_TTL_SECONDS;

const DEFAULT_KEY_PREFIX: &str = "query-cache";
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1024;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_STORE_CAPACITY: usize = 10_000;

/// Which tags a mutation flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    /// Every mutation flushes the collection tag and the identity tag of the
    /// affected key. Other identity entries survive, even on create.
    #[default]
    Scoped,
    /// Every mutation flushes every entry of the entity.
    Blanket,
}

impl FromStr for InvalidationStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scoped" => Ok(Self::Scoped),
            "blanket" => Ok(Self::Blanket),
            other => Err(format!("unknown invalidation strategy `{other}`")),
        }
    }
}

impl fmt::Display for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scoped => "scoped",
            Self::Blanket => "blanket",
        })
    }
}

/// Behaviour when the store cannot attach tags to entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaglessFallback {
    /// Entries are cached without tags and invalidation is a no-op.
    #[default]
    None,
    /// Keys are tracked in a local registry and forgotten one by one.
    TrackKeys,
}

impl FromStr for TaglessFallback {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "track_keys" => Ok(Self::TrackKeys),
            other => Err(format!("unknown tagless fallback `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Global switch. When off every read goes straight to the engine.
    pub enabled: bool,
    /// Expiry for entities that do not declare their own TTL.
    pub default_ttl_seconds: i64,
    /// Namespace prepended to every key and tag.
    pub key_prefix: String,
    /// Serve from the engine instead of failing when the store errors.
    pub fail_open: bool,
    pub invalidation: InvalidationStrategy,
    pub tagless_fallback: TaglessFallback,
    /// Pending mutation events kept before the oldest is dropped.
    pub event_queue_limit: usize,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
    /// Entry capacity of the in-memory store.
    pub store_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            fail_open: false,
            invalidation: InvalidationStrategy::default(),
            tagless_fallback: TaglessFallback::default(),
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            store_capacity: DEFAULT_STORE_CAPACITY,
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        let cache = &settings.cache;
        Self {
            enabled: cache.enabled,
            default_ttl_seconds: cache.default_ttl_seconds,
            key_prefix: cache.key_prefix.clone(),
            fail_open: cache.fail_open,
            invalidation: cache.invalidation,
            tagless_fallback: cache.tagless_fallback,
            event_queue_limit: cache.event_queue_limit,
            consume_batch_limit: cache.consume_batch_limit,
            store_capacity: settings.store.capacity,
        }
    }
}

impl CacheConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the store capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn store_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.store_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the queue limit as NonZeroUsize, clamping to 1 if zero.
    pub fn event_queue_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.event_queue_limit).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn consume_batch_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.consume_batch_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
