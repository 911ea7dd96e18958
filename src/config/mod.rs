//! Configuration layer: typed settings with layered precedence (file → env).

use std::{path::Path, str::FromStr};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{DEFAULT_TTL_SECONDS, InvalidationStrategy, TaglessFallback};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "query-cache";
const ENV_PREFIX: &str = "QUERY_CACHE";
const DEFAULT_KEY_PREFIX: &str = "query-cache";
const DEFAULT_EVENT_QUEUE_LIMIT: u64 = 1024;
const DEFAULT_CONSUME_BATCH_LIMIT: u64 = 100;
const DEFAULT_STORE_CAPACITY: u64 = 10_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl_seconds: i64,
    pub key_prefix: String,
    pub fail_open: bool,
    pub invalidation: InvalidationStrategy,
    pub tagless_fallback: TaglessFallback,
    pub event_queue_limit: usize,
    pub consume_batch_limit: usize,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub capacity: usize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence: `config/default`, then
/// `query-cache` in the working directory, then `config_file`, then
/// `QUERY_CACHE__*` environment variables.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache: CacheSettings {
                enabled: true,
                default_ttl_seconds: DEFAULT_TTL_SECONDS,
                key_prefix: DEFAULT_KEY_PREFIX.to_string(),
                fail_open: false,
                invalidation: InvalidationStrategy::default(),
                tagless_fallback: TaglessFallback::default(),
                event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT as usize,
                consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT as usize,
            },
            store: StoreSettings {
                capacity: DEFAULT_STORE_CAPACITY as usize,
            },
            logging: LoggingSettings {
                level: LevelFilter::INFO,
                format: LogFormat::Compact,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    store: RawStoreSettings,
    logging: RawLoggingSettings,
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            store,
            logging,
        } = raw;

        let cache = build_cache_settings(cache)?;
        let store = build_store_settings(store)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            cache,
            store,
            logging,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl_seconds = cache.default_ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS);
    if default_ttl_seconds <= 0 {
        return Err(LoadError::invalid(
            "cache.default_ttl_seconds",
            "must be greater than zero",
        ));
    }

    let key_prefix = cache
        .key_prefix
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());
    if key_prefix.is_empty() {
        return Err(LoadError::invalid("cache.key_prefix", "must not be empty"));
    }
    if key_prefix.contains(char::is_whitespace) {
        return Err(LoadError::invalid(
            "cache.key_prefix",
            "must not contain whitespace",
        ));
    }

    let invalidation = match cache.invalidation {
        Some(value) => InvalidationStrategy::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.invalidation", reason))?,
        None => InvalidationStrategy::default(),
    };

    let tagless_fallback = match cache.tagless_fallback {
        Some(value) => TaglessFallback::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.tagless_fallback", reason))?,
        None => TaglessFallback::default(),
    };

    let event_queue_limit = non_zero_usize(
        cache.event_queue_limit.unwrap_or(DEFAULT_EVENT_QUEUE_LIMIT),
        "cache.event_queue_limit",
    )?;
    let consume_batch_limit = non_zero_usize(
        cache
            .consume_batch_limit
            .unwrap_or(DEFAULT_CONSUME_BATCH_LIMIT),
        "cache.consume_batch_limit",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_ttl_seconds,
        key_prefix,
        fail_open: cache.fail_open.unwrap_or(false),
        invalidation,
        tagless_fallback,
        event_queue_limit,
        consume_batch_limit,
    })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let capacity = non_zero_usize(
        store.capacity.unwrap_or(DEFAULT_STORE_CAPACITY),
        "store.capacity",
    )?;
    Ok(StoreSettings { capacity })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<i64>,
    key_prefix: Option<String>,
    fail_open: Option<bool>,
    invalidation: Option<String>,
    tagless_fallback: Option<String>,
    event_queue_limit: Option<u64>,
    consume_batch_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    capacity: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<usize, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}
