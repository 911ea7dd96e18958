//! Expiration policy resolution.

use std::time::Duration;

use once_cell::sync::OnceCell;

use crate::domain::Cacheable;

use super::error::CacheError;

/// Fallback when neither the entity nor the configuration names a TTL.
pub const DEFAULT_TTL_SECONDS: i64 = 600;

/// Whether the current call reads the cache before executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallMode {
    #[default]
    Normal,
    /// Always execute and store without expiry.
    Warmup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationPolicy {
    Ttl(Duration),
    Forever,
}

/// Resolves the expiration policy for one entity type.
///
/// The TTL is validated on first use and memoised; a misconfigured entity
/// fails every call rather than only the first.
#[derive(Debug)]
pub struct TtlResolver {
    default_ttl_seconds: i64,
    resolved: OnceCell<Duration>,
}

impl TtlResolver {
    pub fn new(default_ttl_seconds: i64) -> Self {
        Self {
            default_ttl_seconds,
            resolved: OnceCell::new(),
        }
    }

    pub fn resolve<E: Cacheable>(&self, mode: CallMode) -> Result<ExpirationPolicy, CacheError> {
        if mode == CallMode::Warmup {
            return Ok(ExpirationPolicy::Forever);
        }

        let ttl = self.resolved.get_or_try_init(|| {
            let (seconds, source) = match E::cache_ttl() {
                Some(seconds) => (seconds, "entity cache_ttl"),
                None => (self.default_ttl_seconds, "cache.default_ttl_seconds"),
            };
            match u64::try_from(seconds) {
                Ok(seconds) if seconds > 0 => Ok(Duration::from_secs(seconds)),
                _ => Err(CacheError::configuration(format!(
                    "{source} for `{}` must be a positive number of seconds, got {seconds}",
                    E::ENTITY
                ))),
            }
        })?;

        Ok(ExpirationPolicy::Ttl(*ttl))
    }
}

impl Default for TtlResolver {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS)
    }
}
