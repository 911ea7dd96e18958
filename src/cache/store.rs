//! Cache storage.
//!
//! The decorator talks to storage through [`CacheStore`]; tag support is an
//! optional capability exposed through [`CacheStore::tags`]. [`MemoryStore`]
//! is the in-process implementation: an LRU of JSON values with a tag index
//! kept alongside it.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

use crate::domain::Value;
use crate::util::lock::{rw_read, rw_write};

use super::config::CacheConfig;
use super::keys::{CacheKey, Tag};

const SOURCE: &str = "cache::store";
const METRIC_CACHE_EVICT_TOTAL: &str = "query_cache_evict_total";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {message}")]
    Unavailable { message: String },
    #[error("store does not support tagged entries")]
    TagsUnsupported,
}

impl StoreError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// When a stored entry stops being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    At(OffsetDateTime),
    Never,
}

impl Expiry {
    /// Expiry `ttl` from now. Durations past the representable range never expire.
    pub fn after(ttl: Duration) -> Self {
        time::Duration::try_from(ttl)
            .ok()
            .and_then(|ttl| OffsetDateTime::now_utc().checked_add(ttl))
            .map_or(Self::Never, Self::At)
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        match self {
            Self::At(at) => *at <= now,
            Self::Never => false,
        }
    }
}

/// Stored value with its expiry and tags.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDescription {
    pub value: Value,
    pub expires_at: Expiry,
    pub tags: Vec<Tag>,
}

/// Key/value storage for cached results.
///
/// Every method is a single atomic operation; callers never hold a lock
/// across calls.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<Value>, StoreError>;

    fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<(), StoreError>;

    fn put_forever(&self, key: &CacheKey, value: Value) -> Result<(), StoreError>;

    /// Remove `key`. Returns whether an entry was present.
    fn forget(&self, key: &CacheKey) -> Result<bool, StoreError>;

    /// Inspect an entry without touching recency.
    fn describe(&self, key: &CacheKey) -> Result<Option<EntryDescription>, StoreError>;

    /// Tag capability, when the backend has one.
    fn tags(&self) -> Option<&dyn TagStore> {
        None
    }

    /// A view that writes entries labelled with `tags`.
    fn scoped_by_tags<'a>(&'a self, tags: &'a [Tag]) -> Result<TaggedCache<'a>, StoreError> {
        self.tags()
            .map(|store| TaggedCache { store, tags })
            .ok_or(StoreError::TagsUnsupported)
    }
}

/// Tag-aware writes and flushes.
pub trait TagStore: Send + Sync {
    /// `ttl` of `None` never expires.
    fn put_tagged(
        &self,
        tags: &[Tag],
        key: &CacheKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Remove every entry carrying any of `tags`. Returns the number removed.
    fn flush_tags(&self, tags: &[Tag]) -> Result<u64, StoreError>;
}

pub struct TaggedCache<'a> {
    store: &'a dyn TagStore,
    tags: &'a [Tag],
}

impl TaggedCache<'_> {
    pub fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.store.put_tagged(self.tags, key, value, Some(ttl))
    }

    pub fn put_forever(&self, key: &CacheKey, value: Value) -> Result<(), StoreError> {
        self.store.put_tagged(self.tags, key, value, None)
    }

    pub fn flush(&self) -> Result<u64, StoreError> {
        self.store.flush_tags(self.tags)
    }
}

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Expiry,
    tags: Vec<Tag>,
}

/// In-memory LRU store with an optional tag index.
///
/// Lock order is always `entries` then `tag_index`.
pub struct MemoryStore {
    entries: RwLock<LruCache<CacheKey, StoredEntry>>,
    tag_index: RwLock<HashMap<Tag, HashSet<CacheKey>>>,
    tags_enabled: bool,
}

impl MemoryStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self::build(config, true)
    }

    /// A store that rejects tagged writes, like a plain key/value backend.
    pub fn without_tags(config: &CacheConfig) -> Self {
        Self::build(config, false)
    }

    fn build(config: &CacheConfig, tags_enabled: bool) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.store_capacity_non_zero())),
            tag_index: RwLock::new(HashMap::new()),
            tags_enabled,
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        entries.clear();
        rw_write(&self.tag_index, SOURCE, "clear").clear();
    }

    fn insert(&self, key: &CacheKey, value: Value, expires_at: Expiry, tags: &[Tag]) {
        let mut entries = rw_write(&self.entries, SOURCE, "insert");
        let displaced = entries.push(
            key.clone(),
            StoredEntry {
                value,
                expires_at,
                tags: tags.to_vec(),
            },
        );

        let mut index = rw_write(&self.tag_index, SOURCE, "insert");
        if let Some((displaced_key, displaced_entry)) = displaced {
            if displaced_key != *key {
                counter!(METRIC_CACHE_EVICT_TOTAL).increment(1);
                debug!(key = %displaced_key, "Evicted least recently used entry");
            }
            unindex(&mut index, &displaced_key, &displaced_entry.tags);
        }
        for tag in tags {
            index.entry(tag.clone()).or_default().insert(key.clone());
        }
    }

    fn remove(&self, key: &CacheKey) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "remove");
        match entries.pop(key) {
            Some(entry) => {
                let mut index = rw_write(&self.tag_index, SOURCE, "remove");
                unindex(&mut index, key, &entry.tags);
                true
            }
            None => false,
        }
    }
}

fn unindex(index: &mut HashMap<Tag, HashSet<CacheKey>>, key: &CacheKey, tags: &[Tag]) {
    for tag in tags {
        if let Some(keys) = index.get_mut(tag) {
            keys.remove(key);
            if keys.is_empty() {
                index.remove(tag);
            }
        }
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Value>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let fresh = match entries.get(key) {
            None => return Ok(None),
            Some(entry) => (!entry.expires_at.is_expired_at(now)).then(|| entry.value.clone()),
        };

        if fresh.is_none()
            && let Some(entry) = entries.pop(key)
        {
            let mut index = rw_write(&self.tag_index, SOURCE, "get");
            unindex(&mut index, key, &entry.tags);
        }
        Ok(fresh)
    }

    fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.insert(key, value, Expiry::after(ttl), &[]);
        Ok(())
    }

    fn put_forever(&self, key: &CacheKey, value: Value) -> Result<(), StoreError> {
        self.insert(key, value, Expiry::Never, &[]);
        Ok(())
    }

    fn forget(&self, key: &CacheKey) -> Result<bool, StoreError> {
        Ok(self.remove(key))
    }

    fn describe(&self, key: &CacheKey) -> Result<Option<EntryDescription>, StoreError> {
        let now = OffsetDateTime::now_utc();
        let entries = rw_read(&self.entries, SOURCE, "describe");
        Ok(entries
            .peek(key)
            .filter(|entry| !entry.expires_at.is_expired_at(now))
            .map(|entry| EntryDescription {
                value: entry.value.clone(),
                expires_at: entry.expires_at,
                tags: entry.tags.clone(),
            }))
    }

    fn tags(&self) -> Option<&dyn TagStore> {
        self.tags_enabled.then_some(self as &dyn TagStore)
    }
}

impl TagStore for MemoryStore {
    fn put_tagged(
        &self,
        tags: &[Tag],
        key: &CacheKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        if !self.tags_enabled {
            return Err(StoreError::TagsUnsupported);
        }
        let expires_at = ttl.map_or(Expiry::Never, Expiry::after);
        self.insert(key, value, expires_at, tags);
        Ok(())
    }

    fn flush_tags(&self, tags: &[Tag]) -> Result<u64, StoreError> {
        if !self.tags_enabled {
            return Err(StoreError::TagsUnsupported);
        }

        let mut entries = rw_write(&self.entries, SOURCE, "flush_tags");
        let mut index = rw_write(&self.tag_index, SOURCE, "flush_tags");

        let keys: HashSet<CacheKey> = tags
            .iter()
            .filter_map(|tag| index.remove(tag))
            .flatten()
            .collect();

        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.pop(&key) {
                unindex(&mut index, &key, &entry.tags);
                removed += 1;
            }
        }
        Ok(removed)
    }
}
