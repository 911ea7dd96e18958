//! Bidirectional tag registry.
//!
//! Used when the store cannot tag entries itself: every write records which
//! tags the key would have carried, so a flush can forget the keys one by one.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use crate::util::lock::{rw_read, rw_write};

use super::keys::{CacheKey, Tag};

const SOURCE: &str = "cache::registry";

/// Tracks tag → cache_keys and cache_key → tags mappings.
pub struct CacheRegistry {
    tag_to_keys: RwLock<HashMap<Tag, HashSet<CacheKey>>>,
    key_to_tags: RwLock<HashMap<CacheKey, HashSet<Tag>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            tag_to_keys: RwLock::new(HashMap::new()),
            key_to_tags: RwLock::new(HashMap::new()),
        }
    }

    /// Record that `cache_key` carries `tags`, replacing any earlier record.
    pub fn register(&self, cache_key: CacheKey, tags: impl IntoIterator<Item = Tag>) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "register");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "register");

        let tags: HashSet<Tag> = tags.into_iter().collect();
        if let Some(previous) = k2t.remove(&cache_key) {
            detach(&mut t2k, &cache_key, previous.difference(&tags));
        }
        for tag in &tags {
            t2k.entry(tag.clone()).or_default().insert(cache_key.clone());
        }
        k2t.insert(cache_key, tags);
    }

    /// Union of keys registered under any of `tags`.
    pub fn keys_for_tags(&self, tags: &[Tag]) -> HashSet<CacheKey> {
        let t2k = rw_read(&self.tag_to_keys, SOURCE, "keys_for_tags");
        tags.iter()
            .filter_map(|tag| t2k.get(tag))
            .flatten()
            .cloned()
            .collect()
    }

    pub fn tags_for_key(&self, cache_key: &CacheKey) -> HashSet<Tag> {
        rw_read(&self.key_to_tags, SOURCE, "tags_for_key")
            .get(cache_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove a cache key and clean up tag mappings.
    pub fn unregister(&self, cache_key: &CacheKey) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "unregister");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "unregister");

        if let Some(tags) = k2t.remove(cache_key) {
            detach(&mut t2k, cache_key, tags.iter());
        }
    }

    /// Remove every key registered under any of `tags` and return them.
    pub fn take_keys_for_tags(&self, tags: &[Tag]) -> HashSet<CacheKey> {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "take_keys_for_tags");
        let mut k2t = rw_write(&self.key_to_tags, SOURCE, "take_keys_for_tags");

        let keys: HashSet<CacheKey> = tags
            .iter()
            .filter_map(|tag| t2k.remove(tag))
            .flatten()
            .collect();

        for key in &keys {
            if let Some(other_tags) = k2t.remove(key) {
                detach(&mut t2k, key, other_tags.iter());
            }
        }
        keys
    }

    pub fn clear(&self) {
        let mut t2k = rw_write(&self.tag_to_keys, SOURCE, "clear");
        t2k.clear();
        rw_write(&self.key_to_tags, SOURCE, "clear").clear();
    }

    /// Get the number of tracked tags.
    pub fn tag_count(&self) -> usize {
        rw_read(&self.tag_to_keys, SOURCE, "tag_count").len()
    }

    /// Get the number of tracked cache keys.
    pub fn key_count(&self) -> usize {
        rw_read(&self.key_to_tags, SOURCE, "key_count").len()
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn detach<'a>(
    t2k: &mut HashMap<Tag, HashSet<CacheKey>>,
    cache_key: &CacheKey,
    tags: impl Iterator<Item = &'a Tag>,
) {
    for tag in tags {
        if let Some(keys) = t2k.get_mut(tag) {
            keys.remove(cache_key);
            if keys.is_empty() {
                t2k.remove(tag);
            }
        }
    }
}
