#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use query_cache::cache::{
    CacheConfig, CacheKey, CacheState, CacheStore, EntryDescription, MemoryStore, StoreError,
    TagStore,
};
use query_cache::domain::{Cacheable, Row, Value};
use query_cache::engine::MemoryEngine;
use serde_json::json;

pub struct User;

impl Cacheable for User {
    const ENTITY: &'static str = "users";
}

pub struct Session;

impl Cacheable for Session {
    const ENTITY: &'static str = "sessions";

    fn cache_ttl() -> Option<i64> {
        Some(5)
    }
}

pub struct Uncached;

impl Cacheable for Uncached {
    const ENTITY: &'static str = "users";

    fn cache_enabled() -> bool {
        false
    }
}

pub fn row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture rows must be objects, got {other}"),
    }
}

/// Three users, two of them active.
pub fn users_engine() -> Arc<MemoryEngine> {
    Arc::new(MemoryEngine::new().with_table(
        "users",
        vec![
            row(json!({"id": 1, "name": "ada", "active": true, "age": 36})),
            row(json!({"id": 2, "name": "bob", "active": false, "age": 41})),
            row(json!({"id": 3, "name": "cyd", "active": true, "age": 29})),
        ],
    ))
}

pub fn state() -> CacheState {
    CacheState::in_memory(CacheConfig::default())
}

pub fn state_with(config: CacheConfig) -> CacheState {
    CacheState::in_memory(config)
}

/// A memory store that can be switched into failing every call.
pub struct FlakyStore {
    inner: MemoryStore,
    down: AtomicBool,
}

impl FlakyStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: MemoryStore::new(config),
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("connection refused"))
        } else {
            Ok(())
        }
    }
}

impl CacheStore for FlakyStore {
    fn get(&self, key: &CacheKey) -> Result<Option<Value>, StoreError> {
        self.check()?;
        self.inner.get(key)
    }

    fn put(&self, key: &CacheKey, value: Value, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(key, value, ttl)
    }

    fn put_forever(&self, key: &CacheKey, value: Value) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put_forever(key, value)
    }

    fn forget(&self, key: &CacheKey) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.forget(key)
    }

    fn describe(&self, key: &CacheKey) -> Result<Option<EntryDescription>, StoreError> {
        self.check()?;
        self.inner.describe(key)
    }

    fn tags(&self) -> Option<&dyn TagStore> {
        Some(self as &dyn TagStore)
    }
}

impl TagStore for FlakyStore {
    fn put_tagged(
        &self,
        tags: &[query_cache::cache::Tag],
        key: &CacheKey,
        value: Value,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put_tagged(tags, key, value, ttl)
    }

    fn flush_tags(&self, tags: &[query_cache::cache::Tag]) -> Result<u64, StoreError> {
        self.check()?;
        self.inner.flush_tags(tags)
    }
}
