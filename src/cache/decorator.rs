//! Read-through caching around a [`QueryEngine`].
//!
//! Every terminal operation derives a key from the query fingerprint plus the
//! operation and its arguments, probes the store, and on a miss executes
//! against the engine and writes the result back with the entity's tags.
//! Empty and null results are cached like any other value.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::{AggregateFn, Cacheable, QueryDescriptor, Row, Value};
use crate::engine::{EngineError, QueryEngine};

use super::config::{CacheConfig, TaglessFallback};
use super::error::CacheError;
use super::fingerprint::Fingerprint;
use super::keys::{CacheKey, KeyBuilder, Operation, Tag, classify};
use super::registry::CacheRegistry;
use super::store::{CacheStore, EntryDescription, StoreError};
use super::ttl::{CallMode, ExpirationPolicy, TtlResolver};

const METRIC_CACHE_HIT_TOTAL: &str = "query_cache_hit_total";
const METRIC_CACHE_MISS_TOTAL: &str = "query_cache_miss_total";
const METRIC_CACHE_WRITE_TOTAL: &str = "query_cache_write_total";
const METRIC_CACHE_BYPASS_TOTAL: &str = "query_cache_bypass_total";
const METRIC_CACHE_STORE_ERROR_TOTAL: &str = "query_cache_store_error_total";
const METRIC_CACHE_ENGINE_MS: &str = "query_cache_engine_ms";

/// Marker written in place of a bare `null` result.
pub const NULL_SENTINEL_KEY: &str = "__query_cache_null__";

/// One page of a count-based pagination.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    pub items: Vec<Row>,
    /// Always computed live; only `items` are cached.
    pub total: u64,
    pub per_page: u64,
    pub current_page: u64,
    pub last_page: u64,
}

/// One page of a pagination that only knows whether more rows follow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimplePage {
    pub items: Vec<Row>,
    pub per_page: u64,
    pub current_page: u64,
    pub has_more: bool,
}

/// Caching decorator for reads of entity type `E`.
///
/// The expiration policy is resolved once per instance. Instances are cheap;
/// build one per unit of work through [`CacheState::decorator`].
///
/// [`CacheState::decorator`]: super::CacheState::decorator
pub struct CachingDecorator<E: Cacheable> {
    engine: Arc<dyn QueryEngine>,
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheRegistry>,
    config: CacheConfig,
    keys: KeyBuilder,
    ttl: TtlResolver,
    mode: CallMode,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Cacheable> CachingDecorator<E> {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        store: Arc<dyn CacheStore>,
        registry: Arc<CacheRegistry>,
        config: CacheConfig,
    ) -> Self {
        Self {
            keys: KeyBuilder::for_entity::<E>(config.key_prefix.clone()),
            ttl: TtlResolver::new(config.default_ttl_seconds),
            engine,
            store,
            registry,
            config,
            mode: CallMode::Normal,
            _entity: PhantomData,
        }
    }

    /// Execute every following call against the engine and store the result
    /// without expiry. Calling it again has no further effect.
    pub fn warmup(&mut self) -> &mut Self {
        self.mode = CallMode::Warmup;
        self
    }

    /// Return to normal read-through behaviour.
    pub fn cancel_warmup(&mut self) -> &mut Self {
        self.mode = CallMode::Normal;
        self
    }

    pub fn is_warming(&self) -> bool {
        self.mode == CallMode::Warmup
    }

    pub fn get(&self, query: &QueryDescriptor) -> Result<Vec<Row>, CacheError> {
        self.remember(query, Operation::Get { columns: vec![] }, || {
            self.engine.run_collection(query)
        })
    }

    /// Like [`get`](Self::get) with the projection overridden by `columns`.
    pub fn get_columns<I, S>(
        &self,
        query: &QueryDescriptor,
        columns: I,
    ) -> Result<Vec<Row>, CacheError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        let projected = query.clone().select(columns.clone());
        self.remember(query, Operation::Get { columns }, || {
            self.engine.run_collection(&projected)
        })
    }

    pub fn first(&self, query: &QueryDescriptor) -> Result<Option<Row>, CacheError> {
        self.remember(query, Operation::First, || self.engine.run_single(query))
    }

    /// Row whose primary key equals `id`, within `query`.
    pub fn find(
        &self,
        query: &QueryDescriptor,
        id: impl Into<Value>,
    ) -> Result<Option<Row>, CacheError> {
        let id = id.into();
        let scoped = query.clone().where_eq(E::primary_key(), id.clone());
        self.remember(&scoped, Operation::Find { id }, || self.engine.run_single(&scoped))
    }

    /// Rows whose primary key is one of `ids`, cached as one combined entry.
    /// An empty id list returns nothing without touching the engine.
    pub fn find_many<I, V>(&self, query: &QueryDescriptor, ids: I) -> Result<Vec<Row>, CacheError>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let scoped = query.clone().where_in(E::primary_key(), ids.clone());
        self.remember(&scoped, Operation::FindMany { ids }, || {
            self.engine.run_collection(&scoped)
        })
    }

    /// Values of `column` for every matching row.
    pub fn pluck(&self, query: &QueryDescriptor, column: &str) -> Result<Vec<Value>, CacheError> {
        let projected = query.clone().select([column]);
        let operation = Operation::Pluck {
            column: column.to_string(),
            key: None,
        };
        self.remember(query, operation, || {
            let rows = self.engine.run_collection(&projected)?;
            Ok(rows
                .into_iter()
                .map(|mut row| row.remove(column).unwrap_or(Value::Null))
                .collect())
        })
    }

    /// Values of `column` keyed by the text of `key_column`. Later rows win
    /// on duplicate keys.
    pub fn pluck_keyed(
        &self,
        query: &QueryDescriptor,
        column: &str,
        key_column: &str,
    ) -> Result<Row, CacheError> {
        let projected = query.clone().select([column, key_column]);
        let operation = Operation::Pluck {
            column: column.to_string(),
            key: Some(key_column.to_string()),
        };
        self.remember(query, operation, || {
            let rows = self.engine.run_collection(&projected)?;
            Ok(rows
                .into_iter()
                .map(|row| {
                    let key = match row.get(key_column) {
                        Some(Value::String(text)) => text.clone(),
                        Some(other) => other.to_string(),
                        None => Value::Null.to_string(),
                    };
                    (key, row.get(column).cloned().unwrap_or(Value::Null))
                })
                .collect())
        })
    }

    pub fn aggregate(
        &self,
        query: &QueryDescriptor,
        function: AggregateFn,
        column: &str,
    ) -> Result<Value, CacheError> {
        let operation = Operation::Aggregate {
            function,
            column: column.to_string(),
        };
        self.remember(query, operation, || {
            self.engine.run_aggregate(query, function, column)
        })
    }

    pub fn sum(&self, query: &QueryDescriptor, column: &str) -> Result<Value, CacheError> {
        self.aggregate(query, AggregateFn::Sum, column)
    }

    pub fn avg(&self, query: &QueryDescriptor, column: &str) -> Result<Value, CacheError> {
        self.aggregate(query, AggregateFn::Avg, column)
    }

    /// Alias of [`avg`](Self::avg); shares its cache entry.
    pub fn average(&self, query: &QueryDescriptor, column: &str) -> Result<Value, CacheError> {
        self.avg(query, column)
    }

    pub fn min(&self, query: &QueryDescriptor, column: &str) -> Result<Value, CacheError> {
        self.aggregate(query, AggregateFn::Min, column)
    }

    pub fn max(&self, query: &QueryDescriptor, column: &str) -> Result<Value, CacheError> {
        self.aggregate(query, AggregateFn::Max, column)
    }

    pub fn count(&self, query: &QueryDescriptor) -> Result<u64, CacheError> {
        self.remember(query, Operation::Count, || self.engine.run_count(query))
    }

    pub fn exists(&self, query: &QueryDescriptor) -> Result<bool, CacheError> {
        self.remember(query, Operation::Exists, || self.engine.run_exists(query))
    }

    /// Negation of [`exists`](Self::exists); has no entry of its own.
    pub fn doesnt_exist(&self, query: &QueryDescriptor) -> Result<bool, CacheError> {
        self.exists(query).map(|exists| !exists)
    }

    /// Count-based pagination. `page` is 1-based; zero values are raised to 1.
    ///
    /// Only the items are cached. The total comes from the engine on every
    /// call, so it may disagree with cached items until they are invalidated.
    pub fn paginate(
        &self,
        query: &QueryDescriptor,
        per_page: u64,
        page: u64,
    ) -> Result<Page, CacheError> {
        let per_page = per_page.max(1);
        let page = page.max(1);
        let computed_total = Cell::new(None);

        let items = self.remember(query, Operation::Paginate { per_page, page }, || {
            let (rows, total) = self.engine.run_paginated(query, per_page, page)?;
            computed_total.set(Some(total));
            Ok(rows)
        })?;

        let total = match computed_total.get() {
            Some(total) => total,
            None => self.engine.run_count(query)?,
        };

        Ok(Page {
            items,
            total,
            per_page,
            current_page: page,
            last_page: total.div_ceil(per_page).max(1),
        })
    }

    /// Pagination without a total. Caches `per_page + 1` rows so the look-ahead
    /// row that decides `has_more` is served from the cache too.
    pub fn simple_paginate(
        &self,
        query: &QueryDescriptor,
        per_page: u64,
        page: u64,
    ) -> Result<SimplePage, CacheError> {
        let per_page = per_page.max(1);
        let page = page.max(1);

        let mut items = self.remember(query, Operation::SimplePaginate { per_page, page }, || {
            self.engine.run_paginated_simple(query, per_page, page)
        })?;

        let limit = usize::try_from(per_page).unwrap_or(usize::MAX);
        let has_more = items.len() > limit;
        items.truncate(limit);

        Ok(SimplePage {
            items,
            per_page,
            current_page: page,
            has_more,
        })
    }

    /// Read-through for an arbitrary operation.
    ///
    /// `compute` runs on a miss, or on every call in warmup mode. Engine
    /// errors propagate and nothing is stored.
    pub fn remember<T, F>(
        &self,
        query: &QueryDescriptor,
        operation: Operation,
        compute: F,
    ) -> Result<T, CacheError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, EngineError>,
    {
        let op_name = operation.name().to_string();

        if !self.config.is_enabled() || !E::cache_enabled() {
            counter!(
                METRIC_CACHE_BYPASS_TOTAL,
                "entity" => E::ENTITY,
                "operation" => op_name.clone()
            )
            .increment(1);
            return Ok(self.execute(&op_name, compute)?);
        }

        let scope = classify(query, E::primary_key());
        let key = self.keys.build_key(&Fingerprint::of(query), &operation, &scope);
        let policy = self.ttl.resolve::<E>(self.mode)?;

        if self.mode == CallMode::Normal {
            match self.store.get(&key) {
                Ok(Some(stored)) => match decode::<T>(stored) {
                    Ok(value) => {
                        counter!(
                            METRIC_CACHE_HIT_TOTAL,
                            "entity" => E::ENTITY,
                            "operation" => op_name
                        )
                        .increment(1);
                        debug!(entity = E::ENTITY, %key, "Cache hit");
                        return Ok(value);
                    }
                    Err(err) => {
                        warn!(
                            entity = E::ENTITY,
                            %key,
                            error = %err,
                            "Discarding undecodable cache entry"
                        );
                    }
                },
                Ok(None) => {}
                Err(err) => self.store_failure("get", &key, err)?,
            }
        }

        counter!(METRIC_CACHE_MISS_TOTAL, "entity" => E::ENTITY, "operation" => op_name.clone())
            .increment(1);
        debug!(entity = E::ENTITY, %key, mode = ?self.mode, "Cache miss");

        let value = self.execute(&op_name, compute)?;
        let encoded = encode(&value).map_err(|source| CacheError::Serialization {
            operation: op_name.clone(),
            source,
        })?;

        let tags = self.keys.tags_for(&scope);
        match self.write(&key, &tags, encoded, policy) {
            Ok(()) => {
                counter!(METRIC_CACHE_WRITE_TOTAL, "entity" => E::ENTITY, "operation" => op_name)
                    .increment(1);
            }
            Err(err) => self.store_failure("put", &key, err)?,
        }

        Ok(value)
    }

    /// Key a call would read and write, for inspection.
    pub fn key_for(&self, query: &QueryDescriptor, operation: &Operation) -> CacheKey {
        let scope = classify(query, E::primary_key());
        self.keys.build_key(&Fingerprint::of(query), operation, &scope)
    }

    /// The stored entry for a call, with its expiry and tags.
    pub fn describe(
        &self,
        query: &QueryDescriptor,
        operation: &Operation,
    ) -> Result<Option<EntryDescription>, CacheError> {
        let key = self.key_for(query, operation);
        Ok(self.store.describe(&key)?.map(|mut entry| {
            if is_null_sentinel(&entry.value) {
                entry.value = Value::Null;
            }
            entry
        }))
    }

    fn execute<T>(
        &self,
        op_name: &str,
        compute: impl FnOnce() -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let started_at = Instant::now();
        let result = compute();
        histogram!(
            METRIC_CACHE_ENGINE_MS,
            "entity" => E::ENTITY,
            "operation" => op_name.to_string()
        )
        .record(started_at.elapsed().as_secs_f64() * 1000.0);
        result
    }

    fn write(
        &self,
        key: &CacheKey,
        tags: &[Tag],
        value: Value,
        policy: ExpirationPolicy,
    ) -> Result<(), StoreError> {
        match self.store.scoped_by_tags(tags) {
            Ok(tagged) => match policy {
                ExpirationPolicy::Ttl(ttl) => tagged.put(key, value, ttl),
                ExpirationPolicy::Forever => tagged.put_forever(key, value),
            },
            Err(StoreError::TagsUnsupported) => {
                match policy {
                    ExpirationPolicy::Ttl(ttl) => self.store.put(key, value, ttl)?,
                    ExpirationPolicy::Forever => self.store.put_forever(key, value)?,
                }
                if self.config.tagless_fallback == TaglessFallback::TrackKeys {
                    self.registry.register(key.clone(), tags.iter().cloned());
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn store_failure(
        &self,
        op: &'static str,
        key: &CacheKey,
        err: StoreError,
    ) -> Result<(), CacheError> {
        counter!(METRIC_CACHE_STORE_ERROR_TOTAL, "entity" => E::ENTITY, "op" => op).increment(1);
        if self.config.fail_open {
            warn!(
                entity = E::ENTITY,
                %key,
                op,
                error = %err,
                "Cache store failed; serving from engine"
            );
            Ok(())
        } else {
            Err(CacheError::Unavailable(err))
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    let encoded = serde_json::to_value(value)?;
    Ok(if encoded.is_null() {
        json!({ NULL_SENTINEL_KEY: true })
    } else {
        encoded
    })
}

fn decode<T: DeserializeOwned>(stored: Value) -> Result<T, serde_json::Error> {
    let value = if is_null_sentinel(&stored) {
        Value::Null
    } else {
        stored
    };
    serde_json::from_value(value)
}

fn is_null_sentinel(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get(NULL_SENTINEL_KEY) == Some(&Value::Bool(true)))
}
