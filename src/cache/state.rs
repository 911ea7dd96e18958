use std::sync::Arc;

use crate::domain::Cacheable;
use crate::engine::QueryEngine;

use super::config::CacheConfig;
use super::consumer::InvalidationConsumer;
use super::decorator::CachingDecorator;
use super::events::EventQueue;
use super::registry::CacheRegistry;
use super::store::{CacheStore, MemoryStore};
use super::trigger::InvalidationManager;

/// Shared cache wiring: one store, registry and event queue per process.
///
/// Clone freely; every field is reference counted.
#[derive(Clone)]
pub struct CacheState {
    pub config: CacheConfig,
    pub store: Arc<dyn CacheStore>,
    pub registry: Arc<CacheRegistry>,
    pub queue: Arc<EventQueue>,
    invalidation: Arc<InvalidationManager>,
}

impl CacheState {
    /// Wire the cache around an in-memory store sized from `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let store = Arc::new(MemoryStore::new(&config));
        Self::new(config, store)
    }

    pub fn new(config: CacheConfig, store: Arc<dyn CacheStore>) -> Self {
        let registry = Arc::new(CacheRegistry::new());
        let queue = Arc::new(EventQueue::with_limit(config.event_queue_limit_non_zero()));
        let consumer = Arc::new(InvalidationConsumer::new(
            config.clone(),
            store.clone(),
            registry.clone(),
            queue.clone(),
        ));
        let invalidation = Arc::new(InvalidationManager::new(
            config.clone(),
            queue.clone(),
            consumer,
        ));

        Self {
            config,
            store,
            registry,
            queue,
            invalidation,
        }
    }

    /// A fresh decorator for reads of `E` through `engine`.
    pub fn decorator<E: Cacheable>(&self, engine: Arc<dyn QueryEngine>) -> CachingDecorator<E> {
        CachingDecorator::new(
            engine,
            self.store.clone(),
            self.registry.clone(),
            self.config.clone(),
        )
    }

    pub fn invalidation(&self) -> &InvalidationManager {
        &self.invalidation
    }
}
