//! Invalidation entry points for entity writes.
//!
//! Callers report mutations here after a successful write. Each hook
//! publishes an event and consumes the queue immediately, so the flush
//! happens before the hook returns.
//!
//! ```ignore
//! engine.update("users", "id", &json!(7), &changes);
//! invalidation.updated::<User>(7)?;
//! ```

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::domain::{Cacheable, MutationKind, Value};

use super::config::CacheConfig;
use super::consumer::InvalidationConsumer;
use super::error::CacheError;
use super::events::{EventQueue, Mutation};
use super::keys::Tag;

pub struct InvalidationManager {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<InvalidationConsumer>,
}

impl InvalidationManager {
    pub fn new(
        config: CacheConfig,
        queue: Arc<EventQueue>,
        consumer: Arc<InvalidationConsumer>,
    ) -> Self {
        Self {
            config,
            queue,
            consumer,
        }
    }

    pub fn created<E: Cacheable>(&self, key: impl Into<Value>) -> Result<(), CacheError> {
        self.notify::<E>(MutationKind::Created, key)
    }

    pub fn updated<E: Cacheable>(&self, key: impl Into<Value>) -> Result<(), CacheError> {
        self.notify::<E>(MutationKind::Updated, key)
    }

    pub fn deleted<E: Cacheable>(&self, key: impl Into<Value>) -> Result<(), CacheError> {
        self.notify::<E>(MutationKind::Deleted, key)
    }

    pub fn restored<E: Cacheable>(&self, key: impl Into<Value>) -> Result<(), CacheError> {
        self.notify::<E>(MutationKind::Restored, key)
    }

    /// Publish a mutation and flush immediately.
    pub fn notify<E: Cacheable>(
        &self,
        kind: MutationKind,
        key: impl Into<Value>,
    ) -> Result<(), CacheError> {
        if self.publish::<E>(kind, key).is_some() {
            self.flush_pending()?;
        }
        Ok(())
    }

    /// Enqueue a mutation without consuming it.
    ///
    /// Returns the event id, or `None` when the cache is disabled or the
    /// entity does not invalidate on `kind`.
    pub fn publish<E: Cacheable>(&self, kind: MutationKind, key: impl Into<Value>) -> Option<Uuid> {
        if !self.config.is_enabled() {
            debug!(entity = E::ENTITY, %kind, "Invalidation skipped: cache disabled");
            return None;
        }
        if !E::invalidate_on().contains(&kind) {
            debug!(entity = E::ENTITY, %kind, "Invalidation skipped: kind not subscribed");
            return None;
        }

        Some(self.queue.publish(Mutation {
            entity: E::ENTITY,
            tag_base: E::cache_tag(),
            kind,
            key: key.into(),
        }))
    }

    /// Consume every pending event.
    pub fn flush_pending(&self) -> Result<(), CacheError> {
        while self.consumer.consume()? {}
        Ok(())
    }

    /// Drop every cached read of `E`. Returns the number of entries removed.
    pub fn flush_entity<E: Cacheable>(&self) -> Result<u64, CacheError> {
        let tag = Tag::entity(&self.config.key_prefix, E::cache_tag());
        self.consumer.flush(&[tag])
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<InvalidationConsumer> {
        &self.consumer
    }
}
