//! Invalidation consumer.
//!
//! Drains mutation events, merges them into a [`FlushPlan`] and flushes the
//! planned tags from the store.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::config::{CacheConfig, TaglessFallback};
use super::error::CacheError;
use super::events::EventQueue;
use super::keys::Tag;
use super::planner::FlushPlan;
use super::registry::CacheRegistry;
use super::store::CacheStore;

const METRIC_CACHE_CONSUME_MS: &str = "query_cache_consume_ms";
const METRIC_CACHE_FLUSH_TOTAL: &str = "query_cache_flush_total";

pub struct InvalidationConsumer {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    registry: Arc<CacheRegistry>,
    queue: Arc<EventQueue>,
}

impl InvalidationConsumer {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        registry: Arc<CacheRegistry>,
        queue: Arc<EventQueue>,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            queue,
        }
    }

    /// Consume one batch of pending events.
    ///
    /// Returns true if any events were processed. Entity flushes left by queue
    /// overflow ride along with the batch. If the store fails, the batch is put
    /// back at the front of the queue and the error is returned.
    #[instrument(skip(self))]
    pub fn consume(&self) -> Result<bool, CacheError> {
        let consume_started_at = Instant::now();
        let events = self
            .queue
            .drain(self.config.consume_batch_limit_non_zero().get());
        let overflowed = self.queue.take_overflowed();
        if events.is_empty() && overflowed.is_empty() {
            return Ok(false);
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = FlushPlan::from_events(
            events.iter().cloned(),
            self.config.invalidation,
            &self.config.key_prefix,
        )
        .with_entities(overflowed.iter().copied(), &self.config.key_prefix);

        info!(
            event_count,
            event_ids = ?event_ids,
            overflowed = ?overflowed,
            plan = %plan,
            "Invalidation starting"
        );

        let removed = if plan.is_empty() {
            0
        } else {
            match self.flush(&plan.tag_list()) {
                Ok(removed) => removed,
                Err(err) => {
                    warn!(
                        event_count,
                        error = %err,
                        "Invalidation failed; batch requeued"
                    );
                    self.queue.requeue(events, overflowed);
                    return Err(err);
                }
            }
        };

        info!(
            event_count,
            tags = plan.tags.len(),
            removed,
            "Invalidation complete"
        );

        histogram!(
            METRIC_CACHE_CONSUME_MS,
            "strategy" => self.config.invalidation.to_string()
        )
        .record(consume_started_at.elapsed().as_secs_f64() * 1000.0);

        Ok(true)
    }

    /// Remove every entry carrying any of `tags`. Returns the number removed.
    ///
    /// Stores without tag support fall back to the key registry, or do
    /// nothing, depending on [`TaglessFallback`].
    pub fn flush(&self, tags: &[Tag]) -> Result<u64, CacheError> {
        counter!(METRIC_CACHE_FLUSH_TOTAL).increment(tags.len() as u64);

        if let Some(tag_store) = self.store.tags() {
            return Ok(tag_store.flush_tags(tags)?);
        }

        match self.config.tagless_fallback {
            TaglessFallback::TrackKeys => {
                let mut removed = 0;
                for key in self.registry.take_keys_for_tags(tags) {
                    if self.store.forget(&key)? {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
            TaglessFallback::None => {
                warn!(
                    tags = tags.len(),
                    "Store lacks tag support; entries stay until they expire"
                );
                Ok(0)
            }
        }
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }
}
