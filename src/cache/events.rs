//! Mutation events.
//!
//! Entity writes publish a [`Mutation`] into a bounded in-memory queue; the
//! invalidation consumer drains it. When the queue is full the oldest event is
//! folded into an entity-wide flush of its tag base: memory stays bounded and
//! the invalidation is widened rather than lost.

use std::collections::{BTreeSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{MutationKind, Value};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_EVENT_QUEUE_LEN: &str = "query_cache_event_queue_len";
const METRIC_EVENT_DROPPED_TOTAL: &str = "query_cache_event_dropped_total";
const DEFAULT_QUEUE_LIMIT: usize = 1024;

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// A change to one entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub entity: &'static str,
    /// Base name of the entity's tags.
    pub tag_base: &'static str,
    pub kind: MutationKind,
    /// Primary-key value of the affected row.
    pub key: Value,
}

#[derive(Debug, Clone)]
pub struct MutationEvent {
    /// Unique identifier for idempotency (UUIDv4).
    pub id: Uuid,
    pub epoch: Epoch,
    pub mutation: Mutation,
    pub timestamp: OffsetDateTime,
}

impl MutationEvent {
    pub fn new(mutation: Mutation, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            mutation,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Default)]
struct Pending {
    events: VecDeque<MutationEvent>,
    /// Tag bases of events evicted by overflow; each needs an entity flush.
    overflowed: BTreeSet<&'static str>,
}

impl Pending {
    fn fold_excess(&mut self, limit: usize) {
        while self.events.len() > limit {
            let Some(folded) = self.events.pop_front() else {
                break;
            };
            counter!(METRIC_EVENT_DROPPED_TOTAL, "entity" => folded.mutation.entity)
                .increment(1);
            warn!(
                event_id = %folded.id,
                entity = folded.mutation.entity,
                limit,
                "Mutation event queue full; oldest event widened to an entity flush"
            );
            self.overflowed.insert(folded.mutation.tag_base);
        }
    }
}

pub struct EventQueue {
    queue: Mutex<Pending>,
    epoch_counter: AtomicU64,
    limit: NonZeroUsize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_limit(NonZeroUsize::new(DEFAULT_QUEUE_LIMIT).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn with_limit(limit: NonZeroUsize) -> Self {
        Self {
            queue: Mutex::new(Pending::default()),
            epoch_counter: AtomicU64::new(0),
            limit,
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue a mutation. When full, the oldest pending event is replaced by
    /// an entity-wide flush of its tag base.
    pub fn publish(&self, mutation: Mutation) -> Uuid {
        let event = MutationEvent::new(mutation, self.next_epoch());
        let id = event.id;

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            entity = event.mutation.entity,
            kind = %event.mutation.kind,
            key = %event.mutation.key,
            "Mutation event enqueued"
        );

        let mut pending = mutex_lock(&self.queue, SOURCE, "publish");
        pending.events.push_back(event);
        pending.fold_excess(self.limit.get());
        gauge!(METRIC_EVENT_QUEUE_LEN).set(pending.events.len() as f64);

        id
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<MutationEvent> {
        let mut pending = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(pending.events.len());
        let events = pending.events.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(pending.events.len() as f64);
        events
    }

    /// Take the tag bases whose events were widened by overflow.
    pub fn take_overflowed(&self) -> Vec<&'static str> {
        let mut pending = mutex_lock(&self.queue, SOURCE, "take_overflowed");
        std::mem::take(&mut pending.overflowed).into_iter().collect()
    }

    /// Put back a batch that could not be applied, ahead of newer events.
    ///
    /// Events beyond the limit are widened to entity flushes as in
    /// [`publish`](Self::publish).
    pub fn requeue(&self, events: Vec<MutationEvent>, overflowed: Vec<&'static str>) {
        let mut pending = mutex_lock(&self.queue, SOURCE, "requeue");
        for event in events.into_iter().rev() {
            pending.events.push_front(event);
        }
        pending.overflowed.extend(overflowed);
        pending.fold_excess(self.limit.get());
        gauge!(METRIC_EVENT_QUEUE_LEN).set(pending.events.len() as f64);
    }

    /// Number of pending events, not counting widened entity flushes.
    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").events.len()
    }

    /// True when there are neither pending events nor pending entity flushes.
    pub fn is_empty(&self) -> bool {
        let pending = mutex_lock(&self.queue, SOURCE, "is_empty");
        pending.events.is_empty() && pending.overflowed.is_empty()
    }

    pub fn clear(&self) {
        let mut pending = mutex_lock(&self.queue, SOURCE, "clear");
        pending.events.clear();
        pending.overflowed.clear();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}
