//! Flush plan generation.
//!
//! Merges a batch of mutation events into the set of tags to flush.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use super::config::InvalidationStrategy;
use super::events::MutationEvent;
use super::keys::Tag;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FlushPlan {
    pub tags: BTreeSet<Tag>,
    /// Events that contributed after deduplication.
    pub event_count: usize,
}

impl fmt::Display for FlushPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FlushPlan {{ events: {}, tags: {} }}",
            self.event_count,
            self.tags.len()
        )
    }
}

impl FlushPlan {
    /// Merge `events` into one plan.
    ///
    /// Events are deduplicated by id. Under the scoped strategy every
    /// mutation flushes the entity's collection tag and the identity tag of
    /// its own key; a create cannot change any other identity entry, but a
    /// cached miss for the new key must go. Under the blanket strategy any
    /// mutation flushes the entity tag.
    pub fn from_events(
        events: impl IntoIterator<Item = MutationEvent>,
        strategy: InvalidationStrategy,
        prefix: &str,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut plan = Self::default();

        for event in events {
            if !seen.insert(event.id) {
                continue;
            }
            plan.event_count += 1;

            let mutation = &event.mutation;
            let base = mutation.tag_base;
            match strategy {
                InvalidationStrategy::Blanket => {
                    plan.tags.insert(Tag::entity(prefix, base));
                }
                InvalidationStrategy::Scoped => {
                    plan.tags.insert(Tag::collection(prefix, base));
                    plan.tags.insert(Tag::identity(prefix, base, &mutation.key));
                }
            }
        }

        plan
    }

    /// Add the entity tag of each base, for events that overflowed the queue.
    pub fn with_entities<'a>(
        mut self,
        bases: impl IntoIterator<Item = &'a str>,
        prefix: &str,
    ) -> Self {
        for base in bases {
            self.tags.insert(Tag::entity(prefix, base));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tag_list(&self) -> Vec<Tag> {
        self.tags.iter().cloned().collect()
    }
}
