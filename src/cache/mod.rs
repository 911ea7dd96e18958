//! Query result cache.
//!
//! Wraps a [`QueryEngine`](crate::engine::QueryEngine) with read-through
//! caching keyed by query fingerprint, and invalidates cached reads through
//! tags when entities change.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! default_ttl_seconds = 600
//! key_prefix = "query-cache"
//! invalidation = "scoped"   # or "blanket"
//! tagless_fallback = "none" # or "track_keys"
//!
//! [store]
//! capacity = 10000
//! ```

mod config;
mod consumer;
mod decorator;
mod error;
mod events;
mod fingerprint;
mod keys;
mod planner;
mod registry;
mod state;
mod store;
mod trigger;
mod ttl;

pub use config::{CacheConfig, InvalidationStrategy, TaglessFallback};
pub use consumer::InvalidationConsumer;
pub use decorator::{CachingDecorator, NULL_SENTINEL_KEY, Page, SimplePage};
pub use error::CacheError;
pub use events::{Epoch, EventQueue, Mutation, MutationEvent};
pub use fingerprint::Fingerprint;
pub use keys::{CacheKey, KeyBuilder, Operation, Scope, Tag, classify};
pub use planner::FlushPlan;
pub use registry::CacheRegistry;
pub use state::CacheState;
pub use store::{
    CacheStore, EntryDescription, Expiry, MemoryStore, StoreError, TagStore, TaggedCache,
};
pub use trigger::InvalidationManager;
pub use ttl::{CallMode, DEFAULT_TTL_SECONDS, ExpirationPolicy, TtlResolver};
