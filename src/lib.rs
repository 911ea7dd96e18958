//! Read-through query caching with tag-based invalidation.
//!
//! A [`cache::CachingDecorator`] sits in front of a [`engine::QueryEngine`]
//! and caches the result of every terminal read under a key derived from the
//! query's fingerprint and the operation. Entity writes reported to the
//! [`cache::InvalidationManager`] flush the affected tags.
//!
//! ```
//! use std::sync::Arc;
//!
//! use query_cache::cache::{CacheConfig, CacheState};
//! use query_cache::domain::Cacheable;
//! use query_cache::engine::MemoryEngine;
//!
//! struct User;
//!
//! impl Cacheable for User {
//!     const ENTITY: &'static str = "users";
//! }
//!
//! let engine = Arc::new(MemoryEngine::new().with_table("users", Vec::new()));
//! let state = CacheState::in_memory(CacheConfig::default());
//! let users = state.decorator::<User>(engine.clone());
//!
//! let query = User::query().where_eq("active", true);
//! assert_eq!(users.count(&query)?, 0);
//! assert_eq!(users.count(&query)?, 0);
//! assert_eq!(engine.executions(), 1);
//!
//! state.invalidation().created::<User>(1)?;
//! users.count(&query)?;
//! assert_eq!(engine.executions(), 2);
//! # Ok::<(), query_cache::cache::CacheError>(())
//! ```

pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod infra;
mod util;
