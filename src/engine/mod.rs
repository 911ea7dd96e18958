//! Query engine seam.
//!
//! The cache layer never executes queries itself; it delegates every miss to
//! a [`QueryEngine`]. [`MemoryEngine`] is an in-process implementation that
//! evaluates descriptors over rows held in memory.

mod memory;

use thiserror::Error;

use crate::domain::{AggregateFn, QueryDescriptor, Row, Value};

pub use memory::MemoryEngine;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("query failed: {message}")]
    Query { message: String },
    #[error("unknown table `{table}`")]
    UnknownTable { table: String },
    #[error("engine backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl EngineError {
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(err))
    }
}

/// Executes structured queries against a data store.
///
/// Implementations must be safe to share across threads; the cache layer
/// holds them behind an `Arc` and performs no synchronisation of its own.
pub trait QueryEngine: Send + Sync {
    /// All rows matching the query, in query order.
    fn run_collection(&self, query: &QueryDescriptor) -> Result<Vec<Row>, EngineError>;

    /// The first matching row, if any.
    fn run_single(&self, query: &QueryDescriptor) -> Result<Option<Row>, EngineError>;

    /// Aggregate over `column` of the matching rows. Empty input yields
    /// `0` for sums and `null` otherwise.
    fn run_aggregate(
        &self,
        query: &QueryDescriptor,
        function: AggregateFn,
        column: &str,
    ) -> Result<Value, EngineError>;

    fn run_count(&self, query: &QueryDescriptor) -> Result<u64, EngineError>;

    fn run_exists(&self, query: &QueryDescriptor) -> Result<bool, EngineError>;

    /// One page of rows plus the total number of matching rows.
    /// `page` is 1-based.
    fn run_paginated(
        &self,
        query: &QueryDescriptor,
        per_page: u64,
        page: u64,
    ) -> Result<(Vec<Row>, u64), EngineError>;

    /// One page of rows without a total. Returns up to `per_page + 1` rows so
    /// the caller can tell whether another page follows.
    fn run_paginated_simple(
        &self,
        query: &QueryDescriptor,
        per_page: u64,
        page: u64,
    ) -> Result<Vec<Row>, EngineError>;
}
