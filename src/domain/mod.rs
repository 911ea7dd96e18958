//! Caller-owned query and entity types.

pub mod entity;
pub mod query;

pub use entity::{Cacheable, MutationKind};
pub use query::{
    AggregateFn, Connective, Direction, Operand, Operator, OrderBy, Predicate, QueryDescriptor,
    Row, Value,
};
