//! The caching capability an entity type opts into.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::query::QueryDescriptor;

/// Entity lifecycle changes that may invalidate cached reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
    /// A soft-deleted row was brought back.
    Restored,
}

impl MutationKind {
    pub const ALL: [MutationKind; 4] = [
        MutationKind::Created,
        MutationKind::Updated,
        MutationKind::Deleted,
        MutationKind::Restored,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Created => "created",
            MutationKind::Updated => "updated",
            MutationKind::Deleted => "deleted",
            MutationKind::Restored => "restored",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability implemented by entity types whose reads go through the cache.
///
/// Every method except [`Cacheable::ENTITY`] has a default, so the minimal
/// implementation is a single constant:
///
/// ```
/// use query_cache::domain::Cacheable;
///
/// struct User;
///
/// impl Cacheable for User {
///     const ENTITY: &'static str = "users";
/// }
/// ```
pub trait Cacheable: Send + Sync + 'static {
    /// Entity type name. Used in cache keys, tags and metric labels.
    const ENTITY: &'static str;

    /// Table the entity is read from.
    fn table() -> &'static str {
        Self::ENTITY
    }

    fn primary_key() -> &'static str {
        "id"
    }

    /// Entity-level TTL in seconds. `None` defers to the configured default.
    ///
    /// Zero or negative values are rejected when the policy is resolved.
    fn cache_ttl() -> Option<i64> {
        None
    }

    /// Base name for the collection and identity tags of this entity.
    fn cache_tag() -> &'static str {
        Self::ENTITY
    }

    /// Whether reads of this entity are cached automatically.
    fn cache_enabled() -> bool {
        true
    }

    /// Mutation kinds that invalidate cached reads of this entity.
    fn invalidate_on() -> &'static [MutationKind] {
        &MutationKind::ALL
    }

    /// An unconstrained query over the entity's table.
    fn query() -> QueryDescriptor {
        QueryDescriptor::table(Self::table())
    }
}
