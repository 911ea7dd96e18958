//! Cache keys, tags and scope classification.
//!
//! A key is the SHA-256 of (fingerprint, operation name, operation args),
//! namespaced by key prefix and entity. Identity-scoped queries get their key
//! under a per-id namespace. Hashes are stable across processes so the same
//! key is derived by every instance sharing a store.

use std::collections::HashSet;
use std::fmt;

use serde_json::json;
use sha2::{Digest, Sha256};

use crate::domain::{AggregateFn, Cacheable, Connective, Operand, Operator, QueryDescriptor, Value};

use super::fingerprint::Fingerprint;

/// Key under which one cached result is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invalidation label attached to stored entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(String);

impl Tag {
    /// Covers every query of the entity not constrained solely by primary key.
    pub fn collection(prefix: &str, base: &str) -> Self {
        Self(format!("{prefix}:{base}:collection"))
    }

    /// Covers point lookups of one primary-key value.
    pub fn identity(prefix: &str, base: &str, id: &Value) -> Self {
        Self(format!("{prefix}:{base}:id:{}", id_text(id)))
    }

    /// Attached to every entry of the entity; flushed by the blanket strategy.
    pub fn entity(prefix: &str, base: &str) -> Self {
        Self(format!("{prefix}:{base}:all"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal read operation, with the arguments that shape its result.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Collection read; `columns` overrides the query projection when set.
    Get { columns: Vec<String> },
    First,
    Find { id: Value },
    FindMany { ids: Vec<Value> },
    Pluck { column: String, key: Option<String> },
    Aggregate { function: AggregateFn, column: String },
    Count,
    Exists,
    Paginate { per_page: u64, page: u64 },
    SimplePaginate { per_page: u64, page: u64 },
    /// Caller-defined terminal operation.
    Custom { name: String, args: Value },
}

impl Operation {
    /// Discriminator mixed into the key.
    pub fn name(&self) -> &str {
        match self {
            Operation::Get { .. } => "get",
            Operation::First => "first",
            Operation::Find { .. } => "find",
            Operation::FindMany { .. } => "find_many",
            Operation::Pluck { .. } => "pluck",
            Operation::Aggregate { .. } => "aggregate",
            Operation::Count => "count",
            Operation::Exists => "exists",
            Operation::Paginate { .. } => "paginate",
            Operation::SimplePaginate { .. } => "simple_paginate",
            Operation::Custom { name, .. } => name,
        }
    }

    /// Canonical JSON rendering of the arguments.
    pub fn args(&self) -> Value {
        match self {
            Operation::Get { columns } => json!(columns),
            Operation::First | Operation::Count | Operation::Exists => json!([]),
            Operation::Find { id } => json!([id]),
            Operation::FindMany { ids } => json!(ids),
            Operation::Pluck { column, key } => json!([column, key]),
            Operation::Aggregate { function, column } => json!([function.as_str(), column]),
            Operation::Paginate { per_page, page }
            | Operation::SimplePaginate { per_page, page } => json!([per_page, page]),
            Operation::Custom { args, .. } => args.clone(),
        }
    }
}

/// Invalidation scope of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Scope {
    Collection,
    /// Constrained only by primary-key equality or membership.
    Identity(Vec<Value>),
}

/// Classify `query` by how it constrains `primary_key`.
///
/// A query is identity-scoped only when every predicate is `pk = v` or
/// `pk in (...)` and the resulting id set is non-empty. `and` chains
/// intersect, `or` groups union.
pub fn classify(query: &QueryDescriptor, primary_key: &str) -> Scope {
    let predicates = query.predicates();
    if predicates.is_empty() {
        return Scope::Collection;
    }

    let mut groups: Vec<Vec<Value>> = Vec::new();
    let mut current: Option<Vec<Value>> = None;

    for (index, predicate) in predicates.iter().enumerate() {
        if predicate.column != primary_key {
            return Scope::Collection;
        }
        let ids = match (predicate.operator, &predicate.operand) {
            (Operator::Eq, Operand::Single(value)) => vec![value.clone()],
            (Operator::In, Operand::List(values)) => values.clone(),
            _ => return Scope::Collection,
        };

        if index > 0 && predicate.connective == Connective::Or {
            groups.extend(current.take());
        }
        current = Some(match current {
            None => ids,
            Some(acc) => acc.into_iter().filter(|id| ids.contains(id)).collect(),
        });
    }
    groups.extend(current);

    let mut seen = HashSet::new();
    let ids: Vec<Value> = groups
        .into_iter()
        .flatten()
        .filter(|id| seen.insert(id.to_string()))
        .collect();

    if ids.is_empty() {
        Scope::Collection
    } else {
        Scope::Identity(ids)
    }
}

/// Derives keys and tags for one entity type.
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    prefix: String,
    entity: &'static str,
    tag_base: &'static str,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>, entity: &'static str, tag_base: &'static str) -> Self {
        Self {
            prefix: prefix.into(),
            entity,
            tag_base,
        }
    }

    pub fn for_entity<E: Cacheable>(prefix: impl Into<String>) -> Self {
        Self::new(prefix, E::ENTITY, E::cache_tag())
    }

    pub fn build_key(
        &self,
        fingerprint: &Fingerprint,
        operation: &Operation,
        scope: &Scope,
    ) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(fingerprint.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(operation.name().as_bytes());
        hasher.update(b"\n");
        hasher.update(operation.args().to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());

        let Self { prefix, entity, .. } = self;
        match scope {
            Scope::Identity(ids) if ids.len() == 1 => {
                CacheKey(format!("{prefix}:{entity}:id:{}:{digest}", id_text(&ids[0])))
            }
            Scope::Identity(_) => CacheKey(format!("{prefix}:{entity}:ids:{digest}")),
            Scope::Collection => CacheKey(format!("{prefix}:{entity}:q:{digest}")),
        }
    }

    /// Tags for an entry stored under `scope`.
    pub fn tags_for(&self, scope: &Scope) -> Vec<Tag> {
        let mut tags = match scope {
            Scope::Collection => vec![self.collection_tag()],
            Scope::Identity(ids) => ids.iter().map(|id| self.identity_tag(id)).collect(),
        };
        tags.push(self.entity_tag());
        tags
    }

    pub fn collection_tag(&self) -> Tag {
        Tag::collection(&self.prefix, self.tag_base)
    }

    pub fn identity_tag(&self, id: &Value) -> Tag {
        Tag::identity(&self.prefix, self.tag_base, id)
    }

    pub fn entity_tag(&self) -> Tag {
        Tag::entity(&self.prefix, self.tag_base)
    }
}

/// Bare text for strings, JSON text for everything else.
fn id_text(id: &Value) -> String {
    match id {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
