//! In-memory query engine.
//!
//! Evaluates a [`QueryDescriptor`] over rows held in process memory.
//! Predicates follow SQL precedence (`and` binds tighter than `or`) and SQL
//! null semantics for comparisons. Counts, existence checks and aggregates
//! ignore limit/offset; collection reads and pages honour them.
//!
//! Every `run_*` call counts as one execution, which makes the engine usable
//! as a probe for how often a caller really reached the data store.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock};

use serde_json::Number;
use tracing::debug;

use crate::domain::{
    AggregateFn, Connective, Direction, Operand, Operator, OrderBy, Predicate, QueryDescriptor,
    Row, Value,
};
use crate::util::lock::{mutex_lock, rw_read, rw_write};

use super::{EngineError, QueryEngine};

const SOURCE: &str = "engine::memory";

static NULL: Value = Value::Null;

#[derive(Default)]
pub struct MemoryEngine {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    executions: AtomicUsize,
    pending_failure: Mutex<Option<String>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed `table` with `rows`, replacing any existing contents.
    pub fn with_table(self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        rw_write(&self.tables, SOURCE, "with_table").insert(table.into(), rows);
        self
    }

    pub fn insert(&self, table: &str, row: Row) {
        rw_write(&self.tables, SOURCE, "insert")
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Merge `changes` into every row whose `column` equals `value`.
    ///
    /// Returns the number of rows touched.
    pub fn update(&self, table: &str, column: &str, value: &Value, changes: &Row) -> usize {
        let mut tables = rw_write(&self.tables, SOURCE, "update");
        let Some(rows) = tables.get_mut(table) else {
            return 0;
        };

        let mut touched = 0;
        for row in rows.iter_mut().filter(|row| row.get(column) == Some(value)) {
            for (name, new_value) in changes {
                row.insert(name.clone(), new_value.clone());
            }
            touched += 1;
        }
        touched
    }

    /// Remove every row whose `column` equals `value`.
    pub fn delete(&self, table: &str, column: &str, value: &Value) -> usize {
        let mut tables = rw_write(&self.tables, SOURCE, "delete");
        let Some(rows) = tables.get_mut(table) else {
            return 0;
        };

        let before = rows.len();
        rows.retain(|row| row.get(column) != Some(value));
        before - rows.len()
    }

    /// Number of `run_*` calls since creation or the last reset.
    pub fn executions(&self) -> usize {
        self.executions.load(AtomicOrdering::SeqCst)
    }

    pub fn reset_executions(&self) {
        self.executions.store(0, AtomicOrdering::SeqCst);
    }

    /// Make the next execution fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *mutex_lock(&self.pending_failure, SOURCE, "fail_next") = Some(message.into());
    }

    /// Matching rows in query order, before limit/offset and projection.
    fn matching(
        &self,
        op: &'static str,
        query: &QueryDescriptor,
    ) -> Result<Vec<Row>, EngineError> {
        self.executions.fetch_add(1, AtomicOrdering::SeqCst);

        let failure = mutex_lock(&self.pending_failure, SOURCE, "take_failure").take();
        if let Some(message) = failure {
            return Err(EngineError::query(message));
        }

        let tables = rw_read(&self.tables, SOURCE, op);
        let rows = tables
            .get(query.table_name())
            .ok_or_else(|| EngineError::UnknownTable {
                table: query.table_name().to_string(),
            })?;

        let mut matched: Vec<Row> = rows
            .iter()
            .filter(|row| matches(row, query.predicates()))
            .cloned()
            .collect();
        sort(&mut matched, query.orders());

        debug!(
            op,
            table = query.table_name(),
            matched = matched.len(),
            "Memory engine executed query"
        );
        Ok(matched)
    }
}

impl QueryEngine for MemoryEngine {
    fn run_collection(&self, query: &QueryDescriptor) -> Result<Vec<Row>, EngineError> {
        let rows = self.matching("run_collection", query)?;
        Ok(project(window(rows, query), query.columns()))
    }

    fn run_single(&self, query: &QueryDescriptor) -> Result<Option<Row>, EngineError> {
        let rows = self.matching("run_single", query)?;
        let first = window(rows, query).into_iter().take(1).collect();
        Ok(project(first, query.columns()).into_iter().next())
    }

    fn run_aggregate(
        &self,
        query: &QueryDescriptor,
        function: AggregateFn,
        column: &str,
    ) -> Result<Value, EngineError> {
        let rows = self.matching("run_aggregate", query)?;
        Ok(aggregate(&rows, function, column))
    }

    fn run_count(&self, query: &QueryDescriptor) -> Result<u64, EngineError> {
        let rows = self.matching("run_count", query)?;
        Ok(rows.len() as u64)
    }

    fn run_exists(&self, query: &QueryDescriptor) -> Result<bool, EngineError> {
        let rows = self.matching("run_exists", query)?;
        Ok(!rows.is_empty())
    }

    fn run_paginated(
        &self,
        query: &QueryDescriptor,
        per_page: u64,
        page: u64,
    ) -> Result<(Vec<Row>, u64), EngineError> {
        let rows = self.matching("run_paginated", query)?;
        let total = rows.len() as u64;
        let items = page_slice(rows, per_page, page, per_page);
        Ok((project(items, query.columns()), total))
    }

    fn run_paginated_simple(
        &self,
        query: &QueryDescriptor,
        per_page: u64,
        page: u64,
    ) -> Result<Vec<Row>, EngineError> {
        let rows = self.matching("run_paginated_simple", query)?;
        let items = page_slice(rows, per_page, page, per_page.saturating_add(1));
        Ok(project(items, query.columns()))
    }
}

fn window(rows: Vec<Row>, query: &QueryDescriptor) -> Vec<Row> {
    let offset = query.offset_value().unwrap_or(0) as usize;
    let rows = rows.into_iter().skip(offset);
    match query.limit_value() {
        Some(limit) => rows.take(limit as usize).collect(),
        None => rows.collect(),
    }
}

fn page_slice(rows: Vec<Row>, per_page: u64, page: u64, take: u64) -> Vec<Row> {
    let skip = page.max(1).saturating_sub(1).saturating_mul(per_page) as usize;
    rows.into_iter().skip(skip).take(take as usize).collect()
}

fn project(rows: Vec<Row>, columns: &[String]) -> Vec<Row> {
    if columns.is_empty() {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let value = row.get(column).cloned().unwrap_or(Value::Null);
                    (column.clone(), value)
                })
                .collect::<Row>()
        })
        .collect()
}

/// Evaluate the predicate chain as a disjunction of `and` groups.
fn matches(row: &Row, predicates: &[Predicate]) -> bool {
    let mut any_group = false;
    let mut group = true;
    for (index, predicate) in predicates.iter().enumerate() {
        if index > 0 && predicate.connective == Connective::Or {
            any_group |= group;
            group = true;
        }
        group = group && evaluate(row, predicate);
    }
    any_group || group
}

fn evaluate(row: &Row, predicate: &Predicate) -> bool {
    let actual = row.get(&predicate.column).unwrap_or(&NULL);
    match (predicate.operator, &predicate.operand) {
        (Operator::IsNull, _) => actual.is_null(),
        (Operator::IsNotNull, _) => !actual.is_null(),
        (Operator::In, Operand::List(values)) => values.iter().any(|v| equals(actual, v)),
        (Operator::NotIn, Operand::List(values)) => {
            !actual.is_null() && !values.iter().any(|v| equals(actual, v))
        }
        (Operator::Like, Operand::Single(Value::String(pattern))) => {
            actual.as_str().is_some_and(|text| like(text, pattern))
        }
        (operator, Operand::Single(expected)) => {
            let ordering = compare(actual, expected);
            match operator {
                Operator::Eq => ordering == Some(Ordering::Equal),
                Operator::NotEq => ordering.is_some_and(|o| o != Ordering::Equal),
                Operator::Lt => ordering == Some(Ordering::Less),
                Operator::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                Operator::Gt => ordering == Some(Ordering::Greater),
                Operator::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                _ => false,
            }
        }
        _ => false,
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    compare(left, right) == Some(Ordering::Equal)
}

/// Order two non-null values of the same kind. Mixed kinds and nulls are
/// incomparable.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => Some(x.cmp(&y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_from(&text, &pattern)
}

fn like_from(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('%', rest)) => (0..=text.len()).any(|skip| like_from(&text[skip..], rest)),
        Some(('_', rest)) => !text.is_empty() && like_from(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_from(&text[1..], rest),
    }
}

fn sort(rows: &mut [Row], orders: &[OrderBy]) {
    if orders.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for order in orders {
            let left = a.get(&order.column).unwrap_or(&NULL);
            let right = b.get(&order.column).unwrap_or(&NULL);
            // nulls sort first ascending
            let ordering = match (left.is_null(), right.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
            };
            let ordering = match order.direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn aggregate(rows: &[Row], function: AggregateFn, column: &str) -> Value {
    let values: Vec<&Value> = rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|value| !value.is_null())
        .collect();

    match function {
        AggregateFn::Sum => {
            if values.iter().all(|value| value.is_i64()) {
                Value::from(values.iter().filter_map(|value| value.as_i64()).sum::<i64>())
            } else {
                float(values.iter().filter_map(|value| value.as_f64()).sum())
            }
        }
        AggregateFn::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(|value| value.as_f64()).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        AggregateFn::Min => values
            .iter()
            .copied()
            .min_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
            .cloned()
            .unwrap_or(Value::Null),
        AggregateFn::Max => values
            .iter()
            .copied()
            .max_by(|a, b| compare(a, b).unwrap_or(Ordering::Equal))
            .cloned()
            .unwrap_or(Value::Null),
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
