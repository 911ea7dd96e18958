//! Canonical text form of a query.
//!
//! The fingerprint is a SQL-like rendering of every clause that shapes the
//! result set, with bound values embedded as JSON literals. It deliberately
//! keeps predicate order: `a = 1 and b = 2` and `b = 2 and a = 1` produce
//! different fingerprints even though they select the same rows.

use std::fmt::{self, Write as _};

use crate::domain::{Operand, QueryDescriptor, Value};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Render `query` into its canonical form.
    pub fn of(query: &QueryDescriptor) -> Self {
        let mut out = String::from("select ");

        if query.columns().is_empty() {
            out.push('*');
        } else {
            let columns: Vec<String> = query.columns().iter().map(|c| identifier(c)).collect();
            out.push_str(&columns.join(", "));
        }

        out.push_str(" from ");
        out.push_str(&identifier(query.table_name()));

        for (index, predicate) in query.predicates().iter().enumerate() {
            if index == 0 {
                out.push_str(" where ");
            } else {
                out.push(' ');
                out.push_str(predicate.connective.as_str());
                out.push(' ');
            }
            out.push_str(&identifier(&predicate.column));
            out.push(' ');
            out.push_str(predicate.operator.as_str());
            match &predicate.operand {
                Operand::None => {}
                Operand::Single(value) => {
                    out.push(' ');
                    out.push_str(&literal(value));
                }
                Operand::List(values) => {
                    let values: Vec<String> = values.iter().map(literal).collect();
                    let _ = write!(out, " ({})", values.join(", "));
                }
            }
        }

        for (index, order) in query.orders().iter().enumerate() {
            out.push_str(if index == 0 { " order by " } else { ", " });
            out.push_str(&identifier(&order.column));
            out.push(' ');
            out.push_str(order.direction.as_str());
        }

        if let Some(limit) = query.limit_value() {
            let _ = write!(out, " limit {limit}");
        }
        if let Some(offset) = query.offset_value() {
            let _ = write!(out, " offset {offset}");
        }

        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quote an identifier, doubling embedded quotes.
fn identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// JSON text keeps `1` and `"1"` distinct and escapes string contents.
fn literal(value: &Value) -> String {
    value.to_string()
}
