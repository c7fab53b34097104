//! Backend-native query syntax.
//!
//! [`Predicate`] is the tree a [`crate::formatter::QueryFormatter`] renders
//! validated clause fragments into. Stores either evaluate it directly
//! (see [`Predicate::matches`]) or translate it into their own language.
//! Columns are dotted paths into a JSON document.

use std::cmp::Ordering;
use std::hash::BuildHasherDefault;

use seahash::SeaHasher;
use serde_json::{Map, Value};

use crate::query::Direction;

/// A stored record: a JSON object keyed by database column.
pub type Row = Map<String, Value>;

/// Hasher for the key sets and lookups built while joining rows.
pub type KeyHasher = BuildHasherDefault<SeaHasher>;

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    All,
    /// Matches no row.
    Nothing,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Case-insensitive substring match on the textual form of the column.
    Contains(String, String),
    /// Inclusive on both ends.
    Between(String, Value, Value),
}

impl Predicate {
    pub fn and(mut parts: Vec<Predicate>) -> Self {
        parts.retain(|p| *p != Self::All);
        if parts.contains(&Self::Nothing) {
            return Self::Nothing;
        }
        match parts.len() {
            0 => Self::All,
            1 => parts.remove(0),
            _ => Self::And(parts),
        }
    }

    pub fn or(mut parts: Vec<Predicate>) -> Self {
        parts.retain(|p| *p != Self::Nothing);
        if parts.contains(&Self::All) {
            return Self::All;
        }
        match parts.len() {
            0 => Self::Nothing,
            1 => parts.remove(0),
            _ => Self::Or(parts),
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Self::All => true,
            Self::Nothing => false,
            Self::And(parts) => parts.iter().all(|p| p.matches(row)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(row)),
            Self::Eq(column, expected) => any_scalar(lookup(row, column), |v| json_eq(v, expected)),
            Self::In(column, candidates) => any_scalar(lookup(row, column), |v| {
                candidates.iter().any(|c| json_eq(v, c))
            }),
            Self::Contains(column, needle) => {
                let needle = needle.to_lowercase();
                any_scalar(lookup(row, column), |v| {
                    text_of(v).is_some_and(|t| t.to_lowercase().contains(&needle))
                })
            }
            Self::Between(column, min, max) => any_scalar(lookup(row, column), |v| {
                matches!(compare(v, min), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(v, max), Some(Ordering::Less | Ordering::Equal))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub column: String,
    pub direction: Direction,
}

/// Everything a store needs to answer one `find`.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub predicate: Predicate,
    /// Columns to return; `None` returns whole rows.
    pub projection: Option<Vec<String>>,
    pub sort: Vec<SortKey>,
    pub skip: usize,
    pub limit: Option<usize>,
}

impl FindQuery {
    pub fn all(predicate: Predicate) -> Self {
        Self { predicate, projection: None, sort: Vec::new(), skip: 0, limit: None }
    }
}

/// Resolves a dotted column path inside a row.
pub fn lookup<'r>(row: &'r Row, column: &str) -> Option<&'r Value> {
    let mut parts = column.split('.');
    let mut current = row.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Writes `value` at a dotted column path, creating intermediate objects.
pub fn insert_path(row: &mut Row, column: &str, value: Value) {
    match column.split_once('.') {
        None => {
            row.insert(column.to_owned(), value);
        }
        Some((head, rest)) => {
            let entry = row.entry(head.to_owned()).or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(child) = entry {
                insert_path(child, rest, value);
            }
        }
    }
}

/// Keeps only the given columns of a row.
pub fn project(row: &Row, columns: &[String]) -> Row {
    let mut projected = Row::new();
    for column in columns {
        if let Some(value) = lookup(row, column) {
            insert_path(&mut projected, column, value.clone());
        }
    }
    projected
}

// Array-valued columns match when any element does.
fn any_scalar(value: Option<&Value>, test: impl Fn(&Value) -> bool) -> bool {
    match value {
        None => false,
        Some(Value::Array(items)) => items.iter().any(&test),
        Some(v) => test(v),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lookup key for a join value: `7`, `7.0` and `"7"` all land on `7`.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => format!("{f:.0}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

/// Equality that treats `30` and `30.0` as the same number.
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering between two values of the same kind; `None` across kinds.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Bool(_)) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Object(_)) => 5,
    }
}

/// Total order used for sorting: missing/null < bool < number < string < array < object.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| rank(a).cmp(&rank(b))),
        _ => rank(a).cmp(&rank(b)),
    }
}

pub fn compare_rows(a: &Row, b: &Row, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ordering = sort_order(lookup(a, &key.column), lookup(b, &key.column));
        let ordering = match key.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
