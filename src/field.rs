//! Per-collection field capability gating.
//!
//! A [`FieldConfig`] validates one clause of a [`crate::query::QueryInput`]
//! at a time against the capability table of its collection, renaming
//! public field names to database columns on the way. A value is only
//! honored when the field it names grants the matching capability.

use std::collections::BTreeMap;

use bimap::BiMap;
use serde_json::{Map, Value};

use crate::config::{ClauseKind, CollectionConfig, Field, PublicField};
use crate::error::{Messages, push_message};
use crate::predicate::compare;
use crate::query::{Bound, DEFAULT_LIMIT, DEFAULT_PAGE, Direction, QUERY_KEY};

/// A clause that passed validation, keyed by database column.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Search {
        terms: Vec<(String, Value)>,
        /// Free-text candidates; `free_text` tells whether a `query` was given at all.
        query: Vec<(String, String)>,
        free_text: bool,
    },
    Filter(Vec<(String, Vec<Value>)>),
    Range(Vec<(String, Bound)>),
    Sort(Vec<(String, Direction)>),
}

/// Bidirectional public field <-> database column mapping.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    map: BiMap<String, String>,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mapping unless either side is already taken.
    pub fn insert(&mut self, field: &str, column: &str) -> bool {
        self.map.insert_no_overwrite(field.to_owned(), column.to_owned()).is_ok()
    }

    pub fn column(&self, field: &str) -> Option<&str> {
        self.map.get_by_left(field).map(String::as_str)
    }

    pub fn field(&self, column: &str) -> Option<&str> {
        self.map.get_by_right(column).map(String::as_str)
    }

    /// Pairs of `(field, column)`, ordered by field name.
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<(&str, &str)> =
            self.map.iter().map(|(f, c)| (f.as_str(), c.as_str())).collect();
        pairs.sort_unstable();
        pairs
    }

    pub fn columns(&self) -> Vec<String> {
        self.pairs().into_iter().map(|(_, column)| column.to_owned()).collect()
    }

    pub fn extend(&mut self, other: &Projection) {
        for (field, column) in other.pairs() {
            self.insert(field, column);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Parses a positive integer from a JSON number or an integer string.
pub(crate) fn positive_integer(value: &Value) -> Option<usize> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    usize::try_from(parsed).ok().filter(|n| *n > 0)
}

fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

pub struct FieldConfig<'c> {
    config: &'c CollectionConfig,
    limit: usize,
    page: usize,
}

impl<'c> FieldConfig<'c> {
    pub fn new(config: &'c CollectionConfig) -> Self {
        Self { config, limit: DEFAULT_LIMIT, page: DEFAULT_PAGE }
    }

    pub fn config(&self) -> &'c CollectionConfig {
        self.config
    }

    pub fn prepare(&self, kind: ClauseKind, clause: &Map<String, Value>) -> Result<Prepared, Messages> {
        match kind {
            ClauseKind::Search => self.prepare_search(clause),
            ClauseKind::Filter => self.prepare_filter(clause),
            ClauseKind::Range => self.prepare_range(clause),
            ClauseKind::Sort => self.prepare_sort(clause),
            ClauseKind::Show => {
                let mut messages = Messages::new();
                push_message(&mut messages, kind.input_key(), "not a query clause");
                Err(messages)
            }
        }
    }

    // Looks the field up and checks it grants `kind`, recording why not.
    fn capable(&self, kind: ClauseKind, name: &str, messages: &mut Messages) -> Option<&'c Field> {
        match self.config.get(name) {
            None => {
                push_message(messages, name, "unknown field");
                None
            }
            Some(field) if !field.allows(kind) => {
                push_message(messages, name, format!("field does not allow {}", kind.input_key()));
                None
            }
            Some(field) => Some(field),
        }
    }

    pub fn prepare_search(&self, clause: &Map<String, Value>) -> Result<Prepared, Messages> {
        let mut messages = Messages::new();
        let mut terms = Vec::new();
        let mut query = Vec::new();
        let mut free_text = false;
        for (name, value) in clause {
            if name == QUERY_KEY {
                match value.as_str().map(str::trim) {
                    Some(text) if !text.is_empty() => {
                        free_text = true;
                        query.extend(
                            self.config
                                .fields()
                                .filter(|f| f.search)
                                .map(|f| (f.database_name.clone(), text.to_owned())),
                        );
                    }
                    _ => push_message(&mut messages, QUERY_KEY, "free text must be a non-empty string"),
                }
                continue;
            }
            let Some(field) = self.capable(ClauseKind::Search, name, &mut messages) else {
                continue;
            };
            let blank = value.as_str().is_some_and(|s| s.trim().is_empty());
            if !is_scalar(value) || blank {
                push_message(&mut messages, name, "search value must be a non-empty scalar");
                continue;
            }
            terms.push((field.database_name.clone(), value.clone()));
        }
        if messages.is_empty() {
            Ok(Prepared::Search { terms, query, free_text })
        } else {
            Err(messages)
        }
    }

    pub fn prepare_filter(&self, clause: &Map<String, Value>) -> Result<Prepared, Messages> {
        let mut messages = Messages::new();
        let mut filters = Vec::new();
        for (name, value) in clause {
            let Some(field) = self.capable(ClauseKind::Filter, name, &mut messages) else {
                continue;
            };
            let values = match value {
                Value::Array(items) if !items.is_empty() && items.iter().all(is_scalar) => items.clone(),
                v if is_scalar(v) => vec![v.clone()],
                _ => {
                    push_message(&mut messages, name, "filter value must be a scalar or a non-empty list of scalars");
                    continue;
                }
            };
            filters.push((field.database_name.clone(), values));
        }
        if messages.is_empty() { Ok(Prepared::Filter(filters)) } else { Err(messages) }
    }

    pub fn prepare_range(&self, clause: &Map<String, Value>) -> Result<Prepared, Messages> {
        let mut messages = Messages::new();
        let mut ranges = Vec::new();
        for (name, value) in clause {
            let Some(field) = self.capable(ClauseKind::Range, name, &mut messages) else {
                continue;
            };
            let (Some(min), Some(max)) = (value.get("min"), value.get("max")) else {
                push_message(&mut messages, name, "range needs both min and max");
                continue;
            };
            match compare(min, max) {
                Some(std::cmp::Ordering::Less) => ranges.push((
                    field.database_name.clone(),
                    Bound { min: min.clone(), max: max.clone() },
                )),
                Some(_) => push_message(&mut messages, name, "invalid range: min must be less than max"),
                None => push_message(&mut messages, name, "invalid range: min and max must both be numbers or both be strings"),
            }
        }
        if messages.is_empty() { Ok(Prepared::Range(ranges)) } else { Err(messages) }
    }

    pub fn prepare_sort(&self, clause: &Map<String, Value>) -> Result<Prepared, Messages> {
        let mut messages = Messages::new();
        let mut sort = Vec::new();
        for (name, value) in clause {
            let Some(field) = self.capable(ClauseKind::Sort, name, &mut messages) else {
                continue;
            };
            match Direction::parse(value) {
                Some(direction) => sort.push((field.database_name.clone(), direction)),
                None => push_message(&mut messages, name, "sort must be 'ascending' or 'descending'"),
            }
        }
        if messages.is_empty() { Ok(Prepared::Sort(sort)) } else { Err(messages) }
    }

    /// Resolves the page size; an unusable value keeps the one resolved before.
    pub fn prepare_pagination_limit(&mut self, value: Option<&Value>) -> usize {
        if let Some(limit) = value.and_then(positive_integer) {
            self.limit = limit;
        }
        self.limit
    }

    /// Resolves the page number; an unusable value keeps the one resolved before.
    pub fn prepare_pagination_skip(&mut self, value: Option<&Value>) -> usize {
        if let Some(page) = value.and_then(positive_integer) {
            self.page = page;
        }
        self.page
    }

    /// `field -> databaseName` for every shown field.
    pub fn projection(&self) -> Projection {
        let mut projection = Projection::new();
        for field in self.config.fields().filter(|f| f.show) {
            projection.insert(&field.name, &field.database_name);
        }
        projection
    }

    pub fn public_config(&self) -> BTreeMap<String, PublicField> {
        self.config.fields().map(|f| (f.name.clone(), f.public())).collect()
    }
}
