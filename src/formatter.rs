//! Turns a [`QueryInput`] into backend-native syntax.
//!
//! The first pass runs on construction: every clause except `page`/`limit`
//! goes through [`FieldConfig::prepare`], and messages from all clauses are
//! accumulated so a rejection names every offending field at once. Any
//! message invalidates the whole request. Pagination is resolved regardless.
//! The `render_*` pass then builds the [`Predicate`], sort keys and page
//! window from the validated fragments plus whatever constraints a caller
//! pushed in through [`QueryFormatter::update_query`].

use serde_json::Value;
use tracing::debug;

use crate::error::{GridError, Messages, merge_messages};
use crate::field::{FieldConfig, Prepared};
use crate::predicate::{Predicate, SortKey};
use crate::query::{Conditions, Pagination, QueryInput};

/// A constraint discovered outside this collection: `column IN keys`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub column: String,
    pub keys: Vec<Value>,
}

pub struct QueryFormatter<'c> {
    fields: FieldConfig<'c>,
    conditions: Conditions,
    messages: Messages,
    pagination: Pagination,
}

impl<'c> QueryFormatter<'c> {
    pub fn new(mut fields: FieldConfig<'c>, input: &QueryInput) -> Self {
        let mut conditions = Conditions::default();
        let mut messages = Messages::new();
        for (kind, clause) in input.clauses() {
            match fields.prepare(kind, clause) {
                Ok(prepared) => absorb(&mut conditions, prepared),
                Err(failed) => merge_messages(&mut messages, failed),
            }
        }
        let limit = fields.prepare_pagination_limit(input.limit.as_ref());
        let page = fields.prepare_pagination_skip(input.page.as_ref());
        if !messages.is_empty() {
            debug!(fields = messages.len(), "query input rejected");
        }
        Self { fields, conditions, messages, pagination: Pagination::new(limit, page) }
    }

    pub fn fields(&self) -> &FieldConfig<'c> {
        &self.fields
    }

    pub fn is_valid(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    pub fn conditions(&self) -> &Conditions {
        &self.conditions
    }

    /// The aggregate rejection, if any clause failed.
    pub fn error(&self) -> Option<GridError> {
        (!self.is_valid()).then(|| GridError::Validation(self.messages.clone()))
    }

    /// Appends externally resolved constraints: `filter` is AND-ed with the
    /// rest of the predicate, `query` joins the free-text alternatives.
    pub fn update_query(&mut self, filter: Option<Constraint>, query: Option<Constraint>) {
        if let Some(Constraint { column, keys }) = filter {
            self.conditions.filters.push((column, keys));
        }
        if let Some(Constraint { column, keys }) = query {
            self.conditions.merge_query.push((column, keys));
        }
    }

    pub fn render_predicate(&self) -> Predicate {
        let c = &self.conditions;
        let mut parts = Vec::new();
        if c.free_text || !c.merge_query.is_empty() {
            let alternatives = c
                .query
                .iter()
                .map(|(column, text)| Predicate::Contains(column.clone(), text.clone()))
                .chain(c.merge_query.iter().map(|(column, keys)| Predicate::In(column.clone(), keys.clone())))
                .collect();
            parts.push(Predicate::or(alternatives));
        }
        parts.extend(c.search.iter().map(|(column, value)| match value {
            Value::String(text) => Predicate::Contains(column.clone(), text.clone()),
            other => Predicate::Eq(column.clone(), other.clone()),
        }));
        parts.extend(c.filters.iter().map(|(column, values)| Predicate::In(column.clone(), values.clone())));
        parts.extend(
            c.range
                .iter()
                .map(|(column, bound)| Predicate::Between(column.clone(), bound.min.clone(), bound.max.clone())),
        );
        Predicate::and(parts)
    }

    pub fn render_sort(&self) -> Vec<SortKey> {
        self.conditions
            .sort
            .iter()
            .map(|(column, direction)| SortKey { column: column.clone(), direction: *direction })
            .collect()
    }

    pub fn render_pagination(&self) -> Pagination {
        self.pagination
    }
}

fn absorb(conditions: &mut Conditions, prepared: Prepared) {
    match prepared {
        Prepared::Search { terms, query, free_text } => {
            conditions.search.extend(terms);
            conditions.query.extend(query);
            conditions.free_text |= free_text;
        }
        Prepared::Filter(filters) => conditions.filters.extend(filters),
        Prepared::Range(range) => conditions.range.extend(range),
        Prepared::Sort(sort) => conditions.sort.extend(sort),
    }
}
