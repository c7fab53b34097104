//! The primary grid: one paginated query against the local store.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use futures_util::future::try_join;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{CollectionConfig, Field, JoinDescriptor};
use crate::error::{GridError, Messages, Result};
use crate::field::{FieldConfig, Projection};
use crate::formatter::{Constraint, QueryFormatter};
use crate::predicate::{FindQuery, KeyHasher, Predicate, Row, insert_path, key_string, lookup};
use crate::query::{Pagination, QueryInput};
use crate::store::Store;

/// Rows of one page plus the pagination they were cut with.
#[derive(Debug, Clone, PartialEq)]
pub struct GridResult {
    pub rows: Vec<Row>,
    pub pagination: Pagination,
}

/// Executes count + find against a [`Store`] for one request.
///
/// An instance is built per request and discarded afterwards; `fetch` may
/// run once. Validation happens on construction, so a grid built from a bad
/// input still constructs and only rejects when fetched.
pub struct CollectionGrid<'a, S: Store> {
    store: &'a S,
    collection: &'a str,
    input: QueryInput,
    formatter: QueryFormatter<'a>,
    extra_columns: Vec<String>,
    fetched: bool,
}

impl<'a, S: Store> CollectionGrid<'a, S> {
    /// Pre-validates the raw input shape, then validates every clause.
    pub fn new(store: &'a S, collection: &'a str, config: &'a CollectionConfig, input: &Value) -> Result<Self> {
        let input = QueryInput::from_value(input)?;
        Ok(Self::from_input(store, collection, config, input))
    }

    pub fn from_input(store: &'a S, collection: &'a str, config: &'a CollectionConfig, input: QueryInput) -> Self {
        let formatter = QueryFormatter::new(FieldConfig::new(config), &input);
        Self { store, collection, input, formatter, extra_columns: Vec::new(), fetched: false }
    }

    pub fn config(&self) -> &'a CollectionConfig {
        self.formatter.fields().config()
    }

    pub fn input(&self) -> &QueryInput {
        &self.input
    }

    pub fn messages(&self) -> &Messages {
        self.formatter.messages()
    }

    pub fn formatter(&self) -> &QueryFormatter<'a> {
        &self.formatter
    }

    pub fn projection(&self) -> Projection {
        self.formatter.fields().projection()
    }

    /// Appends constraints discovered elsewhere; must precede `fetch`.
    pub fn update_query(&mut self, filter: Option<Constraint>, query: Option<Constraint>) {
        self.formatter.update_query(filter, query);
    }

    /// Makes `fetch` return `column` even when no shown field maps to it.
    pub fn require_column(&mut self, column: &str) {
        if !self.extra_columns.iter().any(|c| c == column) {
            self.extra_columns.push(column.to_owned());
        }
    }

    pub async fn fetch(&mut self) -> Result<GridResult> {
        if self.fetched {
            return Err(GridError::Phase(format!("grid over '{}' was already fetched", self.collection)));
        }
        self.fetched = true;
        if let Some(error) = self.formatter.error() {
            warn!(collection = self.collection, %error, "fetch rejected");
            return Err(error);
        }
        let started = Instant::now();
        let predicate = self.formatter.render_predicate();
        let mut pagination = self.formatter.render_pagination();
        let mut columns = self.projection().columns();
        for column in &self.extra_columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
        let query = FindQuery {
            predicate: predicate.clone(),
            projection: Some(columns),
            sort: self.formatter.render_sort(),
            skip: pagination.skip,
            limit: Some(pagination.limit),
        };
        debug!(collection = self.collection, ?predicate, "fetching");
        // count and find share one predicate so the page and the total agree
        let (total, mut rows) = try_join(
            self.store.count(self.collection, &predicate),
            self.store.find(self.collection, &query),
        )
        .await?;
        rows.truncate(pagination.limit);
        pagination.total = total.max(rows.len());
        self.expand_joins(&mut rows).await?;
        info!(
            collection = self.collection,
            rows = rows.len(),
            total = pagination.total,
            ms = started.elapsed().as_secs_f64() * 1000.0,
            "fetch complete"
        );
        Ok(GridResult { rows, pagination })
    }

    async fn expand_joins(&self, rows: &mut [Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        for field in self.config().fields().filter(|f| f.show) {
            if let Some(join) = &field.join {
                self.expand_join(field, join, rows).await?;
            }
        }
        Ok(())
    }

    // Replaces the id(s) held by `field` with the matching records of `join.model`.
    async fn expand_join(&self, field: &Field, join: &JoinDescriptor, rows: &mut [Row]) -> Result<()> {
        let mut seen = HashSet::with_hasher(KeyHasher::default());
        let mut keys = Vec::new();
        for row in rows.iter() {
            let values = match lookup(row, &field.database_name) {
                Some(Value::Array(items)) => items.iter().collect::<Vec<_>>(),
                Some(Value::Null) | None => Vec::new(),
                Some(value) => vec![value],
            };
            for value in values {
                if seen.insert(key_string(value)) {
                    keys.push(value.clone());
                }
            }
        }
        if keys.is_empty() {
            return Ok(());
        }
        let projection = (!join.fields.is_empty()).then(|| {
            let mut columns: Vec<String> = Vec::new();
            for column in join.fields.iter().chain(&join.exclude).map(String::as_str).chain([join.key()]) {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.to_owned());
                }
            }
            columns
        });
        let mut query = FindQuery::all(Predicate::In(join.key().to_owned(), keys));
        query.projection = projection;
        let related = self.store.find(&join.model, &query).await?;
        let by_key: HashMap<String, Row, KeyHasher> = related
            .into_iter()
            .filter_map(|record| Some((key_string(lookup(&record, join.key())?), record)))
            .collect();
        debug!(field = %field.name, model = %join.model, matched = by_key.len(), "join expanded");
        let resolve = |value: &Value| by_key.get(&key_string(value)).cloned().map(Value::Object);
        for row in rows.iter_mut() {
            let expanded = match lookup(row, &field.database_name) {
                Some(Value::Array(items)) => Value::Array(items.iter().filter_map(resolve).collect()),
                Some(Value::Null) | None => continue,
                Some(value) => resolve(value).unwrap_or(Value::Null),
            };
            insert_path(row, field.source(), expanded);
        }
        Ok(())
    }
}
