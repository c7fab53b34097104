//! Local store capability consumed by [`crate::grid::CollectionGrid`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;

use serde_json::Value;

use crate::error::{GridError, Result};
use crate::predicate::{FindQuery, Predicate, Row, compare_rows, project};

/// Asynchronous read access to named collections of JSON rows.
pub trait Store: Send + Sync {
    fn count(&self, collection: &str, predicate: &Predicate) -> impl Future<Output = Result<usize>> + Send;
    fn find(&self, collection: &str, query: &FindQuery) -> impl Future<Output = Result<Vec<Row>>> + Send;
}

/// Every value must be a JSON object to be stored as a row.
pub(crate) fn into_rows(rows: impl IntoIterator<Item = Value>) -> Result<Vec<Row>> {
    rows.into_iter()
        .map(|value| match value {
            Value::Object(row) => Ok(row),
            other => Err(GridError::InvalidInput(format!("a row must be an object, got {other}"))),
        })
        .collect()
}

/// Collections held in memory and evaluated with [`Predicate::matches`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, rows: impl IntoIterator<Item = Value>) -> Result<usize> {
        let rows = into_rows(rows)?;
        let added = rows.len();
        self.collections
            .write()?
            .entry(collection.to_owned())
            .or_default()
            .extend(rows);
        Ok(added)
    }

    pub fn len(&self, collection: &str) -> Result<usize> {
        Ok(self.collections.read()?.get(collection).map_or(0, Vec::len))
    }
}

impl Store for MemoryStore {
    async fn count(&self, collection: &str, predicate: &Predicate) -> Result<usize> {
        let collections = self.collections.read()?;
        Ok(collections
            .get(collection)
            .map_or(0, |rows| rows.iter().filter(|row| predicate.matches(row)).count()))
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Row>> {
        let collections = self.collections.read()?;
        let Some(rows) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut matched: Vec<&Row> = rows.iter().filter(|row| query.predicate.matches(row)).collect();
        if !query.sort.is_empty() {
            // stable, so ties keep insertion order
            matched.sort_by(|a, b| compare_rows(a, b, &query.sort));
        }
        let window = matched.into_iter().skip(query.skip).take(query.limit.unwrap_or(usize::MAX));
        Ok(match &query.projection {
            Some(columns) => window.map(|row| project(row, columns)).collect(),
            None => window.cloned().collect(),
        })
    }
}
