//! The generic query DSL accepted from clients, and the intermediate shapes
//! it is validated into.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::ClauseKind;
use crate::error::{GridError, Result};

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_PAGE: usize = 1;

/// `{searchKeyword?, filter?, range?, sort?, page?, limit?}`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_keyword: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<Value>,
}

/// Key of the free-text entry inside `searchKeyword`.
pub const QUERY_KEY: &str = "query";

fn container(key: &str, value: &Value) -> Result<Option<Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map.clone())),
        _ => Err(GridError::InvalidInput(format!("'{key}' must be an object"))),
    }
}

fn pagination_value(key: &str, value: &Value) -> Result<Option<Value>> {
    match value {
        Value::Null => Ok(None),
        Value::Number(_) | Value::String(_) => Ok(Some(value.clone())),
        _ => Err(GridError::InvalidInput(format!("'{key}' must be numeric"))),
    }
}

impl QueryInput {
    /// Shape pre-validation: clause containers must be objects, `page` and
    /// `limit` numeric, and no unknown top-level keys.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => return Err(GridError::InvalidInput("query input must be an object".into())),
        };
        let mut input = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "searchKeyword" => input.search_keyword = container(key, value)?,
                "filter" => input.filter = container(key, value)?,
                "range" => input.range = container(key, value)?,
                "sort" => input.sort = container(key, value)?,
                "page" => input.page = pagination_value(key, value)?,
                "limit" => input.limit = pagination_value(key, value)?,
                other => {
                    return Err(GridError::InvalidInput(format!("unknown clause '{other}'")));
                }
            }
        }
        Ok(input)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn clause(&self, kind: ClauseKind) -> Option<&Map<String, Value>> {
        match kind {
            ClauseKind::Search => self.search_keyword.as_ref(),
            ClauseKind::Filter => self.filter.as_ref(),
            ClauseKind::Range => self.range.as_ref(),
            ClauseKind::Sort => self.sort.as_ref(),
            ClauseKind::Show => None,
        }
    }

    pub fn clauses(&self) -> impl Iterator<Item = (ClauseKind, &Map<String, Value>)> {
        [ClauseKind::Search, ClauseKind::Filter, ClauseKind::Range, ClauseKind::Sort]
            .into_iter()
            .filter_map(|kind| self.clause(kind).map(|map| (kind, map)))
    }

    pub fn free_text(&self) -> Option<&Value> {
        self.search_keyword.as_ref().and_then(|search| search.get(QUERY_KEY))
    }

    /// Copy of this input with every named entry in `fields` removed from
    /// the field-keyed clauses. The free-text `query` entry is kept.
    pub fn without_fields(&self, fields: &HashSet<&str>) -> Self {
        let strip = |clause: &Option<Map<String, Value>>| {
            clause.as_ref().map(|map| {
                map.iter()
                    .filter(|(key, _)| !fields.contains(key.as_str()))
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect::<Map<String, Value>>()
            })
        };
        Self {
            search_keyword: strip(&self.search_keyword),
            filter: strip(&self.filter),
            range: strip(&self.range),
            sort: strip(&self.sort),
            page: self.page.clone(),
            limit: self.limit.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn parse(value: &Value) -> Option<Self> {
        match value.as_str()? {
            "ascending" => Some(Self::Ascending),
            "descending" => Some(Self::Descending),
            _ => None,
        }
    }
}

/// Inclusive range bounds, already checked for `min < max`.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    pub min: Value,
    pub max: Value,
}

/// Validated clause fragments keyed by database column, in parallel buckets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    /// Named search fragments, AND-combined.
    pub search: Vec<(String, Value)>,
    /// Whether the client asked for free text at all.
    pub free_text: bool,
    /// Free-text candidates, OR-combined.
    pub query: Vec<(String, String)>,
    /// Key sets contributed by remote free-text resolution, OR-ed with `query`.
    pub merge_query: Vec<(String, Vec<Value>)>,
    pub filters: Vec<(String, Vec<Value>)>,
    pub range: Vec<(String, Bound)>,
    pub sort: Vec<(String, Direction)>,
}

impl Conditions {
    pub fn is_empty(&self) -> bool {
        self.search.is_empty()
            && !self.free_text
            && self.query.is_empty()
            && self.merge_query.is_empty()
            && self.filters.is_empty()
            && self.range.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub limit: usize,
    pub page: usize,
    pub skip: usize,
    pub total: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: DEFAULT_LIMIT, page: DEFAULT_PAGE, skip: 0, total: 0 }
    }
}

impl Pagination {
    pub fn new(limit: usize, page: usize) -> Self {
        Self { limit, page, skip: page.saturating_sub(1).saturating_mul(limit), total: 0 }
    }
}
