//! Secondary grids: the part of a query answered by another service.
//!
//! An [`ApiGrid`] takes the clauses of a request that name fields owned by
//! one remote dependency, validates them with [`ApiFieldConfig`], renders
//! them into remote QueryInputs with [`ApiCallFormatter`] and issues the
//! calls. Each reply becomes a [`SecondaryResult`]: the set of local keys the
//! primary query must be restricted to, extra free-text candidates, or
//! `Empty`.
//!
//! The same grid later enriches the fetched primary rows with the remote
//! records they join to (see [`ApiGrid::get_merge_data`]).

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::{Map, Value, json};
use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::config::{ApiConfig, ClauseKind, CollectionConfig, FieldDescriptor, PublicField};
use crate::error::{GridError, Messages, Result, merge_messages, push_message};
use crate::field::{FieldConfig, Prepared, Projection};
use crate::formatter::Constraint;
use crate::predicate::{KeyHasher, Row, insert_path, key_string, lookup};
use crate::query::{QUERY_KEY, QueryInput};
use crate::remote::RemoteCaller;

/// What a remote dependency contributes to the primary query.
#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryResult {
    /// Exact-match constraint: the primary rows must join to one of these keys.
    Filter(Vec<Value>),
    /// Free-text hits: these keys are one more alternative of the free-text OR.
    QueryTerms(Vec<Value>),
    Empty,
}

impl SecondaryResult {
    /// The `(filter, query)` constraints this result adds to the primary grid.
    pub fn into_constraints(self, primary_key: &str) -> (Option<Constraint>, Option<Constraint>) {
        let constraint = |keys| Constraint { column: primary_key.to_owned(), keys };
        match self {
            Self::Filter(keys) => (Some(constraint(keys)), None),
            Self::QueryTerms(keys) => (None, Some(constraint(keys))),
            Self::Empty => (None, None),
        }
    }
}

/// Remote records keyed by the foreign key they join on, already renamed
/// to public field names.
pub type MergeData = HashMap<String, Row, KeyHasher>;

/// Capability table of a remote dependency.
///
/// Every input parameter becomes a field whose database name is the name the
/// remote knows it by. Parameters without an authored descriptor may be
/// searched, filtered and shown.
pub struct ApiFieldConfig {
    config: CollectionConfig,
}

impl ApiFieldConfig {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        api.validate()?;
        let descriptors = api
            .input_parameters
            .iter()
            .map(|(field, remote)| {
                let mut descriptor = api.fields.get(field).cloned().unwrap_or_else(|| FieldDescriptor {
                    search: Some(true),
                    filter: Some(true),
                    ..FieldDescriptor::default()
                });
                descriptor.database_name = Some(remote.clone());
                descriptor.join = None;
                (field.clone(), descriptor)
            })
            .collect::<BTreeMap<_, _>>();
        Ok(Self { config: CollectionConfig::new(descriptors)? })
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn owns(&self, field: &str) -> bool {
        self.config.contains(field)
    }

    pub fn searchable(&self) -> bool {
        self.config.fields().any(|f| f.search)
    }

    /// Shown remote fields, merged onto primary rows under their public names.
    pub fn projection(&self) -> Projection {
        let mut projection = Projection::new();
        for field in self.config.fields().filter(|f| f.show) {
            projection.insert(&field.name, &field.name);
        }
        projection
    }

    pub fn public_config(&self) -> BTreeMap<String, PublicField> {
        self.config.fields().map(|f| (f.name.clone(), f.public())).collect()
    }
}

/// Which part of the request a remote call resolves; decides the kind of
/// [`SecondaryResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Only the free-text `query`; hits join the free-text alternatives.
    FreeText,
    /// Named search terms, filters and ranges; hits must all be satisfied.
    Exact,
}

/// The remote calls a request needs, or the reasons they could not be rendered.
///
/// Free text and named constraints are never sent in one body: the remote
/// would AND them, while locally the text is an alternative of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCall {
    pub exact: Option<QueryInput>,
    pub free_text: Option<QueryInput>,
    pub messages: Messages,
}

impl RenderedCall {
    pub fn is_empty(&self) -> bool {
        self.exact.is_none() && self.free_text.is_none()
    }

    /// Serialised bodies in call order, exact part first.
    pub fn calls(&self) -> Vec<(CallShape, Value)> {
        [(CallShape::Exact, &self.exact), (CallShape::FreeText, &self.free_text)]
            .into_iter()
            .filter_map(|(shape, body)| body.as_ref().map(|body| (shape, body.to_value())))
            .collect()
    }
}

pub struct ApiCallFormatter<'f> {
    fields: &'f ApiFieldConfig,
    max_keys: usize,
}

impl<'f> ApiCallFormatter<'f> {
    pub fn new(fields: &'f ApiFieldConfig, max_keys: usize) -> Self {
        Self { fields, max_keys }
    }

    /// The entries of `clause` this remote answers for. Free text is
    /// forwarded to any remote with a searchable field.
    fn owned(&self, kind: ClauseKind, clause: &Map<String, Value>) -> Map<String, Value> {
        clause
            .iter()
            .filter(|(key, _)| {
                self.fields.owns(key) || (kind == ClauseKind::Search && *key == QUERY_KEY && self.fields.searchable())
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    // page 1 with the whole key budget
    fn paged(&self, body: QueryInput) -> QueryInput {
        QueryInput { page: Some(json!(1)), limit: Some(json!(self.max_keys)), ..body }
    }

    pub fn render(&self, input: &QueryInput) -> RenderedCall {
        let validator = FieldConfig::new(self.fields.config());
        let mut messages = Messages::new();
        let mut exact = QueryInput::default();
        let mut named = false;
        let mut text = None;
        for (kind, clause) in input.clauses() {
            let owned = self.owned(kind, clause);
            if owned.is_empty() {
                continue;
            }
            if kind == ClauseKind::Sort {
                for name in owned.keys() {
                    push_message(&mut messages, name, "remote fields cannot be sorted on");
                }
                continue;
            }
            match validator.prepare(kind, &owned) {
                Err(failed) => merge_messages(&mut messages, failed),
                Ok(Prepared::Search { terms, free_text, .. }) => {
                    if free_text {
                        text = input.free_text().cloned();
                    }
                    if !terms.is_empty() {
                        named = true;
                        let search = exact.search_keyword.get_or_insert_with(Map::new);
                        for (remote, value) in terms {
                            search.insert(remote, value);
                        }
                    }
                }
                Ok(Prepared::Filter(filters)) => {
                    named |= !filters.is_empty();
                    let filter = exact.filter.get_or_insert_with(Map::new);
                    for (remote, values) in filters {
                        filter.insert(remote, Value::Array(values));
                    }
                }
                Ok(Prepared::Range(ranges)) => {
                    named |= !ranges.is_empty();
                    let range = exact.range.get_or_insert_with(Map::new);
                    for (remote, bound) in ranges {
                        range.insert(remote, json!({ "min": bound.min, "max": bound.max }));
                    }
                }
                Ok(Prepared::Sort(_)) => {}
            }
        }
        let free_text = text.map(|text| {
            let mut search = Map::new();
            search.insert(QUERY_KEY.to_owned(), text);
            self.paged(QueryInput { search_keyword: Some(search), ..QueryInput::default() })
        });
        let exact = named.then(|| self.paged(exact));
        RenderedCall { exact, free_text, messages }
    }
}

/// One remote dependency of a composite request.
pub struct ApiGrid<'a, C: RemoteCaller> {
    api: &'a ApiConfig,
    caller: &'a C,
    header: &'a Value,
    fields: ApiFieldConfig,
    rendered: RenderedCall,
    resolved: Option<Vec<Row>>,
    saturated: bool,
}

impl<'a, C: RemoteCaller> ApiGrid<'a, C> {
    pub fn new(api: &'a ApiConfig, caller: &'a C, input: &QueryInput, header: &'a Value) -> Result<Self> {
        let fields = ApiFieldConfig::new(api)?;
        let rendered = ApiCallFormatter::new(&fields, api.max_keys).render(input);
        Ok(Self { api, caller, header, fields, rendered, resolved: None, saturated: false })
    }

    pub fn api(&self) -> &'a ApiConfig {
        self.api
    }

    pub fn fields(&self) -> &ApiFieldConfig {
        &self.fields
    }

    pub fn messages(&self) -> &Messages {
        &self.rendered.messages
    }

    /// Whether this request gives the remote anything to resolve.
    pub fn is_applicable(&self) -> bool {
        !self.rendered.is_empty()
    }

    /// Whether some call returned as many records as `maxKeys` allows, so
    /// the key set it resolved may be cut short.
    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    fn label(&self) -> String {
        format!("{}.{}", self.api.api_call.role, self.api.api_call.cmd)
    }

    async fn call(&self, body: &Value) -> Result<Vec<Row>> {
        let (role, cmd) = (self.api.api_call.role.as_str(), self.api.api_call.cmd.as_str());
        let reply = self.caller.call(role, cmd, body, self.header).await.map_err(|e| match e {
            unavailable @ GridError::RemoteUnavailable { .. } => unavailable,
            other => GridError::RemoteUnavailable {
                role: role.to_owned(),
                cmd: cmd.to_owned(),
                reason: other.to_string(),
            },
        })?;
        reply.rows()
    }

    /// Resolves this remote's share of the query into local keys, one result
    /// per rendered call. A request that gives the remote nothing to resolve
    /// makes no call and yields no results.
    ///
    /// The exact and free-text calls run concurrently; either failing fails
    /// the whole resolution.
    pub async fn fetch(&mut self) -> Result<Vec<(CallShape, SecondaryResult)>> {
        if !self.rendered.messages.is_empty() {
            return Err(GridError::Validation(self.rendered.messages.clone()));
        }
        let calls = self.rendered.calls();
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        let replies = try_join_all(calls.iter().map(|(_, body)| self.call(body))).await?;
        let mut results = Vec::with_capacity(calls.len());
        let mut resolved = Vec::new();
        for ((shape, _), rows) in calls.into_iter().zip(replies) {
            if rows.len() >= self.api.max_keys {
                self.saturated = true;
                warn!(
                    role = %self.api.api_call.role,
                    cmd = %self.api.api_call.cmd,
                    max_keys = self.api.max_keys,
                    "remote returned maxKeys records, key set may be truncated"
                );
            }
            let keys = distinct_keys(rows.iter().filter_map(|row| lookup(row, &self.api.foreign_key)));
            info!(remote = %self.label(), ?shape, records = rows.len(), keys = keys.len(), "remote constraint resolved");
            results.push((shape, match (keys.is_empty(), shape) {
                (true, _) => SecondaryResult::Empty,
                (false, CallShape::FreeText) => SecondaryResult::QueryTerms(keys),
                (false, CallShape::Exact) => SecondaryResult::Filter(keys),
            }));
            resolved.extend(rows);
        }
        self.resolved = Some(resolved);
        Ok(results)
    }

    /// Remote records for the join values present in `primary_rows`.
    ///
    /// Reuses the records fetched by [`ApiGrid::fetch`] when they cover every
    /// join value; otherwise asks the remote for exactly those values.
    pub async fn get_merge_data(&self, primary_rows: &[Row]) -> Result<MergeData> {
        let keys = distinct_keys(primary_rows.iter().filter_map(|row| lookup(row, &self.api.primary_key)));
        if keys.is_empty() {
            return Ok(MergeData::default());
        }
        let wanted: HashSet<String, KeyHasher> = keys.iter().map(key_string).collect();
        let covered = self.resolved.as_ref().is_some_and(|rows| {
            let held: HashSet<String, KeyHasher> = rows
                .iter()
                .filter_map(|row| lookup(row, &self.api.foreign_key))
                .map(key_string)
                .collect();
            wanted.is_subset(&held)
        });
        let fetched;
        let records = match &self.resolved {
            Some(rows) if covered => rows,
            _ => {
                let count = keys.len();
                let mut filter = Map::new();
                filter.insert(self.api.foreign_key.clone(), Value::Array(keys));
                let body = QueryInput {
                    filter: Some(filter),
                    page: Some(json!(1)),
                    limit: Some(json!(count)),
                    ..QueryInput::default()
                };
                fetched = self.call(&body.to_value()).await?;
                debug!(remote = %self.label(), keys = count, records = fetched.len(), "merge data fetched");
                &fetched
            }
        };
        let mut data = MergeData::default();
        for record in records {
            let Some(key) = lookup(record, &self.api.foreign_key).map(key_string) else {
                continue;
            };
            if wanted.contains(&key) {
                data.insert(key, self.rename(record));
            }
        }
        Ok(data)
    }

    // remote names -> public names, shown fields only
    fn rename(&self, record: &Row) -> Row {
        let mut renamed = Row::new();
        for field in self.fields.config().fields().filter(|f| f.show) {
            if let Some(value) = lookup(record, &field.database_name) {
                insert_path(&mut renamed, &field.name, value.clone());
            }
        }
        renamed
    }
}

/// Distinct join values in first-seen order; arrays contribute each element.
fn distinct_keys<'v>(values: impl Iterator<Item = &'v Value>) -> Vec<Value> {
    let mut seen = HashSet::with_hasher(KeyHasher::default());
    let mut keys = Vec::new();
    for value in values {
        let items: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            Value::Null => Vec::new(),
            other => vec![other],
        };
        for item in items {
            if seen.insert(key_string(item)) {
                keys.push(item.clone());
            }
        }
    }
    keys
}

/// Folds `source` into `target`, descending into objects present on both sides.
pub fn deep_merge(target: &mut Row, source: &Row) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => deep_merge(existing, incoming),
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Merges each primary row with the remote record its join value points to.
/// Rows holding several join values receive, per merged field, the list of
/// values from every matched record.
pub fn merge_rows(rows: &mut [Row], primary_key: &str, data: &MergeData) {
    for row in rows.iter_mut() {
        match lookup(row, primary_key).cloned() {
            Some(Value::Array(items)) => {
                let mut gathered: Map<String, Value> = Map::new();
                for record in items.iter().filter_map(|item| data.get(&key_string(item))) {
                    for (field, value) in record {
                        if let Value::Array(list) =
                            gathered.entry(field.clone()).or_insert_with(|| Value::Array(Vec::new()))
                        {
                            list.push(value.clone());
                        }
                    }
                }
                deep_merge(row, &gathered);
            }
            Some(Value::Null) | None => {}
            Some(value) => {
                if let Some(record) = data.get(&key_string(&value)) {
                    deep_merge(row, record);
                }
            }
        }
    }
}
