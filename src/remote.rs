//! Remote-call capability used by [`crate::api::ApiGrid`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::GridDefinition;
use crate::error::{GridError, Result};
use crate::grid::CollectionGrid;
use crate::output::OutputFormatter;
use crate::predicate::Row;
use crate::store::Store;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RemoteContent {
    #[serde(default)]
    pub data: Value,
}

/// `{content: {data}}`, where `data` holds the remote records.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RemoteReply {
    #[serde(default)]
    pub content: RemoteContent,
}

impl RemoteReply {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { content: RemoteContent { data: Value::Array(rows.into_iter().map(Value::Object).collect()) } }
    }

    /// The records of the reply. `data` may be the record list itself or a
    /// grid envelope's `data` object carrying it under `content`.
    pub fn rows(self) -> Result<Vec<Row>> {
        let records = match self.content.data {
            Value::Null => return Ok(Vec::new()),
            Value::Array(records) => records,
            Value::Object(mut data) => match data.remove("content") {
                Some(Value::Array(records)) => records,
                _ => return Err(GridError::Store("remote data has no record list".into())),
            },
            other => return Err(GridError::Store(format!("remote data is not a record list: {other}"))),
        };
        records
            .into_iter()
            .map(|record| match record {
                Value::Object(row) => Ok(row),
                other => Err(GridError::Store(format!("remote record is not an object: {other}"))),
            })
            .collect()
    }
}

/// Asynchronous request/reply to another service, addressed by `role` and `cmd`.
pub trait RemoteCaller: Send + Sync {
    fn call(&self, role: &str, cmd: &str, body: &Value, header: &Value) -> impl Future<Output = Result<RemoteReply>> + Send;
}

/// Answers remote calls addressed to this process by running one of its own
/// grids: `role` must name this service and `cmd` a hosted grid. Replies use
/// public field names, exactly as a grid service over the wire would.
pub struct LocalDispatch<S: Store> {
    store: Arc<S>,
    role: String,
    grids: Arc<BTreeMap<String, GridDefinition>>,
}

impl<S: Store> LocalDispatch<S> {
    pub fn new(store: Arc<S>, role: impl Into<String>, grids: Arc<BTreeMap<String, GridDefinition>>) -> Self {
        Self { store, role: role.into(), grids }
    }
}

impl<S: Store> RemoteCaller for LocalDispatch<S> {
    async fn call(&self, role: &str, cmd: &str, body: &Value, _header: &Value) -> Result<RemoteReply> {
        let unavailable = |reason: String| GridError::RemoteUnavailable {
            role: role.to_owned(),
            cmd: cmd.to_owned(),
            reason,
        };
        if role != self.role {
            return Err(unavailable(format!("no route to role '{role}'")));
        }
        let definition = self.grids.get(cmd).ok_or_else(|| unavailable("unknown grid".into()))?;
        debug!(role, cmd, "local dispatch");
        let mut grid = CollectionGrid::new(&*self.store, &definition.collection, &definition.fields, body)
            .map_err(|e| unavailable(e.to_string()))?;
        let result = grid.fetch().await.map_err(|e| unavailable(e.to_string()))?;
        let rows = OutputFormatter::rename_rows(result.rows, &grid.projection(), Some(&definition.fields));
        Ok(RemoteReply::from_rows(rows))
    }
}
