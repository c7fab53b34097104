#![allow(dead_code)]

use std::sync::Mutex;

use querygrid::config::CollectionConfig;
use querygrid::error::{GridError, Result};
use querygrid::predicate::Row;
use querygrid::remote::{RemoteCaller, RemoteReply};
use querygrid::store::MemoryStore;
use serde_json::Value;

/// One recorded remote invocation.
#[derive(Debug, Clone)]
pub struct Call {
    pub role: String,
    pub cmd: String,
    pub body: Value,
}

type Script = dyn Fn(&str, &Value) -> Result<Vec<Row>> + Send + Sync;

/// Remote caller answering from a closure keyed on `cmd` and the body.
pub struct ScriptedCaller {
    script: Box<Script>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedCaller {
    pub fn new(script: impl Fn(&str, &Value) -> Result<Vec<Row>> + Send + Sync + 'static) -> Self {
        Self { script: Box::new(script), calls: Mutex::new(Vec::new()) }
    }

    /// Answers every call with the records whose `key` is among the body's
    /// filter values, or all of them when the body carries free text only.
    pub fn table(key: &'static str, records: Vec<Value>) -> Self {
        Self::new(move |_, body| {
            let wanted = body.pointer(&format!("/filter/{key}")).and_then(Value::as_array).cloned();
            Ok(records
                .iter()
                .filter(|record| match &wanted {
                    Some(keys) => keys.contains(&record[key]),
                    None => true,
                })
                .filter_map(|record| record.as_object().cloned())
                .collect())
        })
    }

    pub fn failing() -> Self {
        Self::new(|cmd, _| {
            Err(GridError::RemoteUnavailable { role: "users".into(), cmd: cmd.into(), reason: "connection refused".into() })
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }
}

impl RemoteCaller for ScriptedCaller {
    async fn call(&self, role: &str, cmd: &str, body: &Value, _header: &Value) -> Result<RemoteReply> {
        self.calls.lock().expect("calls").push(Call { role: role.into(), cmd: cmd.into(), body: body.clone() });
        (self.script)(cmd, body).map(RemoteReply::from_rows)
    }
}

pub fn config(value: Value) -> CollectionConfig {
    CollectionConfig::from_json(value).expect("valid config")
}

pub fn store_with(collection: &str, rows: Vec<Value>) -> MemoryStore {
    let store = MemoryStore::new();
    store.insert(collection, rows).expect("insert");
    store
}
