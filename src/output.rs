//! Final column renaming and the standard response envelope.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::config::{CollectionConfig, PublicField};
use crate::error::GridError;
use crate::field::Projection;
use crate::predicate::{Row, lookup};
use crate::query::{Pagination, QueryInput};

pub const FETCH_OK: &str = "grid_fetch_ok";
const FALLBACK_DESCRIPTION: &str = "The request could not be completed";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EnvelopeData {
    Page {
        input: Value,
        configuration: BTreeMap<String, PublicField>,
        content: Vec<Row>,
        pagination: Pagination,
    },
    Failure {
        errors: Value,
    },
}

/// `{success, message:{id, description}, data, timestamp, version}`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutputEnvelope {
    pub success: bool,
    pub message: Message,
    pub data: EnvelopeData,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl OutputEnvelope {
    pub fn content(&self) -> &[Row] {
        match &self.data {
            EnvelopeData::Page { content, .. } => content,
            EnvelopeData::Failure { .. } => &[],
        }
    }

    pub fn pagination(&self) -> Option<&Pagination> {
        match &self.data {
            EnvelopeData::Page { pagination, .. } => Some(pagination),
            EnvelopeData::Failure { .. } => None,
        }
    }
}

fn remove_path(row: &mut Row, path: &str) {
    match path.split_once('.') {
        None => {
            row.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Value::Object(child)) = row.get_mut(head) {
                remove_path(child, rest);
            }
        }
    }
}

// Strips join-table artifacts from an expanded object or list of objects.
fn strip_excluded(value: &mut Value, exclude: &[String]) {
    match value {
        Value::Object(record) => {
            for path in exclude {
                remove_path(record, path);
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_excluded(item, exclude);
            }
        }
        _ => {}
    }
}

pub struct OutputFormatter {
    version: String,
}

impl OutputFormatter {
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into() }
    }

    /// Renames database columns to public field names, keeping only
    /// projected fields. Fields described in `config` are read from their
    /// join location and lose their `join.exclude` sub-fields; anything else
    /// in the projection is read from its column as is.
    pub fn rename_rows(rows: Vec<Row>, projection: &Projection, config: Option<&CollectionConfig>) -> Vec<Row> {
        let pairs = projection.pairs();
        rows.into_iter()
            .map(|row| {
                let mut renamed = Row::new();
                for (name, column) in &pairs {
                    let field = config.and_then(|c| c.get(name));
                    let source = field.map_or(*column, |f| f.source());
                    let Some(value) = lookup(&row, source) else {
                        continue;
                    };
                    let mut value = value.clone();
                    if let Some(join) = field.and_then(|f| f.join.as_ref()) {
                        strip_excluded(&mut value, &join.exclude);
                    }
                    renamed.insert((*name).to_owned(), value);
                }
                renamed
            })
            .collect()
    }

    /// Packages a fetched page. Without a projection rows pass through unchanged.
    pub fn format_output(
        &self,
        input: &QueryInput,
        configuration: BTreeMap<String, PublicField>,
        rows: Vec<Row>,
        pagination: Pagination,
        projection: Option<&Projection>,
        config: Option<&CollectionConfig>,
    ) -> OutputEnvelope {
        let content = match projection {
            Some(projection) => Self::rename_rows(rows, projection, config),
            None => rows,
        };
        OutputEnvelope {
            success: true,
            message: Message { id: FETCH_OK.into(), description: "Grid fetched".into() },
            data: EnvelopeData::Page { input: input.to_value(), configuration, content, pagination },
            timestamp: Utc::now(),
            version: self.version.clone(),
        }
    }

    /// The `success:false` envelope for a rejection.
    pub fn failure(&self, error: &GridError) -> OutputEnvelope {
        let body = error.body();
        let description = match error {
            GridError::Validation(_) => "Invalid query input".to_owned(),
            GridError::InvalidInput(_) | GridError::NoOutputFound => error.to_string(),
            _ => FALLBACK_DESCRIPTION.to_owned(),
        };
        OutputEnvelope {
            success: false,
            message: Message { id: body.id.to_owned(), description },
            data: EnvelopeData::Failure { errors: body.msg },
            timestamp: Utc::now(),
            version: self.version.clone(),
        }
    }
}
