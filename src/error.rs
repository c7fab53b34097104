use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Value, json};
use thiserror::Error;

/// Validation messages keyed by the public field name (or clause name when
/// the problem is not tied to a single field).
pub type Messages = BTreeMap<String, Vec<String>>;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Validation failed for {}", field_list(.0))]
    Validation(Messages),
    #[error("Remote {role}.{cmd} unavailable: {reason}")]
    RemoteUnavailable { role: String, cmd: String, reason: String },
    #[error("no output found")]
    NoOutputFound,
    #[error("Store error: {0}")]
    Store(String),
    #[error("Phase error: {0}")]
    Phase(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

fn field_list(messages: &Messages) -> String {
    messages.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
}

pub type Result<T> = std::result::Result<T, GridError>;

/// Rejection payload handed to callers, `{id, msg}`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorBody {
    pub id: &'static str,
    pub msg: Value,
}

impl GridError {
    pub fn id(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::InvalidInput(_) => "invalid_input",
            Self::Validation(_) => "validation_failed",
            Self::RemoteUnavailable { .. } => "remote_unavailable",
            Self::NoOutputFound => "no_output_found",
            Self::Store(_) => "store_error",
            Self::Phase(_) => "phase_error",
            Self::Lock(_) => "lock_poisoned",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let msg = match self {
            Self::Validation(messages) => json!(messages),
            other => Value::String(other.to_string()),
        };
        ErrorBody { id: self.id(), msg }
    }

    /// Client mistakes as opposed to failures of the grid or its collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::Validation(_))
    }
}

pub(crate) fn push_message(messages: &mut Messages, field: &str, message: impl Into<String>) {
    messages.entry(field.to_owned()).or_default().push(message.into());
}

pub(crate) fn merge_messages(into: &mut Messages, from: Messages) {
    for (field, list) in from {
        into.entry(field).or_default().extend(list);
    }
}

// Helper conversions
impl From<rusqlite::Error> for GridError {
    fn from(e: rusqlite::Error) -> Self { Self::Store(e.to_string()) }
}
impl From<serde_json::Error> for GridError {
    fn from(e: serde_json::Error) -> Self { Self::InvalidInput(e.to_string()) }
}
impl From<config::ConfigError> for GridError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for GridError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
