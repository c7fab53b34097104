//! Grid configuration: per-field capability tables, remote dependency
//! descriptions, and the process settings read at startup.
//!
//! A [`CollectionConfig`] is authored as a loose map of field name to
//! [`FieldDescriptor`] and validated exactly once, when it is built (or
//! deserialized). Validation fills defaults (`show` is `true`, every other
//! capability `false`, `databaseName`/`displayName` fall back to the field
//! name) and rejects structurally broken tables with [`GridError::Config`].
//! Request handling never sees an unvalidated table.

use std::collections::{BTreeMap, HashSet};
use std::fs;

use config::{Config, Environment, File};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};

lazy_static! {
    static ref COLUMN_PATH: Regex =
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

pub fn is_column_path(name: &str) -> bool {
    COLUMN_PATH.is_match(name)
}

pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// The closed set of capabilities a field may grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    Search,
    Filter,
    Range,
    Sort,
    Show,
}

impl ClauseKind {
    /// Name of the QueryInput key carrying clauses of this kind.
    pub fn input_key(&self) -> &'static str {
        match self {
            Self::Search => "searchKeyword",
            Self::Filter => "filter",
            Self::Range => "range",
            Self::Sort => "sort",
            Self::Show => "show",
        }
    }
}

/// Relational expansion of a field holding one or more foreign ids.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct JoinDescriptor {
    pub model: String,
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl JoinDescriptor {
    pub fn key(&self) -> &str {
        self.key.as_deref().unwrap_or("id")
    }
}

/// A field as authored; every key is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinDescriptor>,
}

/// A validated field with every default filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub database_name: String,
    pub display_name: String,
    pub show: bool,
    pub search: bool,
    pub filter: bool,
    pub range: bool,
    pub sort: bool,
    pub join: Option<JoinDescriptor>,
}

impl Field {
    fn from_descriptor(name: &str, descriptor: FieldDescriptor) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(GridError::Config("field name must not be empty".into()));
        }
        let database_name = descriptor.database_name.unwrap_or_else(|| name.to_owned());
        if !is_column_path(&database_name) {
            return Err(GridError::Config(format!(
                "field '{name}': databaseName '{database_name}' is not a column path"
            )));
        }
        if let Some(join) = &descriptor.join {
            if !is_identifier(&join.model) {
                return Err(GridError::Config(format!(
                    "field '{name}': join model '{}' is not an identifier",
                    join.model
                )));
            }
            let alias_ok = join.alias.as_deref().is_none_or(is_column_path);
            if !alias_ok || !is_column_path(join.key()) {
                return Err(GridError::Config(format!("field '{name}': malformed join")));
            }
            if let Some(bad) = join.fields.iter().chain(&join.exclude).find(|f| !is_column_path(f)) {
                return Err(GridError::Config(format!(
                    "field '{name}': join column '{bad}' is not a column path"
                )));
            }
        }
        Ok(Self {
            name: name.to_owned(),
            display_name: descriptor.display_name.unwrap_or_else(|| name.to_owned()),
            database_name,
            show: descriptor.show.unwrap_or(true),
            search: descriptor.search.unwrap_or(false),
            filter: descriptor.filter.unwrap_or(false),
            range: descriptor.range.unwrap_or(false),
            sort: descriptor.sort.unwrap_or(false),
            join: descriptor.join,
        })
    }

    pub fn allows(&self, kind: ClauseKind) -> bool {
        match kind {
            ClauseKind::Search => self.search,
            ClauseKind::Filter => self.filter,
            ClauseKind::Range => self.range,
            ClauseKind::Sort => self.sort,
            ClauseKind::Show => self.show,
        }
    }

    /// Row location holding this field after fetch: the join alias when the
    /// field is expanded under another name, its column otherwise.
    pub fn source(&self) -> &str {
        self.join
            .as_ref()
            .and_then(|join| join.alias.as_deref())
            .unwrap_or(&self.database_name)
    }

    pub fn public(&self) -> PublicField {
        PublicField {
            display_name: self.display_name.clone(),
            show: self.show,
            search: self.search,
            filter: self.filter,
            range: self.range,
            sort: self.sort,
        }
    }
}

/// Capability view of a field handed to clients for introspection.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicField {
    pub display_name: String,
    pub show: bool,
    pub search: bool,
    pub filter: bool,
    pub range: bool,
    pub sort: bool,
}

/// Validated capability table of one collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, FieldDescriptor>")]
pub struct CollectionConfig {
    fields: BTreeMap<String, Field>,
}

impl CollectionConfig {
    pub fn new(descriptors: BTreeMap<String, FieldDescriptor>) -> Result<Self> {
        let mut fields = BTreeMap::new();
        let mut columns = HashSet::new();
        for (name, descriptor) in descriptors {
            let field = Field::from_descriptor(&name, descriptor)?;
            if !columns.insert(field.database_name.clone()) {
                return Err(GridError::Config(format!(
                    "field '{name}': databaseName '{}' is used twice",
                    field.database_name
                )));
            }
            fields.insert(name, field);
        }
        if fields.is_empty() {
            return Err(GridError::Config("a collection needs at least one field".into()));
        }
        Ok(Self { fields })
    }

    /// Builds a table from a JSON object, the shape grids are authored in.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        let descriptors: BTreeMap<String, FieldDescriptor> = serde_json::from_value(value)
            .map_err(|e| GridError::Config(e.to_string()))?;
        Self::new(descriptors)
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

impl TryFrom<BTreeMap<String, FieldDescriptor>> for CollectionConfig {
    type Error = GridError;
    fn try_from(descriptors: BTreeMap<String, FieldDescriptor>) -> Result<Self> {
        Self::new(descriptors)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ApiCall {
    pub role: String,
    pub cmd: String,
}

fn default_max_keys() -> usize {
    1000
}

/// A remote dependency of a composite grid.
///
/// `inputParameters` maps the public field names this remote answers for to
/// the names the remote service knows them by. `primaryKey` is the local
/// column joined against `foreignKey` in the remote records.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    pub api_call: ApiCall,
    pub primary_key: String,
    pub foreign_key: String,
    pub input_parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldDescriptor>,
    #[serde(default = "default_max_keys")]
    pub max_keys: usize,
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        let role = &self.api_call.role;
        let cmd = &self.api_call.cmd;
        if role.trim().is_empty() || cmd.trim().is_empty() {
            return Err(GridError::Config("apiCall needs a role and a cmd".into()));
        }
        if !is_column_path(&self.primary_key) || !is_column_path(&self.foreign_key) {
            return Err(GridError::Config(format!(
                "{role}.{cmd}: primaryKey and foreignKey must be column paths"
            )));
        }
        if self.input_parameters.is_empty() {
            return Err(GridError::Config(format!("{role}.{cmd}: no inputParameters")));
        }
        if let Some(stray) = self.fields.keys().find(|f| !self.input_parameters.contains_key(*f)) {
            return Err(GridError::Config(format!(
                "{role}.{cmd}: field '{stray}' is not an input parameter"
            )));
        }
        if self.max_keys == 0 {
            return Err(GridError::Config(format!("{role}.{cmd}: maxKeys must be positive")));
        }
        Ok(())
    }
}

/// One grid as hosted by the binary.
#[derive(Debug, Clone, Deserialize)]
pub struct GridDefinition {
    pub collection: String,
    pub fields: CollectionConfig,
    #[serde(default)]
    pub apis: Vec<ApiConfig>,
}

impl GridDefinition {
    pub fn validate(&self, name: &str) -> Result<()> {
        if !is_identifier(&self.collection) {
            return Err(GridError::Config(format!(
                "grid '{name}': collection '{}' is not an identifier",
                self.collection
            )));
        }
        for api in &self.apis {
            api.validate()?;
            if let Some(clash) = api.input_parameters.keys().find(|f| self.fields.contains(f)) {
                return Err(GridError::Config(format!(
                    "grid '{name}': field '{clash}' is claimed by both the collection and {}.{}",
                    api.api_call.role, api.api_call.cmd
                )));
            }
        }
        Ok(())
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}
fn default_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}
fn default_persistence() -> String {
    "memory".into()
}
fn default_service() -> String {
    "grid".into()
}
fn default_grids() -> String {
    "grids.json".into()
}

/// Process settings, read from an optional `querygrid` file and
/// `QUERYGRID_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// `memory` or the path of a SQLite file.
    #[serde(default = "default_persistence")]
    pub persistence: String,
    /// Role this process answers to when grids call each other in-process.
    #[serde(default = "default_service")]
    pub service: String,
    /// JSON file holding `{gridName: GridDefinition}`.
    #[serde(default = "default_grids")]
    pub grids: String,
    /// Optional JSON file holding `{collection: [rows]}` loaded at startup.
    #[serde(default)]
    pub seed: Option<String>,
}

impl Settings {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path.unwrap_or("querygrid")).required(path.is_some()))
            .add_source(Environment::with_prefix("QUERYGRID").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Reads and validates every grid definition.
    pub fn load_grids(&self) -> Result<BTreeMap<String, GridDefinition>> {
        let text = fs::read_to_string(&self.grids)
            .map_err(|e| GridError::Config(format!("{}: {e}", self.grids)))?;
        let grids: BTreeMap<String, GridDefinition> =
            serde_json::from_str(&text).map_err(|e| GridError::Config(format!("{}: {e}", self.grids)))?;
        for (name, grid) in &grids {
            grid.validate(name)?;
        }
        Ok(grids)
    }
}
