// used for persistence
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, params, params_from_iter};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::config::{is_column_path, is_identifier};
use crate::error::{GridError, Result};
use crate::predicate::{FindQuery, Predicate, Row, project};
use crate::query::Direction;
use crate::store::{Store, into_rows};

/// Where the SQLite document store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

impl PersistenceMode {
    pub fn from_setting(setting: &str) -> Self {
        match setting.trim() {
            "" | "memory" | ":memory:" => Self::InMemory,
            path => Self::File(path.to_owned()),
        }
    }
}

/// Collections stored as tables of JSON documents:
/// `CREATE TABLE "<collection>" (id INTEGER PRIMARY KEY, doc TEXT NOT NULL)`.
///
/// Predicates are rendered to SQL over `json_each`/`json_extract`, so a
/// column holding an array matches when any of its elements does, the same
/// way [`crate::store::MemoryStore`] evaluates rows. Calls run on the
/// blocking pool since rusqlite is synchronous.
#[derive(Clone)]
pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
}

fn table(collection: &str) -> Result<String> {
    if !is_identifier(collection) {
        return Err(GridError::Store(format!("'{collection}' is not a collection name")));
    }
    Ok(format!("\"{collection}\""))
}

fn json_path(column: &str) -> Result<String> {
    if !is_column_path(column) {
        return Err(GridError::Store(format!("'{column}' is not a column path")));
    }
    Ok(format!("'$.{column}'"))
}

fn ensure_table(connection: &Connection, table: &str) -> Result<()> {
    connection.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY, doc TEXT NOT NULL);"
    ))?;
    Ok(())
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Accumulates bound parameters while rendering a predicate.
#[derive(Default)]
struct SqlBuilder {
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    fn element_test(&mut self, column: &str, test: &str) -> Result<String> {
        Ok(format!("EXISTS (SELECT 1 FROM json_each(doc, {}) WHERE {test})", json_path(column)?))
    }

    fn render(&mut self, predicate: &Predicate) -> Result<String> {
        Ok(match predicate {
            Predicate::All => "1=1".into(),
            Predicate::Nothing => "1=0".into(),
            Predicate::And(parts) | Predicate::Or(parts) => {
                let joiner = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
                let rendered = parts.iter().map(|p| self.render(p)).collect::<Result<Vec<_>>>()?;
                format!("({})", rendered.join(joiner))
            }
            Predicate::Eq(column, value) => {
                self.params.push(sql_value(value));
                self.element_test(column, "json_each.value = ?")?
            }
            Predicate::In(column, values) => {
                if values.is_empty() {
                    return Ok("1=0".into());
                }
                self.params.extend(values.iter().map(sql_value));
                let marks = vec!["?"; values.len()].join(", ");
                self.element_test(column, &format!("json_each.value IN ({marks})"))?
            }
            Predicate::Contains(column, needle) => {
                self.params.push(SqlValue::Text(like_pattern(needle)));
                self.element_test(column, "lower(CAST(json_each.value AS TEXT)) LIKE ? ESCAPE '\\'")?
            }
            Predicate::Between(column, min, max) => {
                self.params.push(sql_value(min));
                self.params.push(sql_value(max));
                self.element_test(column, "json_each.value BETWEEN ? AND ?")?
            }
        })
    }
}

fn parse_doc(doc: &str) -> Result<Row> {
    serde_json::from_str(doc).map_err(|e| GridError::Store(format!("corrupt document: {e}")))
}

impl SqliteStore {
    pub fn new(mode: PersistenceMode) -> Result<Self> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        debug!(?mode, "document store opened");
        Ok(Self { connection: Arc::new(Mutex::new(connection)) })
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(PersistenceMode::InMemory)
    }

    pub fn insert(&self, collection: &str, rows: impl IntoIterator<Item = Value>) -> Result<usize> {
        let table = table(collection)?;
        let rows = into_rows(rows)?;
        let mut connection = self.connection.lock()?;
        ensure_table(&connection, &table)?;
        let transaction = connection.transaction()?;
        {
            let mut statement = transaction.prepare(&format!("INSERT INTO {table} (doc) VALUES (?1)"))?;
            for row in &rows {
                statement.execute(params![Value::Object(row.clone()).to_string()])?;
            }
        }
        transaction.commit()?;
        Ok(rows.len())
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let connection = connection.lock()?;
            work(&connection)
        })
        .await
        .map_err(|e| GridError::Store(format!("blocking task failed: {e}")))?
    }
}

impl Store for SqliteStore {
    async fn count(&self, collection: &str, predicate: &Predicate) -> Result<usize> {
        let table = table(collection)?;
        let mut builder = SqlBuilder::default();
        let clause = builder.render(predicate)?;
        let params = builder.params;
        self.blocking(move |connection| {
            ensure_table(connection, &table)?;
            let sql = format!("SELECT COUNT(*) FROM {table} WHERE {clause}");
            let count: i64 = connection.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<Vec<Row>> {
        let table = table(collection)?;
        let mut builder = SqlBuilder::default();
        let clause = builder.render(&query.predicate)?;
        let mut params = builder.params;
        let mut order = Vec::with_capacity(query.sort.len() + 1);
        for key in &query.sort {
            let direction = match key.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            order.push(format!("json_extract(doc, {}) {direction}", json_path(&key.column)?));
        }
        order.push("id ASC".into());
        params.push(SqlValue::Integer(query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))));
        params.push(SqlValue::Integer(i64::try_from(query.skip).unwrap_or(i64::MAX)));
        let projection = query.projection.clone();
        self.blocking(move |connection| {
            ensure_table(connection, &table)?;
            let sql = format!(
                "SELECT doc FROM {table} WHERE {clause} ORDER BY {} LIMIT ? OFFSET ?",
                order.join(", ")
            );
            let mut statement = connection.prepare(&sql)?;
            let docs = statement
                .query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            docs.iter()
                .map(|doc| {
                    let row = parse_doc(doc)?;
                    Ok(match &projection {
                        Some(columns) => project(&row, columns),
                        None => row,
                    })
                })
                .collect()
        })
        .await
    }
}
