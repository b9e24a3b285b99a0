// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store interface and backend implementations.
//!
//! All SQL text is written in the SQLite dialect with positional `?`
//! placeholders, which both backends accept:
//!
//! - [`RqliteStore`]: the replicated, majority-write store reached over HTTP
//! - [`SqliteStore`]: an embedded SQLite database (single node, tests)

pub mod rqlite;
pub mod sqlite;

pub use self::rqlite::{ReadConsistency, RqliteStore};
pub use self::sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, StoreError};

/// A single bound SQL parameter or result cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer (also used for booleans and unix timestamps).
    Integer(i64),
    /// Floating point number.
    Real(f64),
    /// UTF-8 text (also used for base64-encoded binary).
    Text(String),
}

impl Value {
    /// Whether this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a JSON cell returned by the HTTP API into a value.
    pub(crate) fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Real(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Parameterized SQL statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Positional arguments.
    pub args: Vec<Value>,
}

impl Statement {
    /// Create a statement without arguments.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Create a statement from SQL and a prepared argument list.
    pub fn with_args(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    /// Rows changed by the statement.
    pub rows_affected: u64,
    /// Row id of the last inserted row, when the store reports one.
    pub last_insert_id: Option<i64>,
}

/// A result row with column-name based accessors.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    /// Build a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Raw value of a column.
    pub fn value(&self, column: &str) -> Result<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.values.get(idx))
            .ok_or_else(|| StoreError::validation(column, "column missing from result set"))
    }

    /// Column as an integer, NULL mapping to `None`.
    pub fn get_opt_i64(&self, column: &str) -> Result<Option<i64>> {
        match self.value(column)? {
            Value::Null => Ok(None),
            Value::Integer(i) => Ok(Some(*i)),
            Value::Real(f) if f.fract() == 0.0 => Ok(Some(*f as i64)),
            Value::Text(s) => s
                .parse()
                .map(Some)
                .map_err(|_| StoreError::validation(column, format!("'{}' is not an integer", s))),
            other => Err(StoreError::validation(
                column,
                format!("expected integer, got {:?}", other),
            )),
        }
    }

    /// Column as a required integer.
    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.get_opt_i64(column)?
            .ok_or_else(|| StoreError::validation(column, "unexpected NULL"))
    }

    /// Column as text, NULL mapping to `None`.
    pub fn get_opt_string(&self, column: &str) -> Result<Option<String>> {
        match self.value(column)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.clone())),
            Value::Integer(i) => Ok(Some(i.to_string())),
            Value::Real(f) => Ok(Some(f.to_string())),
        }
    }

    /// Column as required text.
    pub fn get_string(&self, column: &str) -> Result<String> {
        self.get_opt_string(column)?
            .ok_or_else(|| StoreError::validation(column, "unexpected NULL"))
    }

    /// Column as a boolean stored as 0/1 (NULL is false).
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.value(column)? {
            Value::Null => Ok(false),
            Value::Integer(i) => Ok(*i != 0),
            Value::Real(f) => Ok(*f != 0.0),
            Value::Text(s) => Ok(matches!(s.as_str(), "1" | "true" | "t" | "TRUE")),
        }
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column names in select order.
    pub columns: Vec<String>,
    /// Result rows.
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Build a result set from column names and raw value rows.
    pub fn new(columns: Vec<String>, values: Vec<Vec<Value>>) -> Self {
        let shared: Arc<[String]> = columns.clone().into();
        let rows = values
            .into_iter()
            .map(|v| Row::new(shared.clone(), v))
            .collect();
        Self { columns, rows }
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Whether the query returned no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Storage interface used by the migration engine and the release manager.
///
/// Implementations must apply `execute_batch` atomically: either every
/// statement commits in submission order or none does.
#[async_trait]
pub trait Store: Send + Sync {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Execute one write statement.
    async fn execute_one(&self, statement: Statement) -> Result<ExecResult>;

    /// Execute a batch of write statements as one unit.
    async fn execute_batch(&self, statements: Vec<Statement>) -> Result<Vec<ExecResult>>;

    /// Run one read query.
    async fn query_one(&self, statement: Statement) -> Result<QueryResult>;

    /// Cheap readiness probe: succeeds once the store can serve requests.
    async fn ping(&self) -> Result<()>;

    /// Release connections held by this handle.
    async fn close(&self) {}
}

/// Classify a raw store error message.
pub(crate) fn classify_message(operation: &str, message: &str) -> StoreError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("unique constraint failed") || lower.contains("duplicate key") {
        StoreError::Conflict(message.to_string())
    } else if lower.contains("no such table")
        || lower.contains("leader not found")
        || lower.contains("not leader")
    {
        StoreError::NotReady(message.to_string())
    } else {
        StoreError::Rejected {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }
}
