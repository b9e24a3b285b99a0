// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embedded SQLite backend.
//!
//! Speaks the same SQL dialect as the replicated store, so it serves single
//! node installs and the test suites without a running cluster.

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use sqlx::sqlite::{SqliteArguments, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, SqlitePool, ValueRef};
use tracing::debug;

use super::{ExecResult, QueryResult, Statement, Store, Value, classify_message};
use crate::error::{Result, StatementError, StoreError};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a `sqlite:` URL.
    ///
    /// In-memory databases are limited to a single connection, since every
    /// connection would otherwise see its own empty database.
    pub async fn connect(url: &str) -> Result<Self> {
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Create or open a database file, creating parent directories.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        Self::connect(&format!("sqlite:{}?mode=rwc", path.to_string_lossy())).await
    }

    /// Fresh in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_args<'q>(statement: &'q Statement) -> SqliteQuery<'q> {
    let mut query = sqlx::query(&statement.sql);
    for arg in &statement.args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Integer(i) => query.bind(*i),
            Value::Real(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

fn map_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict(db.message().to_string()),
        Some(db) => classify_message(operation, db.message()),
        None => StoreError::Database(err),
    }
}

fn decode_cell(row: &SqliteRow, idx: usize) -> Result<Value> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    if let Ok(i) = row.try_get::<i64, _>(idx) {
        return Ok(Value::Integer(i));
    }
    if let Ok(f) = row.try_get::<f64, _>(idx) {
        return Ok(Value::Real(f));
    }
    if let Ok(s) = row.try_get::<String, _>(idx) {
        return Ok(Value::Text(s));
    }
    if let Ok(bytes) = row.try_get::<Vec<u8>, _>(idx) {
        return Ok(Value::Text(BASE64.encode(bytes)));
    }
    Err(StoreError::validation(
        row.columns()
            .get(idx)
            .map(|c| c.name().to_string())
            .unwrap_or_default(),
        "unsupported column type",
    ))
}

#[async_trait]
impl Store for SqliteStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute_one(&self, statement: Statement) -> Result<ExecResult> {
        let result = bind_args(&statement)
            .execute(&self.pool)
            .await
            .map_err(|e| map_error("execute", e))?;

        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    async fn execute_batch(&self, statements: Vec<Statement>) -> Result<Vec<ExecResult>> {
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let total = statements.len();
        debug!(statements = total, "Executing transactional batch");

        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(total);

        for (index, statement) in statements.iter().enumerate() {
            match bind_args(statement).execute(&mut *tx).await {
                Ok(done) => results.push(ExecResult {
                    rows_affected: done.rows_affected(),
                    last_insert_id: Some(done.last_insert_rowid()),
                }),
                Err(err) => {
                    tx.rollback().await?;
                    return Err(match map_error("execute", err) {
                        conflict @ StoreError::Conflict(_) => conflict,
                        other => StoreError::BatchPartialFailure {
                            total,
                            errors: vec![StatementError {
                                index,
                                message: other.to_string(),
                            }],
                        },
                    });
                }
            }
        }

        tx.commit().await?;
        Ok(results)
    }

    async fn query_one(&self, statement: Statement) -> Result<QueryResult> {
        let rows = bind_args(&statement)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_error("query", e))?;

        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => Vec::new(),
        };

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                cells.push(decode_cell(row, idx)?);
            }
            values.push(cells);
        }

        Ok(QueryResult::new(columns, values))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::unavailable("ping", e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_table() -> SqliteStore {
        let store = SqliteStore::in_memory().await.expect("in-memory store");
        store
            .execute_one(Statement::new(
                "CREATE TABLE kotsadm_params (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            ))
            .await
            .expect("create table");
        store
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let store = store_with_table().await;

        store
            .execute_one(
                Statement::new("INSERT INTO kotsadm_params (key, value) VALUES (?, ?)")
                    .bind("a")
                    .bind("1"),
            )
            .await
            .unwrap();

        let result = store
            .query_one(Statement::new("SELECT key, value FROM kotsadm_params WHERE key = ?").bind("a"))
            .await
            .unwrap();

        assert_eq!(result.columns, vec!["key", "value"]);
        let row = result.first().expect("row");
        assert_eq!(row.get_string("value").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = store_with_table().await;

        let err = store
            .execute_batch(vec![
                Statement::new("INSERT INTO kotsadm_params (key, value) VALUES (?, ?)")
                    .bind("a")
                    .bind("1"),
                Statement::new("INSERT INTO missing_table (key) VALUES (?)").bind("b"),
            ])
            .await
            .unwrap_err();

        match err {
            StoreError::BatchPartialFailure { total, errors } => {
                assert_eq!(total, 2);
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].index, 1);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let result = store
            .query_one(Statement::new("SELECT COUNT(*) AS n FROM kotsadm_params"))
            .await
            .unwrap();
        assert_eq!(result.first().unwrap().get_i64("n").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unique_violation_is_conflict() {
        let store = store_with_table().await;
        let insert = || {
            Statement::new("INSERT INTO kotsadm_params (key, value) VALUES (?, ?)")
                .bind("dup")
                .bind("x")
        };

        store.execute_batch(vec![insert()]).await.unwrap();
        let err = store.execute_batch(vec![insert()]).await.unwrap_err();

        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_table_is_not_ready() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store
            .query_one(Statement::new("SELECT * FROM app"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotReady(_)));
    }

    #[tokio::test]
    async fn test_computed_columns_decode() {
        let store = store_with_table().await;
        let result = store
            .query_one(Statement::new(
                "SELECT COALESCE(MAX(rowid), -1) + 1 AS next, NULL AS nothing, 'x' AS label FROM kotsadm_params",
            ))
            .await
            .unwrap();
        let row = result.first().unwrap();
        assert_eq!(row.get_i64("next").unwrap(), 0);
        assert_eq!(row.get_opt_string("nothing").unwrap(), None);
        assert_eq!(row.get_string("label").unwrap(), "x");
    }

    #[tokio::test]
    async fn test_from_path_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.db");
        let store = SqliteStore::from_path(&path).await.unwrap();
        store.ping().await.unwrap();
        assert!(path.exists());
        store.close().await;
    }
}
