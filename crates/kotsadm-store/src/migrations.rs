// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Schema application for the replicated store.
//!
//! The schema comes either from the embedded table descriptors or from a
//! directory of `*.sql` files applied in lexical order. Statements are
//! `CREATE TABLE IF NOT EXISTS`, so applying twice is a no-op.
//!
//! # Example
//!
//! ```ignore
//! use kotsadm_store::migrations::{self, SchemaSource};
//!
//! let store = config.open().await?;
//! migrations::apply_schema(store.as_ref(), &SchemaSource::Embedded).await?;
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::persistence::{Statement, Store};
use crate::schema::{self, Dialect};

/// Parameter key holding the applied schema version.
pub const SCHEMA_VERSION_KEY: &str = "SCHEMA_VERSION";

/// Where schema DDL comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// DDL generated from the built-in table descriptors.
    Embedded,
    /// `*.sql` files in a directory, applied in lexical file-name order.
    Directory(PathBuf),
}

impl SchemaSource {
    /// Directory source when `dir` is set, embedded descriptors otherwise.
    pub fn from_dir(dir: Option<&Path>) -> Self {
        match dir {
            Some(dir) => Self::Directory(dir.to_path_buf()),
            None => Self::Embedded,
        }
    }

    /// DDL statements for `dialect`.
    ///
    /// Directory sources are dialect specific by construction, so `dialect`
    /// only applies to the embedded descriptors.
    pub async fn statements(&self, dialect: Dialect) -> Result<Vec<String>> {
        match self {
            Self::Embedded => Ok(schema::ddl(dialect)),
            Self::Directory(dir) => read_sql_dir(dir).await,
        }
    }
}

async fn read_sql_dir(dir: &Path) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(StoreError::validation(
            dir.display().to_string(),
            "schema directory contains no .sql files",
        ));
    }

    let mut statements = Vec::new();
    for file in files {
        let text = tokio::fs::read_to_string(&file).await?;
        debug!(file = %file.display(), "Loaded schema file");
        statements.extend(split_statements(&text));
    }
    Ok(statements)
}

/// Split a SQL script on `;`, dropping blank statements and `--` comment lines.
pub fn split_statements(script: &str) -> Vec<String> {
    let without_comments: String = script
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Apply the schema to `store` and record [`schema::SCHEMA_VERSION`].
///
/// DDL and the version marker are submitted as one batch.
pub async fn apply_schema(store: &dyn Store, source: &SchemaSource) -> Result<()> {
    let ddl = source.statements(Dialect::Sqlite).await?;
    let count = ddl.len();

    let mut batch: Vec<Statement> = ddl.into_iter().map(Statement::new).collect();
    batch.push(
        Statement::new(
            "INSERT INTO kotsadm_params (key, value) VALUES (?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(SCHEMA_VERSION_KEY)
        .bind(schema::SCHEMA_VERSION.to_string()),
    );

    store.execute_batch(batch).await?;

    info!(
        backend = store.backend_name(),
        statements = count,
        version = schema::SCHEMA_VERSION,
        "Schema applied"
    );
    Ok(())
}

/// Schema version recorded in the store, if any.
pub async fn schema_version(store: &dyn Store) -> Result<Option<i64>> {
    let result = store
        .query_one(
            Statement::new("SELECT value FROM kotsadm_params WHERE key = ?")
                .bind(SCHEMA_VERSION_KEY),
        )
        .await?;

    match result.first() {
        Some(row) => row.get_opt_i64("value"),
        None => Ok(None),
    }
}
