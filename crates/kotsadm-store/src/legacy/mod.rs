// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One-shot copy of the legacy relational database into the replicated store.
//!
//! Every row of every table in [`schema::TABLES`] is read from the legacy
//! source, coerced to the replicated store's representation and turned into
//! an upsert. All upserts plus a final sentinel write are committed as a
//! single batch, so the copy is either fully applied and recorded, or not
//! applied at all. A recorded sentinel turns later runs into no-ops.
//!
//! Coercion rules:
//!
//! | Legacy value | Stored as |
//! |--------------|-----------|
//! | timestamp | unix seconds (integer) |
//! | binary | standard base64 text |
//! | boolean | 0 / 1 |
//! | NULL | column omitted from the upsert |

pub mod postgres;

pub use self::postgres::PostgresLegacySource;

use std::path::PathBuf;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::open_store;
use crate::error::{Result, StoreError};
use crate::migrations::{self, SchemaSource};
use crate::persistence::{ReadConsistency, Statement, Store, Value};
use crate::readiness::{ReadinessOptions, wait_for_ready};
use crate::schema::{self, ColumnKind, ColumnSchema, TableSchema};

/// Parameter key recording a completed legacy migration.
pub const MIGRATION_STATUS_KEY: &str = "LEGACY_MIGRATION_STATUS";

/// Value of [`MIGRATION_STATUS_KEY`] once the migration has committed.
pub const MIGRATION_COMPLETE: &str = "complete";

/// A value as read from the legacy database.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyValue {
    /// SQL NULL.
    Null,
    /// Text.
    Text(String),
    /// Integer.
    Integer(i64),
    /// Boolean.
    Boolean(bool),
    /// Timestamp (UTC).
    Timestamp(DateTime<Utc>),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl LegacyValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Integer(_) => "integer",
            Self::Boolean(_) => "boolean",
            Self::Timestamp(_) => "timestamp",
            Self::Binary(_) => "binary",
        }
    }
}

/// One legacy row as `(column, value)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyRow {
    values: Vec<(String, LegacyValue)>,
}

impl LegacyRow {
    /// Empty row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, column: impl Into<String>, value: LegacyValue) -> Self {
        self.push(column, value);
        self
    }

    /// Append a column value.
    pub fn push(&mut self, column: impl Into<String>, value: LegacyValue) {
        self.values.push((column.into(), value));
    }

    /// Columns and values in read order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LegacyValue)> {
        self.values.iter().map(|(c, v)| (c.as_str(), v))
    }
}

/// A readable legacy database.
#[async_trait]
pub trait LegacySource: Send + Sync {
    /// Read every row of `table`, decoding columns by their declared kind.
    async fn read_table(&self, table: &TableSchema) -> Result<Vec<LegacyRow>>;
}

/// Result of a [`migrate_once`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The sentinel was already recorded; nothing was read or written.
    AlreadyDone,
    /// The copy was committed.
    Migrated {
        /// Rows copied across all tables.
        rows: usize,
        /// Tables read.
        tables: usize,
    },
}

/// Coerce a legacy value for `column`; `None` means the column is omitted.
pub fn coerce(column: &ColumnSchema, value: &LegacyValue) -> Result<Option<Value>> {
    let coerced = match (column.kind, value) {
        (_, LegacyValue::Null) => return Ok(None),
        (ColumnKind::Text, LegacyValue::Text(s)) => Value::Text(s.clone()),
        (ColumnKind::Integer, LegacyValue::Integer(i)) => Value::Integer(*i),
        (ColumnKind::Boolean, LegacyValue::Boolean(b)) => Value::from(*b),
        (ColumnKind::Boolean, LegacyValue::Integer(i)) => Value::from(*i != 0),
        (ColumnKind::Timestamp, LegacyValue::Timestamp(t)) => Value::Integer(t.timestamp()),
        (ColumnKind::Timestamp, LegacyValue::Integer(secs)) => Value::Integer(*secs),
        (ColumnKind::Binary, LegacyValue::Binary(bytes)) => Value::Text(BASE64.encode(bytes)),
        (kind, other) => {
            return Err(StoreError::validation(
                column.name,
                format!("cannot store {} value in {:?} column", other.type_name(), kind),
            ));
        }
    };
    Ok(Some(coerced))
}

/// Build the upsert for one legacy row of `table`.
///
/// NULL columns are left out so the store's defaults apply. Non-key columns
/// present in the row are overwritten on conflict; a row holding only key
/// columns is inserted with `DO NOTHING`.
pub fn build_upsert(table: &TableSchema, row: &LegacyRow) -> Result<Statement> {
    let mut columns: Vec<&'static str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    for (name, value) in row.iter() {
        let column = table.column(name).ok_or_else(|| {
            StoreError::validation(
                format!("{}.{}", table.name, name),
                "column is not part of the table schema",
            )
        })?;
        let coerced = coerce(column, value).map_err(|e| match e {
            StoreError::Validation { message, .. } => {
                StoreError::validation(format!("{}.{}", table.name, name), message)
            }
            other => other,
        })?;
        if let Some(coerced) = coerced {
            columns.push(column.name);
            args.push(coerced);
        }
    }

    for key in table.primary_key {
        if !columns.contains(key) {
            return Err(StoreError::validation(
                format!("{}.{}", table.name, key),
                "primary key value is missing",
            ));
        }
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !table.is_key(c))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    let conflict_action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        table.name,
        columns.join(", "),
        placeholders,
        table.primary_key.join(", "),
        conflict_action
    );
    Ok(Statement::with_args(sql, args))
}

fn sentinel_statement() -> Statement {
    Statement::new(
        "INSERT INTO kotsadm_params (key, value) VALUES (?, ?) \
         ON CONFLICT (key) DO UPDATE SET value = excluded.value",
    )
    .bind(MIGRATION_STATUS_KEY)
    .bind(MIGRATION_COMPLETE)
}

/// Whether the migration sentinel is recorded in `store`.
pub async fn is_migrated(store: &dyn Store) -> Result<bool> {
    let result = store
        .query_one(
            Statement::new("SELECT value FROM kotsadm_params WHERE key = ?")
                .bind(MIGRATION_STATUS_KEY),
        )
        .await?;

    match result.first() {
        Some(row) => Ok(row.get_opt_string("value")?.as_deref() == Some(MIGRATION_COMPLETE)),
        None => Ok(false),
    }
}

/// Copy every legacy table into `store` unless already done.
///
/// Any read or coercion failure, or cancellation, aborts before anything is
/// written. Once the batch has been submitted it runs to completion, so a
/// committed copy is always reported as migrated.
pub async fn migrate_once(
    source: &dyn LegacySource,
    store: &dyn Store,
    cancel: &CancellationToken,
) -> Result<MigrationOutcome> {
    if is_migrated(store).await? {
        info!("Legacy migration already recorded, skipping");
        return Ok(MigrationOutcome::AlreadyDone);
    }

    let mut batch = Vec::new();
    let mut rows = 0usize;

    for table in schema::TABLES {
        if cancel.is_cancelled() {
            warn!(table = table.name, "Legacy migration cancelled before commit");
            return Err(StoreError::Cancelled("legacy migration"));
        }

        let legacy_rows = source.read_table(table).await?;
        debug!(table = table.name, rows = legacy_rows.len(), "Read legacy table");

        for row in &legacy_rows {
            batch.push(build_upsert(table, row)?);
        }
        rows += legacy_rows.len();
    }

    if cancel.is_cancelled() {
        warn!("Legacy migration cancelled before commit");
        return Err(StoreError::Cancelled("legacy migration"));
    }

    batch.push(sentinel_statement());
    info!(
        rows,
        tables = schema::TABLES.len(),
        statements = batch.len(),
        "Committing legacy migration batch"
    );
    store.execute_batch(batch).await?;

    info!(rows, "Legacy migration committed");
    Ok(MigrationOutcome::Migrated {
        rows,
        tables: schema::TABLES.len(),
    })
}

/// Inputs of [`migrate_from_legacy`].
#[derive(Debug, Clone)]
pub struct LegacyMigrationRequest {
    /// `postgres://` URI of the legacy database.
    pub legacy_uri: String,
    /// Schema directory for the legacy database; embedded DDL when `None`.
    pub legacy_schema_dir: Option<PathBuf>,
    /// URI of the replicated store.
    pub target_uri: String,
    /// Schema directory for the replicated store; embedded DDL when `None`.
    pub target_schema_dir: Option<PathBuf>,
}

/// Bring both schemas up to date and copy the legacy data once.
///
/// Safe to call repeatedly: schemas are applied idempotently and the copy
/// short-circuits on the recorded sentinel.
pub async fn migrate_from_legacy(
    request: &LegacyMigrationRequest,
    cancel: &CancellationToken,
) -> Result<MigrationOutcome> {
    let legacy = PostgresLegacySource::connect(&request.legacy_uri).await?;
    let target = open_store(&request.target_uri, ReadConsistency::Strong).await?;

    let outcome = async {
        legacy
            .apply_schema(&SchemaSource::from_dir(request.legacy_schema_dir.as_deref()))
            .await?;

        wait_for_ready(target.as_ref(), ReadinessOptions::default(), cancel).await?;
        migrations::apply_schema(
            target.as_ref(),
            &SchemaSource::from_dir(request.target_schema_dir.as_deref()),
        )
        .await?;

        migrate_once(&legacy, target.as_ref(), cancel).await
    }
    .await;

    legacy.close().await;
    target.close().await;
    outcome
}
