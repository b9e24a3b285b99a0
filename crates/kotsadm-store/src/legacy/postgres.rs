// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL legacy source.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{LegacyRow, LegacySource, LegacyValue};
use crate::error::{Result, StoreError};
use crate::migrations::SchemaSource;
use crate::schema::{ColumnKind, ColumnSchema, Dialect, TableSchema};

/// Legacy database reached through a sqlx Postgres pool.
#[derive(Clone)]
pub struct PostgresLegacySource {
    pool: PgPool,
}

impl PostgresLegacySource {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to a `postgres://` URI.
    pub async fn connect(uri: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(uri)
            .await
            .map_err(|e| StoreError::unavailable("connect legacy database", e))?;
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create any missing legacy tables in one transaction.
    pub async fn apply_schema(&self, source: &SchemaSource) -> Result<()> {
        let statements = source.statements(Dialect::Postgres).await?;
        let mut tx = self.pool.begin().await?;
        for sql in &statements {
            sqlx::query(sql).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        info!(statements = statements.len(), "Legacy schema applied");
        Ok(())
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn decode_column(row: &PgRow, table: &TableSchema, column: &ColumnSchema) -> Result<LegacyValue> {
    let name = column.name;
    let invalid = |e: sqlx::Error| {
        StoreError::validation(format!("{}.{}", table.name, name), e.to_string())
    };

    let value = match column.kind {
        ColumnKind::Text => row
            .try_get::<Option<String>, _>(name)
            .map_err(invalid)?
            .map(LegacyValue::Text),
        ColumnKind::Integer => match row.try_get::<Option<i64>, _>(name) {
            Ok(v) => v,
            Err(_) => row
                .try_get::<Option<i32>, _>(name)
                .map_err(invalid)?
                .map(i64::from),
        }
        .map(LegacyValue::Integer),
        ColumnKind::Boolean => row
            .try_get::<Option<bool>, _>(name)
            .map_err(invalid)?
            .map(LegacyValue::Boolean),
        ColumnKind::Timestamp => match row.try_get::<Option<NaiveDateTime>, _>(name) {
            Ok(v) => v.map(|naive| naive.and_utc()),
            Err(_) => row
                .try_get::<Option<DateTime<Utc>>, _>(name)
                .map_err(invalid)?,
        }
        .map(LegacyValue::Timestamp),
        ColumnKind::Binary => row
            .try_get::<Option<Vec<u8>>, _>(name)
            .map_err(invalid)?
            .map(LegacyValue::Binary),
    };

    Ok(value.unwrap_or(LegacyValue::Null))
}

#[async_trait]
impl LegacySource for PostgresLegacySource {
    async fn read_table(&self, table: &TableSchema) -> Result<Vec<LegacyRow>> {
        let columns: Vec<&str> = table.columns.iter().map(|c| c.name).collect();
        let sql = format!("SELECT {} FROM {}", columns.join(", "), table.name);

        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::unavailable(format!("read legacy table {}", table.name), e))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut legacy = LegacyRow::new();
            for column in table.columns {
                legacy.push(column.name, decode_column(row, table, column)?);
            }
            out.push(legacy);
        }

        debug!(table = table.name, rows = out.len(), "Decoded legacy rows");
        Ok(out)
    }
}
