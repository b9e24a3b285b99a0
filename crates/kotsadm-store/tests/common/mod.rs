// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared helpers for kotsadm-store integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use kotsadm_store::StoreError;
use kotsadm_store::legacy::{LegacyRow, LegacySource};
use kotsadm_store::migrations::{self, SchemaSource};
use kotsadm_store::persistence::SqliteStore;
use kotsadm_store::schema::TableSchema;

/// Skip the test when no legacy PostgreSQL database is configured.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_LEGACY_DATABASE_URL").is_err() {
            eprintln!("Skipping test: TEST_LEGACY_DATABASE_URL not set");
            return;
        }
    };
}

/// In-memory legacy database keyed by table name.
#[derive(Default)]
pub struct FakeLegacySource {
    tables: HashMap<&'static str, Vec<LegacyRow>>,
    fail_on: Option<&'static str>,
    reads: AtomicUsize,
}

impl FakeLegacySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, table: &'static str, rows: Vec<LegacyRow>) -> Self {
        self.tables.entry(table).or_default().extend(rows);
        self
    }

    /// Make reads of `table` fail.
    pub fn failing_on(mut self, table: &'static str) -> Self {
        self.fail_on = Some(table);
        self
    }

    /// Number of table reads performed.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LegacySource for FakeLegacySource {
    async fn read_table(&self, table: &TableSchema) -> kotsadm_store::Result<Vec<LegacyRow>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(table.name) {
            return Err(StoreError::unavailable(
                format!("read legacy table {}", table.name),
                "connection reset by peer",
            ));
        }
        Ok(self.tables.get(table.name).cloned().unwrap_or_default())
    }
}

/// In-memory SQLite store with the embedded schema applied.
pub async fn store_with_schema() -> SqliteStore {
    let store = SqliteStore::in_memory().await.expect("in-memory store");
    migrations::apply_schema(&store, &SchemaSource::Embedded)
        .await
        .expect("apply schema");
    store
}
