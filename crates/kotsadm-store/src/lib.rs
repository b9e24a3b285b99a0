// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kotsadm store - system-of-record persistence for the release manager
//!
//! This crate owns everything between the release manager and its SQL
//! store: a backend-agnostic [`Store`](persistence::Store) handle, the table
//! descriptors and the DDL generated from them, a bounded readiness wait,
//! and the one-shot copy of a legacy PostgreSQL database into the store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   kotsadm-core (release manager)              │
//! └──────────────────────────────────────────────────────────────┘
//!                │ Arc<dyn Store>
//!                ▼
//! ┌──────────────────────────────┐      ┌────────────────────────┐
//! │  persistence::Store          │◄─────│  legacy::migrate_once  │◄── PostgreSQL
//! │  RqliteStore | SqliteStore   │      │  (coerce + upsert)     │    (legacy)
//! └──────────────────────────────┘      └────────────────────────┘
//!                │ HTTP / sqlx
//!                ▼
//! ┌──────────────────────────────┐
//! │  replicated SQL store         │
//! └──────────────────────────────┘
//! ```
//!
//! # Backends
//!
//! | URI scheme | Backend | Use |
//! |------------|---------|-----|
//! | `http://`, `https://` | [`RqliteStore`](persistence::RqliteStore) | replicated cluster |
//! | `sqlite:` | [`SqliteStore`](persistence::SqliteStore) | single node, tests |
//!
//! Multi-statement batches are all-or-nothing on both backends.
//!
//! # Modules
//!
//! - [`config`]: store configuration from environment variables
//! - [`error`]: error taxonomy with retryability and error codes
//! - [`legacy`]: legacy database migration engine
//! - [`migrations`]: schema application
//! - [`persistence`]: store trait and backends
//! - [`readiness`]: bounded wait for quorum/schema
//! - [`schema`]: table descriptors and DDL generation

#![deny(missing_docs)]

/// Store configuration loaded from environment variables.
pub mod config;

/// Error types with retryability classification.
pub mod error;

/// Legacy PostgreSQL to replicated store migration.
pub mod legacy;

/// Schema application and schema version tracking.
pub mod migrations;

/// Store trait, statements, result sets and backends.
pub mod persistence;

/// Startup readiness wait.
pub mod readiness;

/// Table descriptors.
pub mod schema;

pub use config::{ConfigError, StoreConfig, open_store};
pub use error::{Result, StatementError, StoreError};
pub use persistence::{ExecResult, QueryResult, Row, Statement, Store, Value};
