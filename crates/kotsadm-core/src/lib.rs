// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kotsadm core - Release Lifecycle Management
//!
//! This crate tracks applications, the clusters they are deployed to, and the
//! numbered release versions of each application. It decides the status of
//! every version on every downstream cluster and whether a version may be
//! deployed now.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     API handlers / CLI (external)                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      kotsadm-core (This Crate)                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐     │
//! │  │    Apps     │  │  Versions   │  │Deployability│  │  Sessions   │     │
//! │  │  + cache    │  │ + statuses  │  │  resolver   │  │ + OIDC state│     │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                 │                                │
//!           ▼                 ▼                                ▼
//! ┌───────────────────────────────────────┐        ┌─────────────────────────┐
//! │  kotsadm-store (rqlite / SQLite)      │        │  secret backend         │
//! └───────────────────────────────────────┘        └─────────────────────────┘
//! ```
//!
//! # Version Lifecycle
//!
//! Each release gets the next gap-free sequence number of its app. Every
//! downstream cluster gets a row for it whose initial status is computed
//! from the release contents (see [`status`]). Deploy attempts go through
//! [`deployability::is_deployable`], which enforces strict preflights, the
//! no-rollback rule and required intermediate versions.
//!
//! # Configuration
//!
//! Configuration is loaded from environment variables:
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `KOTSADM_STORE_URI` | Yes | - | Store URI (`http(s)://` or `sqlite:`) |
//! | `KOTSADM_LEGACY_DATABASE_URI` | No | - | Legacy PostgreSQL database to copy once |
//! | `KOTSADM_SCHEMA_DIR` | No | embedded | Store schema directory |
//! | `KOTSADM_CACHE_TTL_SECS` | No | `60` | App and task status cache TTL |
//! | `KOTSADM_SESSION_MAX_AGE_HOURS` | No | `12` | Session lifetime |
//! | `KOTSADM_ARCHIVE_DIR` | No | `.data/archives` | Release archive root |
//!
//! # Modules
//!
//! - [`apps`]: application records and the app cache
//! - [`clusters`]: clusters and app downstreams
//! - [`versions`]: sequence allocation, version history and status updates
//! - [`status`]: downstream status state machine
//! - [`ordering`]: cursor and semver version ordering
//! - [`deployability`]: deployability resolver
//! - [`session_store`]: sessions and OIDC anti-replay state
//! - [`maintenance_worker`]: background jobs

#![deny(missing_docs)]

/// Application records.
pub mod apps;

/// Generic TTL cache.
pub mod cache;

/// Clusters and downstream links.
pub mod clusters;

/// Archive storage and preflight runner seams.
pub mod collaborators;

/// Configuration loaded from environment variables.
pub mod config;

/// Deployability resolver.
pub mod deployability;

/// Error types with retryability classification.
pub mod error;

/// Background maintenance worker.
pub mod maintenance_worker;

/// Domain types.
pub mod models;

/// Version ordering strategies.
pub mod ordering;

/// Embeddable runtime.
pub mod runtime;

/// Authentication sessions.
pub mod session_store;

/// Downstream status computation.
pub mod status;

/// Task status messages.
pub mod tasks;

/// Versions and sequences.
pub mod versions;

pub use config::Config;
pub use error::{CoreError, Result};
pub use runtime::ReleaseRuntime;
