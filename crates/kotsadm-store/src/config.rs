// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store configuration loaded from environment variables.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::error::Result;
use crate::persistence::{ReadConsistency, RqliteStore, SqliteStore, Store};
use crate::readiness::ReadinessOptions;

/// Connection settings for the system-of-record store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// `http(s)://` for the replicated store, `sqlite:` for the embedded one.
    pub uri: String,
    /// Consistency level for reads against the replicated store.
    pub read_consistency: ReadConsistency,
    /// How long and how often to wait for the store at startup.
    pub readiness: ReadinessOptions,
}

impl StoreConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `KOTSADM_STORE_URI`: replicated store or SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `KOTSADM_STORE_READ_CONSISTENCY`: none, weak or strong (default: strong)
    /// - `KOTSADM_STORE_READY_TIMEOUT_SECS`: readiness deadline (default: 300)
    /// - `KOTSADM_STORE_POLL_INTERVAL_MS`: readiness poll interval (default: 1000)
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        let uri = std::env::var("KOTSADM_STORE_URI")
            .map_err(|_| ConfigError::Missing("KOTSADM_STORE_URI"))?;

        let read_consistency = std::env::var("KOTSADM_STORE_READ_CONSISTENCY")
            .unwrap_or_else(|_| "strong".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "KOTSADM_STORE_READ_CONSISTENCY",
                    "must be one of none, weak, strong",
                )
            })?;

        let timeout_secs: u64 = std::env::var("KOTSADM_STORE_READY_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "KOTSADM_STORE_READY_TIMEOUT_SECS",
                    "must be a positive integer",
                )
            })?;

        let poll_interval_ms: u64 = std::env::var("KOTSADM_STORE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid("KOTSADM_STORE_POLL_INTERVAL_MS", "must be a positive integer")
            })?;

        if poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "KOTSADM_STORE_POLL_INTERVAL_MS",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            uri,
            read_consistency,
            readiness: ReadinessOptions {
                poll_interval: Duration::from_millis(poll_interval_ms),
                timeout: Duration::from_secs(timeout_secs),
            },
        })
    }

    /// Open a store handle, choosing the backend from the URI scheme.
    pub async fn open(&self) -> Result<Arc<dyn Store>> {
        open_store(&self.uri, self.read_consistency).await
    }
}

/// Open a store for `uri`, choosing the backend from its scheme.
pub async fn open_store(uri: &str, read_consistency: ReadConsistency) -> Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = if uri.starts_with("sqlite:") {
        Arc::new(SqliteStore::connect(uri).await?)
    } else if uri.starts_with("http://") || uri.starts_with("https://") {
        Arc::new(RqliteStore::connect(uri, read_consistency)?)
    } else {
        return Err(ConfigError::Invalid(
            "KOTSADM_STORE_URI",
            "scheme must be http, https or sqlite",
        )
        .into());
    };

    info!(backend = store.backend_name(), "Store handle opened");
    Ok(store)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}
