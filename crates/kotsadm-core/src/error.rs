// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for kotsadm-core.

use kotsadm_store::StoreError;
use thiserror::Error;

/// Release manager errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// App was not found.
    #[error("app not found: {0}")]
    AppNotFound(String),

    /// Cluster was not found.
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    /// App is not deployed to the cluster.
    #[error("app {app_id} has no downstream for cluster {cluster_id}")]
    DownstreamNotFound {
        /// App id.
        app_id: String,
        /// Cluster id.
        cluster_id: String,
    },

    /// Version was not found.
    #[error("version {sequence} of app {app_id} not found")]
    VersionNotFound {
        /// App id.
        app_id: String,
        /// Requested sequence.
        sequence: i64,
    },

    /// The deployability resolver rejected the version.
    #[error("version is not deployable: {cause}")]
    NotDeployable {
        /// Human readable cause.
        cause: String,
    },

    /// The version is older than the deployed one.
    #[error("cannot roll back from sequence {current} to {sequence}")]
    RollbackUnsupported {
        /// Requested sequence.
        sequence: i64,
        /// Currently deployed sequence.
        current: i64,
    },

    /// Install state change is not allowed.
    #[error("invalid install state transition from {from} to {to}")]
    InvalidInstallState {
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },

    /// Concurrent writers kept taking the next sequence.
    #[error("failed to allocate a sequence for app {app_id} after {attempts} attempts")]
    SequenceAllocation {
        /// App id.
        app_id: String,
        /// Attempts made.
        attempts: u32,
    },

    /// Archive storage failed.
    #[error("archive error: {0}")]
    Archive(String),

    /// Preflight handling failed.
    #[error("preflight error: {0}")]
    Preflight(String),

    /// Session storage failed.
    #[error("session error: {0}")]
    Session(String),

    /// The maintenance worker no longer accepts jobs.
    #[error("maintenance worker is not running")]
    WorkerStopped,

    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// JSON serialization/deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::SequenceAllocation { .. } => true,
            _ => false,
        }
    }

    /// Stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.error_code(),
            Self::Config(_) => "CONFIG_ERROR",
            Self::AppNotFound(_) => "APP_NOT_FOUND",
            Self::ClusterNotFound(_) => "CLUSTER_NOT_FOUND",
            Self::DownstreamNotFound { .. } => "DOWNSTREAM_NOT_FOUND",
            Self::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            Self::NotDeployable { .. } => "NOT_DEPLOYABLE",
            Self::RollbackUnsupported { .. } => "ROLLBACK_UNSUPPORTED",
            Self::InvalidInstallState { .. } => "INVALID_INSTALL_STATE",
            Self::SequenceAllocation { .. } => "SEQUENCE_ALLOCATION_FAILED",
            Self::Archive(_) => "ARCHIVE_ERROR",
            Self::Preflight(_) => "PREFLIGHT_ERROR",
            Self::Session(_) => "SESSION_ERROR",
            Self::WorkerStopped => "WORKER_STOPPED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Json(_) => "JSON_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_keep_their_code_and_retryability() {
        let err: CoreError = StoreError::Conflict("UNIQUE constraint failed".to_string()).into();
        assert_eq!(err.error_code(), "CONFLICT");
        assert!(err.is_retryable());

        let err: CoreError = StoreError::validation("app.slug", "bad").into();
        assert_eq!(err.error_code(), "VALIDATION_FAILURE");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_domain_error_messages() {
        let err = CoreError::VersionNotFound {
            app_id: "app-1".to_string(),
            sequence: 4,
        };
        assert_eq!(err.to_string(), "version 4 of app app-1 not found");
        assert_eq!(err.error_code(), "VERSION_NOT_FOUND");

        let err = CoreError::NotDeployable {
            cause: "blocked".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "version is not deployable: blocked");
    }
}
