// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for kotsadm-store.
//!
//! Every store and migration failure is wrapped with enough context to be
//! surfaced to the caller. Retryable failures are distinguishable through
//! [`StoreError::is_retryable`].

use std::fmt;

use thiserror::Error;

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure of a single statement inside a multi-statement batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementError {
    /// Position of the statement in the submitted batch.
    pub index: usize,
    /// Error reported by the store for that statement.
    pub message: String,
}

impl fmt::Display for StatementError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "statement {}: {}", self.index, self.message)
    }
}

/// Store errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// A row or key was absent where one was required.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of record that was looked up.
        entity: &'static str,
        /// Key that was looked up.
        key: String,
    },

    /// The store could not be reached (network failure, node down).
    #[error("store unavailable during '{operation}': {details}")]
    Unavailable {
        /// Operation that was attempted.
        operation: String,
        /// Error details.
        details: String,
    },

    /// The store is reachable but has no quorum or no schema yet.
    #[error("store not ready: {0}")]
    NotReady(String),

    /// One or more statements of a batch failed; nothing was committed.
    #[error("batch of {total} statements rejected: {}", join_statement_errors(.errors))]
    BatchPartialFailure {
        /// Number of statements submitted.
        total: usize,
        /// Every per-statement error reported by the store.
        errors: Vec<StatementError>,
    },

    /// The store rejected a statement (syntax, constraint, type error).
    #[error("store rejected '{operation}': {message}")]
    Rejected {
        /// Operation that was attempted.
        operation: String,
        /// Error reported by the store.
        message: String,
    },

    /// A write collided with an existing unique key.
    #[error("unique key conflict: {0}")]
    Conflict(String),

    /// Data read from a store could not be interpreted.
    #[error("validation error for '{field}': {message}")]
    Validation {
        /// Table or column that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled: {0}")]
    Cancelled(&'static str),

    /// The caller-supplied deadline elapsed.
    #[error("deadline exceeded after {elapsed_secs}s waiting for {operation}")]
    DeadlineExceeded {
        /// Operation that was waited on.
        operation: &'static str,
        /// Seconds waited before giving up.
        elapsed_secs: u64,
    },

    /// Configuration loading failed.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// SQL driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// HTTP transport error talking to the replicated store.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_statement_errors(errors: &[StatementError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl StoreError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::NotReady(_) | Self::Conflict(_) => true,
            Self::Http(err) => err.is_connect() || err.is_timeout(),
            Self::Database(sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => true,
            _ => false,
        }
    }

    /// Stable error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unavailable { .. } => "STORE_UNAVAILABLE",
            Self::NotReady(_) => "STORE_NOT_READY",
            Self::BatchPartialFailure { .. } => "BATCH_PARTIAL_FAILURE",
            Self::Rejected { .. } => "STATEMENT_REJECTED",
            Self::Conflict(_) => "CONFLICT",
            Self::Validation { .. } => "VALIDATION_FAILURE",
            Self::Cancelled(_) => "CANCELLED",
            Self::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Build a validation error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Build an unavailability error.
    pub fn unavailable(operation: impl Into<String>, details: impl fmt::Display) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            details: details.to_string(),
        }
    }
}
