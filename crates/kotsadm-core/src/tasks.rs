// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Progress messages of long running tasks (`api_task_status`), cached
//! read-through and write-through.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kotsadm_store::{Statement, Store};
use tracing::{debug, info};

use crate::cache::TtlCache;
use crate::error::{CoreError, Result};
use crate::models::{TaskStatus, from_unix};

/// Task status repository.
#[derive(Clone)]
pub struct TaskStatusStore {
    store: Arc<dyn Store>,
    cache: Arc<TtlCache<String, TaskStatus>>,
}

impl TaskStatusStore {
    /// Create a repository whose cache entries live for `ttl`.
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self {
            store,
            cache: Arc::new(TtlCache::new(ttl)),
        }
    }

    /// Record the latest message of a task.
    pub async fn set_task_status(&self, id: &str, message: &str, status: &str) -> Result<()> {
        let now = Utc::now();
        self.store
            .execute_one(
                Statement::new(
                    "INSERT INTO api_task_status (id, updated_at, current_message, status) \
                     VALUES (?, ?, ?, ?) ON CONFLICT (id) DO UPDATE SET \
                     updated_at = excluded.updated_at, current_message = excluded.current_message, \
                     status = excluded.status",
                )
                .bind(id)
                .bind(now.timestamp())
                .bind(message)
                .bind(status),
            )
            .await?;

        self.cache.insert(
            id.to_string(),
            TaskStatus {
                id: id.to_string(),
                current_message: message.to_string(),
                status: status.to_string(),
                updated_at: from_unix(now.timestamp()),
            },
        );
        debug!(task_id = %id, status = %status, "Task status set");
        Ok(())
    }

    /// Latest status of a task, if any.
    pub async fn get_task_status(&self, id: &str) -> Result<Option<TaskStatus>> {
        if let Some(status) = self.cache.get(&id.to_string()) {
            return Ok(Some(status));
        }

        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT id, updated_at, current_message, status FROM api_task_status WHERE id = ?",
                )
                .bind(id),
            )
            .await?;
        let Some(row) = result.first() else {
            return Ok(None);
        };

        let status = TaskStatus {
            id: row.get_string("id")?,
            current_message: row.get_opt_string("current_message")?.unwrap_or_default(),
            status: row.get_opt_string("status")?.unwrap_or_default(),
            updated_at: from_unix(row.get_opt_i64("updated_at")?.unwrap_or_default()),
        };
        self.cache.insert(id.to_string(), status.clone());
        Ok(Some(status))
    }

    /// Forget a task.
    pub async fn clear_task_status(&self, id: &str) -> Result<()> {
        self.store
            .execute_one(Statement::new("DELETE FROM api_task_status WHERE id = ?").bind(id))
            .await?;
        self.cache.invalidate(&id.to_string());
        Ok(())
    }

    /// Delete tasks not updated for `older_than`. Returns the number removed.
    pub async fn clear_stale_task_statuses(&self, older_than: Duration) -> Result<u64> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| CoreError::InvalidRequest(format!("invalid duration: {}", e)))?;
        let cutoff = (Utc::now() - age).timestamp();

        let done = self
            .store
            .execute_one(
                Statement::new("DELETE FROM api_task_status WHERE updated_at < ?").bind(cutoff),
            )
            .await?;
        self.cache.clear();

        if done.rows_affected > 0 {
            info!(removed = done.rows_affected, "Cleared stale task statuses");
        }
        Ok(done.rows_affected)
    }
}
