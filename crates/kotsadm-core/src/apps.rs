// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! App records.
//!
//! Reads go through the [`AppCache`]; every write to an app drops its cache
//! entry so the next read sees the store.

use std::sync::Arc;

use chrono::Utc;
use kotsadm_store::{Row, Statement, Store, StoreError};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::AppCache;
use crate::error::{CoreError, Result};
use crate::models::{App, InstallState, NewApp, from_unix};

const APP_COLUMNS: &str = "id, slug, name, icon_uri, upstream_uri, license, channel_id, \
    is_semver_required, current_sequence, install_state, is_airgap, snapshot_schedule, \
    snapshot_ttl_new, created_at, updated_at, last_update_check_at";

/// Tables holding rows that belong to an app, deleted before the app itself.
const APP_CHILD_TABLES: &[&str] = &[
    "app_downstream_output",
    "app_downstream_version",
    "app_downstream",
    "app_version",
    "app_status",
    "preflight_result",
    "scheduled_snapshots",
    "user_app",
];

pub(crate) fn app_from_row(row: &Row) -> Result<App> {
    let install_state = row
        .get_string("install_state")?
        .parse::<InstallState>()
        .map_err(|e| StoreError::validation("app.install_state", e))?;

    Ok(App {
        id: row.get_string("id")?,
        slug: row.get_string("slug")?,
        name: row.get_string("name")?,
        icon_uri: row.get_opt_string("icon_uri")?,
        upstream_uri: row.get_string("upstream_uri")?,
        license: row.get_opt_string("license")?,
        channel_id: row.get_opt_string("channel_id")?,
        is_semver_required: row.get_bool("is_semver_required")?,
        current_sequence: row.get_opt_i64("current_sequence")?,
        install_state,
        is_airgap: row.get_bool("is_airgap")?,
        snapshot_schedule: row.get_opt_string("snapshot_schedule")?,
        snapshot_ttl: row.get_opt_string("snapshot_ttl_new")?,
        created_at: from_unix(row.get_i64("created_at")?),
        updated_at: row.get_opt_i64("updated_at")?.map(from_unix),
        last_update_check_at: row.get_opt_i64("last_update_check_at")?.map(from_unix),
    })
}

/// Lowercase ASCII slug with single dashes between words.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("app");
    }
    slug
}

/// Repository of apps.
#[derive(Clone)]
pub struct AppRepository {
    store: Arc<dyn Store>,
    cache: Arc<AppCache>,
}

impl AppRepository {
    /// Create a repository over a store and a shared app cache.
    pub fn new(store: Arc<dyn Store>, cache: Arc<AppCache>) -> Self {
        Self { store, cache }
    }

    /// The shared app cache.
    pub fn cache(&self) -> &Arc<AppCache> {
        &self.cache
    }

    /// Create an app with a fresh id and a unique slug derived from its name.
    pub async fn create_app(&self, new: NewApp) -> Result<App> {
        if new.name.trim().is_empty() {
            return Err(CoreError::InvalidRequest("app name must not be empty".to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let slug = self.unique_slug(&slugify(&new.name)).await?;
        let now = Utc::now().timestamp();

        self.store
            .execute_one(
                Statement::new(
                    "INSERT INTO app (id, name, slug, upstream_uri, license, channel_id, \
                     is_semver_required, install_state, is_airgap, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(&new.name)
                .bind(&slug)
                .bind(&new.upstream_uri)
                .bind(new.license.clone())
                .bind(new.channel_id.clone())
                .bind(new.is_semver_required)
                .bind(InstallState::NotInstalled.as_str())
                .bind(new.is_airgap)
                .bind(now)
                .bind(now),
            )
            .await?;

        info!(app_id = %id, slug = %slug, "Created app");
        self.get_app_uncached(&id).await
    }

    async fn unique_slug(&self, base: &str) -> Result<String> {
        let result = self
            .store
            .query_one(
                Statement::new("SELECT slug FROM app WHERE slug = ? OR slug LIKE ?")
                    .bind(base)
                    .bind(format!("{}-%", base)),
            )
            .await?;

        let taken: Vec<String> = result
            .rows
            .iter()
            .map(|row| row.get_string("slug"))
            .collect::<std::result::Result<_, _>>()?;

        if !taken.iter().any(|s| s == base) {
            return Ok(base.to_string());
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// App by id, served from the cache when fresh.
    pub async fn get_app(&self, id: &str) -> Result<App> {
        if let Some(app) = self.cache.get(&id.to_string()) {
            debug!(app_id = %id, "App cache hit");
            return Ok(app);
        }
        self.get_app_uncached(id).await
    }

    /// App by id, read from the store (refreshes the cache).
    pub async fn get_app_uncached(&self, id: &str) -> Result<App> {
        let result = self
            .store
            .query_one(
                Statement::new(format!("SELECT {} FROM app WHERE id = ?", APP_COLUMNS)).bind(id),
            )
            .await?;
        let row = result
            .first()
            .ok_or_else(|| CoreError::AppNotFound(id.to_string()))?;
        let app = app_from_row(row)?;
        self.cache.insert(app.id.clone(), app.clone());
        Ok(app)
    }

    /// App by slug.
    pub async fn get_app_by_slug(&self, slug: &str) -> Result<App> {
        let result = self
            .store
            .query_one(
                Statement::new(format!("SELECT {} FROM app WHERE slug = ?", APP_COLUMNS))
                    .bind(slug),
            )
            .await?;
        let row = result
            .first()
            .ok_or_else(|| CoreError::AppNotFound(slug.to_string()))?;
        app_from_row(row)
    }

    /// Every app, ordered by creation time.
    pub async fn list_apps(&self) -> Result<Vec<App>> {
        let result = self
            .store
            .query_one(Statement::new(format!(
                "SELECT {} FROM app ORDER BY created_at, id",
                APP_COLUMNS
            )))
            .await?;
        result.rows.iter().map(app_from_row).collect()
    }

    /// Move an app to a new install state.
    pub async fn set_install_state(&self, id: &str, state: InstallState) -> Result<()> {
        let app = self.get_app_uncached(id).await?;
        if !app.install_state.can_transition_to(state) {
            return Err(CoreError::InvalidInstallState {
                from: app.install_state.to_string(),
                to: state.to_string(),
            });
        }

        self.store
            .execute_one(
                Statement::new("UPDATE app SET install_state = ?, updated_at = ? WHERE id = ?")
                    .bind(state.as_str())
                    .bind(Utc::now().timestamp())
                    .bind(id),
            )
            .await?;
        self.cache.invalidate(&id.to_string());

        info!(app_id = %id, from = %app.install_state, to = %state, "App install state changed");
        Ok(())
    }

    /// Record that the upstream was just checked for updates.
    pub async fn set_update_checked(&self, id: &str) -> Result<()> {
        let done = self
            .store
            .execute_one(
                Statement::new("UPDATE app SET last_update_check_at = ? WHERE id = ?")
                    .bind(Utc::now().timestamp())
                    .bind(id),
            )
            .await?;
        self.cache.invalidate(&id.to_string());
        if done.rows_affected == 0 {
            return Err(CoreError::AppNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Delete an app and every row that belongs to it, in one batch.
    pub async fn remove_app(&self, id: &str) -> Result<()> {
        self.get_app_uncached(id).await?;

        let mut statements: Vec<Statement> = APP_CHILD_TABLES
            .iter()
            .map(|table| Statement::new(format!("DELETE FROM {} WHERE app_id = ?", table)).bind(id))
            .collect();
        statements.push(Statement::new("DELETE FROM app WHERE id = ?").bind(id));

        self.store.execute_batch(statements).await?;
        self.cache.invalidate(&id.to_string());

        info!(app_id = %id, "Removed app");
        Ok(())
    }
}
