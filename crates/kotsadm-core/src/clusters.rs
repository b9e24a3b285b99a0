// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Clusters (deployment targets) and app downstreams.

use std::sync::Arc;

use chrono::Utc;
use kotsadm_store::{Row, Statement, Store};
use tracing::info;
use uuid::Uuid;

use crate::apps::slugify;
use crate::error::{CoreError, Result};
use crate::models::{Cluster, Downstream, from_unix};

const CLUSTER_COLUMNS: &str =
    "id, slug, title, token, cluster_type, snapshot_schedule, snapshot_ttl, created_at";

fn cluster_from_row(row: &Row) -> Result<Cluster> {
    Ok(Cluster {
        id: row.get_string("id")?,
        slug: row.get_string("slug")?,
        title: row.get_string("title")?,
        token: row.get_opt_string("token")?,
        cluster_type: row.get_string("cluster_type")?,
        snapshot_schedule: row.get_opt_string("snapshot_schedule")?,
        snapshot_ttl: row.get_opt_string("snapshot_ttl")?,
        created_at: from_unix(row.get_i64("created_at")?),
    })
}

pub(crate) fn downstream_from_row(row: &Row) -> Result<Downstream> {
    Ok(Downstream {
        app_id: row.get_string("app_id")?,
        cluster_id: row.get_string("cluster_id")?,
        downstream_name: row.get_string("downstream_name")?,
        current_sequence: row.get_opt_i64("current_sequence")?,
    })
}

/// Repository of clusters and their app downstreams.
#[derive(Clone)]
pub struct ClusterRepository {
    store: Arc<dyn Store>,
}

impl ClusterRepository {
    /// Create a repository over a store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a cluster with a fresh id and agent token.
    ///
    /// The slug is derived from the title; a taken slug is a conflict.
    pub async fn create_cluster(&self, title: &str, cluster_type: &str) -> Result<Cluster> {
        if title.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "cluster title must not be empty".to_string(),
            ));
        }

        let id = Uuid::new_v4().to_string();
        let token = Uuid::new_v4().simple().to_string();
        let slug = slugify(title);

        self.store
            .execute_one(
                Statement::new(
                    "INSERT INTO cluster (id, title, slug, token, cluster_type, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(&id)
                .bind(title)
                .bind(&slug)
                .bind(&token)
                .bind(cluster_type)
                .bind(Utc::now().timestamp()),
            )
            .await?;

        info!(cluster_id = %id, slug = %slug, "Registered cluster");
        self.get_cluster(&id).await
    }

    /// Cluster by id.
    pub async fn get_cluster(&self, id: &str) -> Result<Cluster> {
        let result = self
            .store
            .query_one(
                Statement::new(format!(
                    "SELECT {} FROM cluster WHERE id = ?",
                    CLUSTER_COLUMNS
                ))
                .bind(id),
            )
            .await?;
        let row = result
            .first()
            .ok_or_else(|| CoreError::ClusterNotFound(id.to_string()))?;
        cluster_from_row(row)
    }

    /// Cluster authenticated by an agent token.
    pub async fn get_cluster_by_token(&self, token: &str) -> Result<Cluster> {
        let result = self
            .store
            .query_one(
                Statement::new(format!(
                    "SELECT {} FROM cluster WHERE token = ?",
                    CLUSTER_COLUMNS
                ))
                .bind(token),
            )
            .await?;
        let row = result
            .first()
            .ok_or_else(|| CoreError::ClusterNotFound("<token>".to_string()))?;
        cluster_from_row(row)
    }

    /// Deploy an app to a cluster. Nothing is deployed until a version is marked deployed.
    pub async fn add_app_downstream(
        &self,
        app_id: &str,
        cluster_id: &str,
        downstream_name: &str,
    ) -> Result<Downstream> {
        self.get_cluster(cluster_id).await?;

        let exists = self
            .store
            .query_one(Statement::new("SELECT id FROM app WHERE id = ?").bind(app_id))
            .await?;
        if exists.is_empty() {
            return Err(CoreError::AppNotFound(app_id.to_string()));
        }

        self.store
            .execute_one(
                Statement::new(
                    "INSERT INTO app_downstream (app_id, cluster_id, downstream_name) \
                     VALUES (?, ?, ?) \
                     ON CONFLICT (app_id, cluster_id) DO UPDATE SET downstream_name = excluded.downstream_name",
                )
                .bind(app_id)
                .bind(cluster_id)
                .bind(downstream_name),
            )
            .await?;

        info!(app_id = %app_id, cluster_id = %cluster_id, "Added app downstream");
        self.get_downstream(app_id, cluster_id).await
    }

    /// Downstream of an app on a cluster.
    pub async fn get_downstream(&self, app_id: &str, cluster_id: &str) -> Result<Downstream> {
        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT app_id, cluster_id, downstream_name, current_sequence \
                     FROM app_downstream WHERE app_id = ? AND cluster_id = ?",
                )
                .bind(app_id)
                .bind(cluster_id),
            )
            .await?;
        let row = result.first().ok_or_else(|| CoreError::DownstreamNotFound {
            app_id: app_id.to_string(),
            cluster_id: cluster_id.to_string(),
        })?;
        downstream_from_row(row)
    }

    /// Every downstream of an app.
    pub async fn list_downstreams(&self, app_id: &str) -> Result<Vec<Downstream>> {
        list_downstreams(self.store.as_ref(), app_id).await
    }
}

pub(crate) async fn list_downstreams(store: &dyn Store, app_id: &str) -> Result<Vec<Downstream>> {
    let result = store
        .query_one(
            Statement::new(
                "SELECT app_id, cluster_id, downstream_name, current_sequence \
                 FROM app_downstream WHERE app_id = ? ORDER BY cluster_id",
            )
            .bind(app_id),
        )
        .await?;
    result.rows.iter().map(downstream_from_row).collect()
}
