// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for kotsadm-core integration tests.
//!
//! Provides TestContext wiring repositories over an in-memory store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use kotsadm_core::apps::AppRepository;
use kotsadm_core::cache::AppCache;
use kotsadm_core::clusters::ClusterRepository;
use kotsadm_core::collaborators::FileArchiveStore;
use kotsadm_core::models::{App, Cluster, NewApp, ReleaseMaterial};
use kotsadm_core::versions::{CreateVersionOptions, VersionManager};
use kotsadm_store::Store;
use kotsadm_store::migrations::{self, SchemaSource};
use kotsadm_store::persistence::SqliteStore;

/// Repositories sharing one in-memory store.
pub struct TestContext {
    pub store: Arc<dyn Store>,
    pub apps: AppRepository,
    pub clusters: ClusterRepository,
    pub versions: VersionManager,
    pub archives: Arc<FileArchiveStore>,
    _archive_dir: tempfile::TempDir,
}

impl TestContext {
    /// Fresh store with the embedded schema applied.
    pub async fn new() -> Self {
        let store = SqliteStore::in_memory().await.expect("in-memory store");
        migrations::apply_schema(&store, &SchemaSource::Embedded)
            .await
            .expect("apply schema");
        let store: Arc<dyn Store> = Arc::new(store);

        let archive_dir = tempfile::TempDir::new().expect("temp dir");
        let archives = Arc::new(FileArchiveStore::new(archive_dir.path()));

        let apps = AppRepository::new(
            store.clone(),
            Arc::new(AppCache::new(Duration::from_secs(60))),
        );
        let clusters = ClusterRepository::new(store.clone());
        let versions = VersionManager::new(store.clone(), apps.clone(), archives.clone());

        Self {
            store,
            apps,
            clusters,
            versions,
            archives,
            _archive_dir: archive_dir,
        }
    }

    /// App deployed to one cluster.
    pub async fn app_with_downstream(&self, name: &str) -> (App, Cluster) {
        self.app_with_options(NewApp {
            name: name.to_string(),
            upstream_uri: format!("replicated://{}", name),
            channel_id: Some("stable".to_string()),
            ..Default::default()
        })
        .await
    }

    /// App from `new`, deployed to one cluster.
    pub async fn app_with_options(&self, new: NewApp) -> (App, Cluster) {
        let title = format!("{} cluster", new.name);
        let app = self.apps.create_app(new).await.expect("create app");
        let cluster = self
            .clusters
            .create_cluster(&title, "existing")
            .await
            .expect("create cluster");
        self.clusters
            .add_app_downstream(&app.id, &cluster.id, &cluster.slug)
            .await
            .expect("add downstream");
        (app, cluster)
    }

    /// Create a downloaded version on the "stable" channel.
    pub async fn release(&self, app_id: &str, label: &str, cursor: &str, required: bool) -> i64 {
        let material = ReleaseMaterial {
            update_cursor: Some(cursor.to_string()),
            channel_id: Some("stable".to_string()),
            is_required: required,
            ..ReleaseMaterial::new(label)
        };
        self.versions
            .create_version(app_id, &material, None, &CreateVersionOptions::default())
            .await
            .expect("create version")
    }
}
