// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for apps, clusters, downstreams and task statuses.

mod common;

use std::time::Duration;

use common::TestContext;
use kotsadm_core::CoreError;
use kotsadm_core::models::{InstallState, NewApp};
use kotsadm_core::tasks::TaskStatusStore;
use kotsadm_store::Statement;

fn new_app(name: &str) -> NewApp {
    NewApp {
        name: name.to_string(),
        upstream_uri: "replicated://app".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_slugs_are_unique() {
    let ctx = TestContext::new().await;

    let first = ctx.apps.create_app(new_app("My App")).await.unwrap();
    let second = ctx.apps.create_app(new_app("My App")).await.unwrap();
    let third = ctx.apps.create_app(new_app("my app!")).await.unwrap();

    assert_eq!(first.slug, "my-app");
    assert_eq!(second.slug, "my-app-2");
    assert_eq!(third.slug, "my-app-3");
    assert_ne!(first.id, second.id);
    assert_eq!(first.install_state, InstallState::NotInstalled);
    assert_eq!(first.current_sequence, None);

    let by_slug = ctx.apps.get_app_by_slug("my-app-2").await.unwrap();
    assert_eq!(by_slug.id, second.id);
    assert_eq!(ctx.apps.list_apps().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_create_app_requires_name() {
    let ctx = TestContext::new().await;

    let err = ctx.apps.create_app(new_app(" ")).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_cached_reads_until_invalidated() {
    let ctx = TestContext::new().await;
    let app = ctx.apps.create_app(new_app("Cached")).await.unwrap();

    ctx.store
        .execute_one(
            Statement::new("UPDATE app SET name = ? WHERE id = ?")
                .bind("Renamed")
                .bind(&app.id),
        )
        .await
        .unwrap();

    assert_eq!(ctx.apps.get_app(&app.id).await.unwrap().name, "Cached");
    assert_eq!(ctx.apps.get_app_uncached(&app.id).await.unwrap().name, "Renamed");
    // The uncached read refreshed the cache.
    assert_eq!(ctx.apps.get_app(&app.id).await.unwrap().name, "Renamed");
}

#[tokio::test]
async fn test_install_state_transitions() {
    let ctx = TestContext::new().await;
    let app = ctx.apps.create_app(new_app("Install")).await.unwrap();

    ctx.apps
        .set_install_state(&app.id, InstallState::AirgapUploadPending)
        .await
        .unwrap();
    ctx.apps
        .set_install_state(&app.id, InstallState::AirgapUploadInProgress)
        .await
        .unwrap();
    ctx.apps
        .set_install_state(&app.id, InstallState::Installed)
        .await
        .unwrap();
    assert_eq!(
        ctx.apps.get_app(&app.id).await.unwrap().install_state,
        InstallState::Installed
    );

    let err = ctx
        .apps
        .set_install_state(&app.id, InstallState::NotInstalled)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidInstallState { .. }));

    ctx.apps.set_update_checked(&app.id).await.unwrap();
    assert!(
        ctx.apps
            .get_app(&app.id)
            .await
            .unwrap()
            .last_update_check_at
            .is_some()
    );
}

#[tokio::test]
async fn test_remove_app_deletes_dependents() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Doomed").await;
    let (other, _) = ctx.app_with_downstream("Survivor").await;
    let seq = ctx.release(&app.id, "1.0.0", "1", false).await;
    ctx.release(&other.id, "2.0.0", "1", false).await;
    ctx.versions.mark_deployed(&app.id, &cluster.id, seq).await.unwrap();

    ctx.apps.remove_app(&app.id).await.unwrap();

    assert!(matches!(
        ctx.apps.get_app(&app.id).await.unwrap_err(),
        CoreError::AppNotFound(_)
    ));
    assert!(ctx.clusters.list_downstreams(&app.id).await.unwrap().is_empty());
    let leftover = ctx
        .store
        .query_one(Statement::new("SELECT sequence FROM app_version WHERE app_id = ?").bind(&app.id))
        .await
        .unwrap();
    assert!(leftover.is_empty());

    assert_eq!(ctx.versions.next_sequence(&other.id).await.unwrap(), 1);
    // Clusters outlive the apps deployed to them.
    ctx.clusters.get_cluster(&cluster.id).await.unwrap();

    let err = ctx.apps.remove_app(&app.id).await.unwrap_err();
    assert!(matches!(err, CoreError::AppNotFound(_)));
}

#[tokio::test]
async fn test_clusters_and_downstreams() {
    let ctx = TestContext::new().await;
    let app = ctx.apps.create_app(new_app("Target")).await.unwrap();
    let cluster = ctx.clusters.create_cluster("Prod East", "existing").await.unwrap();

    assert_eq!(cluster.slug, "prod-east");
    let token = cluster.token.clone().expect("token");
    assert_eq!(
        ctx.clusters.get_cluster_by_token(&token).await.unwrap().id,
        cluster.id
    );

    let err = ctx
        .clusters
        .add_app_downstream("missing", &cluster.id, "prod")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::AppNotFound(_)));
    let err = ctx
        .clusters
        .add_app_downstream(&app.id, "missing", "prod")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ClusterNotFound(_)));
    let err = ctx.clusters.get_downstream(&app.id, &cluster.id).await.unwrap_err();
    assert!(matches!(err, CoreError::DownstreamNotFound { .. }));

    let downstream = ctx
        .clusters
        .add_app_downstream(&app.id, &cluster.id, "prod")
        .await
        .unwrap();
    assert_eq!(downstream.current_sequence, None);

    let renamed = ctx
        .clusters
        .add_app_downstream(&app.id, &cluster.id, "production")
        .await
        .unwrap();
    assert_eq!(renamed.downstream_name, "production");
    assert_eq!(ctx.clusters.list_downstreams(&app.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_versions_created_before_a_downstream_are_not_backfilled() {
    let ctx = TestContext::new().await;
    let app = ctx.apps.create_app(new_app("Late")).await.unwrap();
    ctx.release(&app.id, "1.0.0", "1", false).await;

    let cluster = ctx.clusters.create_cluster("Late Cluster", "existing").await.unwrap();
    ctx.clusters
        .add_app_downstream(&app.id, &cluster.id, "late")
        .await
        .unwrap();

    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    assert!(history.versions.is_empty());

    let seq = ctx.release(&app.id, "1.1.0", "2", false).await;
    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    assert_eq!(history.versions.len(), 1);
    assert_eq!(history.versions[0].sequence, seq);
}

#[tokio::test]
async fn test_task_status_lifecycle() {
    let ctx = TestContext::new().await;
    let tasks = TaskStatusStore::new(ctx.store.clone(), Duration::from_secs(60));

    assert!(tasks.get_task_status("update-download").await.unwrap().is_none());

    tasks
        .set_task_status("update-download", "Downloading 1.2.0", "running")
        .await
        .unwrap();
    let status = tasks.get_task_status("update-download").await.unwrap().unwrap();
    assert_eq!(status.current_message, "Downloading 1.2.0");
    assert_eq!(status.status, "running");

    // A second store sees the write (read-through from the store).
    let fresh = TaskStatusStore::new(ctx.store.clone(), Duration::from_secs(60));
    assert_eq!(
        fresh
            .get_task_status("update-download")
            .await
            .unwrap()
            .map(|s| s.status),
        Some("running".to_string())
    );

    tasks.clear_task_status("update-download").await.unwrap();
    assert!(tasks.get_task_status("update-download").await.unwrap().is_none());
}

#[tokio::test]
async fn test_clear_stale_task_statuses() {
    let ctx = TestContext::new().await;
    let tasks = TaskStatusStore::new(ctx.store.clone(), Duration::from_secs(60));

    tasks.set_task_status("fresh", "working", "running").await.unwrap();
    ctx.store
        .execute_one(
            Statement::new(
                "INSERT INTO api_task_status (id, updated_at, current_message, status) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind("stale")
            .bind(chrono::Utc::now().timestamp() - 7200)
            .bind("abandoned")
            .bind("failed"),
        )
        .await
        .unwrap();

    let removed = tasks
        .clear_stale_task_statuses(Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(tasks.get_task_status("stale").await.unwrap().is_none());
    assert!(tasks.get_task_status("fresh").await.unwrap().is_some());
}
