// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for release history, preflights and deployments.

mod common;

use common::TestContext;
use kotsadm_core::CoreError;
use kotsadm_core::deployability::{Blocker, STRICT_PREFLIGHT_CAUSE};
use kotsadm_core::models::{
    Analyzer, AnalyzerOutcome, DownstreamOutput, PreflightResult, PreflightSpec, ReleaseMaterial,
};
use kotsadm_core::status::DownstreamStatus;
use kotsadm_core::versions::CreateVersionOptions;

fn preflight_material(label: &str, strict: bool) -> ReleaseMaterial {
    ReleaseMaterial {
        update_cursor: Some("1".to_string()),
        channel_id: Some("stable".to_string()),
        preflight_spec: Some(PreflightSpec {
            analyzers: vec![Analyzer {
                name: "kubernetes-version".to_string(),
                strict,
                exclude: false,
            }],
        }),
        ..ReleaseMaterial::new(label)
    }
}

fn outcome(is_pass: bool) -> PreflightResult {
    PreflightResult {
        results: vec![AnalyzerOutcome {
            name: "kubernetes-version".to_string(),
            strict: true,
            is_pass,
            is_fail: !is_pass,
            message: "Kubernetes 1.29".to_string(),
            ..Default::default()
        }],
        errors: vec![],
    }
}

#[tokio::test]
async fn test_history_is_newest_first_and_deployable_when_nothing_deployed() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("History").await;
    ctx.release(&app.id, "1.0.0", "1", false).await;
    ctx.release(&app.id, "1.1.0", "2", true).await;
    ctx.release(&app.id, "1.2.0", "3", false).await;

    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();

    assert!(history.current.is_none());
    let sequences: Vec<i64> = history.versions.iter().map(|v| v.sequence).collect();
    assert_eq!(sequences, vec![2, 1, 0]);
    assert!(history.versions.iter().all(|v| v.deployability.is_deployable()));
    assert!(history.versions[1].is_required);
}

#[tokio::test]
async fn test_history_of_unknown_downstream() {
    let ctx = TestContext::new().await;
    let (app, _) = ctx.app_with_downstream("Nowhere").await;

    let err = ctx
        .versions
        .list_downstream_versions(&app.id, "other-cluster")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DownstreamNotFound { .. }));
}

#[tokio::test]
async fn test_deployed_version_reports_deploying_until_output_arrives() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Deploy").await;
    let seq = ctx.release(&app.id, "1.0.0", "1", false).await;

    ctx.versions.mark_deployed(&app.id, &cluster.id, seq).await.unwrap();

    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    let current = history.current.expect("current version");
    assert_eq!(current.sequence, seq);
    assert_eq!(current.status, DownstreamStatus::Deploying);
    assert_eq!(current.version.status, DownstreamStatus::Deployed);
    assert!(current.version.applied_at.is_some());

    ctx.versions
        .record_downstream_output(&app.id, &cluster.id, seq, &DownstreamOutput::default())
        .await
        .unwrap();
    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    assert_eq!(history.versions[0].status, DownstreamStatus::Deployed);

    ctx.versions
        .record_downstream_output(
            &app.id,
            &cluster.id,
            seq,
            &DownstreamOutput {
                apply_stderr: "error: timed out".to_string(),
                is_error: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    assert_eq!(history.versions[0].status, DownstreamStatus::Failed);

    let downstream = ctx.clusters.get_downstream(&app.id, &cluster.id).await.unwrap();
    assert_eq!(downstream.current_sequence, Some(seq));
}

#[tokio::test]
async fn test_required_version_cannot_be_skipped() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Required").await;
    let first = ctx.release(&app.id, "1.0.0", "1", false).await;
    let required = ctx.release(&app.id, "1.1.0", "2", true).await;
    let latest = ctx.release(&app.id, "1.2.0", "3", false).await;

    ctx.versions.mark_deployed(&app.id, &cluster.id, first).await.unwrap();

    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    let latest_view = history
        .versions
        .iter()
        .find(|v| v.sequence == latest)
        .unwrap();
    assert_eq!(
        latest_view.deployability.blocker,
        Some(Blocker::RequiredVersions(vec!["1.1.0".to_string()]))
    );
    let required_view = history
        .versions
        .iter()
        .find(|v| v.sequence == required)
        .unwrap();
    assert!(required_view.deployability.is_deployable());

    let err = ctx
        .versions
        .mark_deployed(&app.id, &cluster.id, latest)
        .await
        .unwrap_err();
    match err {
        CoreError::NotDeployable { cause } => {
            assert_eq!(
                cause,
                "This version cannot be deployed because version 1.1.0 is required and must be deployed first."
            );
        }
        other => panic!("unexpected error: {:?}", other),
    }

    ctx.versions.mark_deployed(&app.id, &cluster.id, required).await.unwrap();
    ctx.versions.mark_deployed(&app.id, &cluster.id, latest).await.unwrap();
}

#[tokio::test]
async fn test_rollback_is_rejected() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Rollback").await;
    let first = ctx.release(&app.id, "1.0.0", "1", false).await;
    let second = ctx.release(&app.id, "1.1.0", "2", false).await;

    ctx.versions.mark_deployed(&app.id, &cluster.id, second).await.unwrap();

    let err = ctx
        .versions
        .mark_deployed(&app.id, &cluster.id, first)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::RollbackUnsupported {
            sequence: 0,
            current: 1
        }
    ));

    // Re-applying the deployed version is allowed.
    ctx.versions.mark_deployed(&app.id, &cluster.id, second).await.unwrap();
}

#[tokio::test]
async fn test_other_channel_is_always_deployable() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Channels").await;
    ctx.release(&app.id, "1.0.0", "1", false).await;
    let stable = ctx.release(&app.id, "1.1.0", "5", false).await;
    ctx.versions.mark_deployed(&app.id, &cluster.id, stable).await.unwrap();

    let beta = ReleaseMaterial {
        update_cursor: Some("2".to_string()),
        channel_id: Some("beta".to_string()),
        ..ReleaseMaterial::new("1.0.1-beta")
    };
    let beta_seq = ctx
        .versions
        .create_version(&app.id, &beta, None, &CreateVersionOptions::default())
        .await
        .unwrap();

    ctx.versions.mark_deployed(&app.id, &cluster.id, beta_seq).await.unwrap();
}

#[tokio::test]
async fn test_required_release_of_another_channel_does_not_block() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Beta Track").await;
    ctx.release(&app.id, "stable-4", "4", true).await;

    let beta = |label: &str, cursor: &str, required: bool| ReleaseMaterial {
        update_cursor: Some(cursor.to_string()),
        channel_id: Some("beta".to_string()),
        is_required: required,
        ..ReleaseMaterial::new(label)
    };
    let options = CreateVersionOptions::default();
    let beta_3 = ctx
        .versions
        .create_version(&app.id, &beta("beta-3", "3", false), None, &options)
        .await
        .unwrap();
    let beta_5 = ctx
        .versions
        .create_version(&app.id, &beta("beta-5", "5", false), None, &options)
        .await
        .unwrap();

    ctx.versions.mark_deployed(&app.id, &cluster.id, beta_3).await.unwrap();

    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    let sequences: Vec<i64> = history.versions.iter().map(|v| v.sequence).collect();
    assert_eq!(sequences, vec![beta_5, beta_3, 0]);
    assert!(history.versions[0].deployability.is_deployable());

    ctx.versions.mark_deployed(&app.id, &cluster.id, beta_5).await.unwrap();

    // A required release on the same channel still blocks.
    let beta_6 = ctx
        .versions
        .create_version(&app.id, &beta("beta-6", "6", true), None, &options)
        .await
        .unwrap();
    let beta_7 = ctx
        .versions
        .create_version(&app.id, &beta("beta-7", "7", false), None, &options)
        .await
        .unwrap();
    let err = ctx
        .versions
        .mark_deployed(&app.id, &cluster.id, beta_7)
        .await
        .unwrap_err();
    match err {
        CoreError::NotDeployable { cause } => assert_eq!(
            cause,
            "This version cannot be deployed because version beta-6 is required and must be deployed first."
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    ctx.versions.mark_deployed(&app.id, &cluster.id, beta_6).await.unwrap();
    ctx.versions.mark_deployed(&app.id, &cluster.id, beta_7).await.unwrap();
}

#[tokio::test]
async fn test_mark_deployed_unknown_sequence() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Missing").await;
    ctx.release(&app.id, "1.0.0", "1", false).await;

    let err = ctx
        .versions
        .mark_deployed(&app.id, &cluster.id, 4)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::VersionNotFound { sequence: 4, .. }));
}

#[tokio::test]
async fn test_strict_preflights_gate_deployment() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Strict").await;
    let seq = ctx
        .versions
        .create_version(
            &app.id,
            &preflight_material("1.0.0", true),
            None,
            &CreateVersionOptions::default(),
        )
        .await
        .unwrap();

    let version = ctx
        .versions
        .get_downstream_version(&app.id, &cluster.id, seq)
        .await
        .unwrap();
    assert_eq!(version.status, DownstreamStatus::PendingPreflight);

    let err = ctx
        .versions
        .mark_deployed(&app.id, &cluster.id, seq)
        .await
        .unwrap_err();
    match err {
        CoreError::NotDeployable { cause } => assert_eq!(cause, STRICT_PREFLIGHT_CAUSE),
        other => panic!("unexpected error: {:?}", other),
    }

    let err = ctx
        .versions
        .set_preflights_skipped(&app.id, &cluster.id, seq)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Preflight(_)));

    ctx.versions
        .set_preflight_result(&app.id, &cluster.id, seq, &outcome(false))
        .await
        .unwrap();
    let history = ctx
        .versions
        .list_downstream_versions(&app.id, &cluster.id)
        .await
        .unwrap();
    assert_eq!(history.versions[0].status, DownstreamStatus::Pending);
    assert_eq!(
        history.versions[0].deployability.blocker,
        Some(Blocker::StrictPreflights)
    );

    ctx.versions
        .set_preflight_result(&app.id, &cluster.id, seq, &outcome(true))
        .await
        .unwrap();
    let version = ctx
        .versions
        .get_downstream_version(&app.id, &cluster.id, seq)
        .await
        .unwrap();
    assert_eq!(version.preflight_result, Some(outcome(true)));
    assert!(version.preflight_result_created_at.is_some());

    ctx.versions.mark_deployed(&app.id, &cluster.id, seq).await.unwrap();
}

#[tokio::test]
async fn test_non_strict_preflights_can_be_skipped() {
    let ctx = TestContext::new().await;
    let (app, cluster) = ctx.app_with_downstream("Lenient").await;
    let seq = ctx
        .versions
        .create_version(
            &app.id,
            &preflight_material("1.0.0", false),
            None,
            &CreateVersionOptions::default(),
        )
        .await
        .unwrap();

    ctx.versions
        .set_preflight_progress(&app.id, &cluster.id, seq, r#"{"completed":1,"total":3}"#)
        .await
        .unwrap();
    ctx.versions
        .set_preflights_skipped(&app.id, &cluster.id, seq)
        .await
        .unwrap();

    let version = ctx
        .versions
        .get_downstream_version(&app.id, &cluster.id, seq)
        .await
        .unwrap();
    assert!(version.preflight_skipped);
    assert_eq!(version.status, DownstreamStatus::Pending);
    assert_eq!(
        version.preflight_progress.as_deref(),
        Some(r#"{"completed":1,"total":3}"#)
    );

    let err = ctx
        .versions
        .set_preflight_progress(&app.id, &cluster.id, seq + 1, "{}")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::VersionNotFound { .. }));
}
