// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Version & sequence manager.
//!
//! Every release of an app gets the next per-app sequence, starting at 0.
//! Creating a version writes, in one batch:
//!
//! 1. the `app_version` row (plain insert, so a concurrent writer that took
//!    the same sequence makes the batch fail with a conflict and we retry),
//! 2. one `app_downstream_version` row per downstream, with its initial status,
//! 3. the app's `current_sequence`, advanced to the max of old and new.
//!
//! Reads that feed deployment decisions never use the app cache.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use kotsadm_store::{Row, Statement, Store, StoreError, Value};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::apps::AppRepository;
use crate::clusters::list_downstreams;
use crate::collaborators::{ArchiveStore, archive_path};
use crate::deployability::{Blocker, Deployability, is_deployable};
use crate::error::{CoreError, Result};
use crate::models::{
    AppVersion, DownstreamOutput, DownstreamVersion, PreflightResult, PreflightSpec,
    ReleaseMaterial, UpdateInfo, from_unix,
};
use crate::ordering::{VersionRef, ordering_for, sort_versions};
use crate::status::{
    DownstreamStatus, InitialStatusInput, compute_initial_status, effective_status,
    has_failing_strict_preflights,
};

/// Attempts at allocating a sequence before giving up.
pub const MAX_SEQUENCE_ATTEMPTS: u32 = 3;

/// Source recorded for versions discovered upstream.
pub const SOURCE_UPSTREAM_UPDATE: &str = "Upstream Update";

const VERSION_PENDING_DOWNLOAD: &str = "pending_download";
const VERSION_DOWNLOADED: &str = "downloaded";

/// How a version comes into being.
#[derive(Debug, Clone)]
pub struct CreateVersionOptions {
    /// What created the version ("Upstream Update", "License Change", ...).
    pub source: String,
    /// Circumstances fed to the initial status computation.
    pub status_input: InitialStatusInput,
}

impl Default for CreateVersionOptions {
    fn default() -> Self {
        Self {
            source: SOURCE_UPSTREAM_UPDATE.to_string(),
            status_input: InitialStatusInput::default(),
        }
    }
}

/// One entry of a downstream's release history.
#[derive(Debug, Clone, Serialize)]
pub struct DownstreamVersionView {
    /// Stored record.
    #[serde(skip)]
    pub version: DownstreamVersion,
    /// Sequence.
    pub sequence: i64,
    /// Version label.
    pub version_label: String,
    /// Status reconciled with deploy output.
    pub status: DownstreamStatus,
    /// Upstream cursor.
    pub update_cursor: Option<String>,
    /// Channel id.
    pub channel_id: Option<String>,
    /// Release must not be skipped.
    pub is_required: bool,
    /// Whether the version may be deployed next.
    pub deployability: Deployability,
}

/// Release history of one downstream, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct DownstreamHistory {
    /// Deployed version, if any.
    pub current: Option<DownstreamVersionView>,
    /// Every version, newest first.
    pub versions: Vec<DownstreamVersionView>,
}

struct HistoryEntry {
    version: DownstreamVersion,
    reference: VersionRef,
    output: Option<DownstreamOutput>,
}

fn to_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value.map(serde_json::to_string).transpose().map_err(Into::into)
}

fn from_json<T: serde::de::DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
    match raw {
        Some(s) if !s.trim().is_empty() => Ok(Some(serde_json::from_str(&s)?)),
        _ => Ok(None),
    }
}

/// `INSERT` of the given columns, optionally upserting on `conflict_key`.
fn insert_statement(
    table: &str,
    columns: Vec<(&'static str, Value)>,
    conflict_key: Option<&[&str]>,
) -> Statement {
    let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
    let placeholders = vec!["?"; names.len()].join(", ");
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        names.join(", "),
        placeholders
    );

    if let Some(key) = conflict_key {
        let updates: Vec<String> = names
            .iter()
            .copied()
            .filter(|name| !key.contains(name) && *name != "created_at")
            .map(|name| format!("{name} = excluded.{name}"))
            .collect();
        sql.push_str(&format!(
            " ON CONFLICT ({}) DO UPDATE SET {}",
            key.join(", "),
            updates.join(", ")
        ));
    }

    Statement::with_args(sql, columns.into_iter().map(|(_, v)| v).collect())
}

/// Upsert of a downstream version after its download completed. Only a
/// `pending_download` row takes the new status.
fn downloaded_version_upsert(columns: Vec<(&'static str, Value)>) -> Statement {
    let mut statement = insert_statement("app_downstream_version", columns, None);
    statement.sql.push_str(&format!(
        " ON CONFLICT (app_id, cluster_id, sequence) DO UPDATE SET \
         version_label = excluded.version_label, \
         source = excluded.source, \
         diff_summary = excluded.diff_summary, \
         diff_summary_error = excluded.diff_summary_error, \
         status = CASE WHEN app_downstream_version.status = '{pending}' \
         THEN excluded.status ELSE app_downstream_version.status END",
        pending = DownstreamStatus::PendingDownload.as_str()
    ));
    statement
}

fn app_version_columns(
    app_id: &str,
    sequence: i64,
    material: &ReleaseMaterial,
    status: &str,
    now: i64,
) -> Result<Vec<(&'static str, Value)>> {
    Ok(vec![
        ("app_id", app_id.into()),
        ("sequence", sequence.into()),
        ("update_cursor", material.update_cursor.clone().into()),
        ("channel_id", material.channel_id.clone().into()),
        ("channel_name", material.channel_name.clone().into()),
        (
            "upstream_released_at",
            material.released_at.map(|t| t.timestamp()).into(),
        ),
        ("created_at", now.into()),
        ("version_label", material.version_label.clone().into()),
        ("is_required", material.is_required.into()),
        ("release_notes", material.release_notes.clone().into()),
        ("config_spec", to_json(material.config_spec.as_ref())?.into()),
        (
            "preflight_spec",
            to_json(material.preflight_spec.as_ref())?.into(),
        ),
        ("kots_license", material.license.clone().into()),
        ("backup_spec", material.backup_spec.clone().into()),
        ("identity_spec", material.identity_spec.clone().into()),
        (
            "branding_archive",
            material
                .branding_archive
                .as_ref()
                .map(|bytes| BASE64.encode(bytes))
                .into(),
        ),
        (
            "embeddedcluster_config",
            material.embedded_cluster_config.clone().into(),
        ),
        ("status", status.into()),
    ])
}

fn app_version_from_row(row: &Row) -> Result<AppVersion> {
    let branding_archive = row
        .get_opt_string("branding_archive")?
        .map(|encoded| {
            BASE64
                .decode(encoded.as_bytes())
                .map_err(|e| StoreError::validation("app_version.branding_archive", e.to_string()))
        })
        .transpose()?;

    Ok(AppVersion {
        app_id: row.get_string("app_id")?,
        sequence: row.get_i64("sequence")?,
        version_label: row.get_string("version_label")?,
        update_cursor: row.get_opt_string("update_cursor")?,
        channel_id: row.get_opt_string("channel_id")?,
        channel_name: row.get_opt_string("channel_name")?,
        is_required: row.get_bool("is_required")?,
        release_notes: row.get_opt_string("release_notes")?,
        released_at: row.get_opt_i64("upstream_released_at")?.map(from_unix),
        is_downloaded: row.get_opt_string("status")?.as_deref() != Some(VERSION_PENDING_DOWNLOAD),
        config_spec: from_json(row.get_opt_string("config_spec")?)?,
        preflight_spec: from_json(row.get_opt_string("preflight_spec")?)?,
        license: row.get_opt_string("kots_license")?,
        backup_spec: row.get_opt_string("backup_spec")?,
        identity_spec: row.get_opt_string("identity_spec")?,
        branding_archive,
        embedded_cluster_config: row.get_opt_string("embeddedcluster_config")?,
        created_at: from_unix(row.get_i64("created_at")?),
    })
}

const DOWNSTREAM_VERSION_COLUMNS: &str = "adv.app_id, adv.cluster_id, adv.sequence, \
    adv.parent_sequence, adv.version_label, adv.status, adv.status_info, adv.source, \
    adv.diff_summary, adv.diff_summary_error, adv.preflight_progress, adv.preflight_result, \
    adv.preflight_result_created_at, adv.preflight_skipped, adv.git_commit_url, \
    adv.created_at, adv.applied_at";

fn downstream_version_from_row(row: &Row) -> Result<DownstreamVersion> {
    Ok(DownstreamVersion {
        app_id: row.get_string("app_id")?,
        cluster_id: row.get_string("cluster_id")?,
        sequence: row.get_i64("sequence")?,
        parent_sequence: row.get_i64("parent_sequence")?,
        version_label: row.get_string("version_label")?,
        status: DownstreamStatus::from(row.get_string("status")?),
        status_info: row.get_opt_string("status_info")?,
        source: row.get_string("source")?,
        diff_summary: row.get_opt_string("diff_summary")?,
        diff_summary_error: row.get_opt_string("diff_summary_error")?,
        preflight_progress: row.get_opt_string("preflight_progress")?,
        preflight_result: from_json(row.get_opt_string("preflight_result")?)?,
        preflight_result_created_at: row
            .get_opt_i64("preflight_result_created_at")?
            .map(from_unix),
        preflight_skipped: row.get_bool("preflight_skipped")?,
        git_commit_url: row.get_opt_string("git_commit_url")?,
        created_at: from_unix(row.get_i64("created_at")?),
        applied_at: row.get_opt_i64("applied_at")?.map(from_unix),
    })
}

fn decode_output(row: &Row, column: &str) -> Result<String> {
    let Some(encoded) = row.get_opt_string(column)? else {
        return Ok(String::new());
    };
    let bytes = BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| StoreError::validation(format!("app_downstream_output.{}", column), e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Allocates sequences and owns the version and downstream version records.
#[derive(Clone)]
pub struct VersionManager {
    store: Arc<dyn Store>,
    apps: AppRepository,
    archives: Arc<dyn ArchiveStore>,
}

impl VersionManager {
    /// Create a manager.
    pub fn new(store: Arc<dyn Store>, apps: AppRepository, archives: Arc<dyn ArchiveStore>) -> Self {
        Self {
            store,
            apps,
            archives,
        }
    }

    /// Next free sequence of an app: one past the highest, or 0.
    pub async fn next_sequence(&self, app_id: &str) -> Result<i64> {
        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT COALESCE(MAX(sequence), -1) + 1 AS next_sequence FROM app_version WHERE app_id = ?",
                )
                .bind(app_id),
            )
            .await?;
        match result.first() {
            Some(row) => Ok(row.get_i64("next_sequence")?),
            None => Ok(0),
        }
    }

    /// Create a downloaded version from release material and return its sequence.
    ///
    /// `base_sequence` names the version the release was rendered against; it
    /// must exist.
    pub async fn create_version(
        &self,
        app_id: &str,
        material: &ReleaseMaterial,
        base_sequence: Option<i64>,
        options: &CreateVersionOptions,
    ) -> Result<i64> {
        if let Some(base) = base_sequence {
            self.get_app_version(app_id, base).await?;
        }
        self.insert_version(app_id, material, VERSION_DOWNLOADED, None, options)
            .await
    }

    /// Record an update known upstream whose archive is not downloaded yet.
    pub async fn create_pending_download_version(
        &self,
        app_id: &str,
        update: &UpdateInfo,
    ) -> Result<i64> {
        let material = ReleaseMaterial::from(update);
        self.insert_version(
            app_id,
            &material,
            VERSION_PENDING_DOWNLOAD,
            Some(DownstreamStatus::PendingDownload),
            &CreateVersionOptions::default(),
        )
        .await
    }

    async fn insert_version(
        &self,
        app_id: &str,
        material: &ReleaseMaterial,
        version_status: &str,
        status_override: Option<DownstreamStatus>,
        options: &CreateVersionOptions,
    ) -> Result<i64> {
        if material.version_label.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "version label must not be empty".to_string(),
            ));
        }

        self.apps.get_app_uncached(app_id).await?;
        let downstreams = list_downstreams(self.store.as_ref(), app_id).await?;
        let status = status_override
            .unwrap_or_else(|| compute_initial_status(&options.status_input, material));

        for attempt in 1..=MAX_SEQUENCE_ATTEMPTS {
            let sequence = self.next_sequence(app_id).await?;
            let now = Utc::now().timestamp();

            let mut statements = vec![insert_statement(
                "app_version",
                app_version_columns(app_id, sequence, material, version_status, now)?,
                None,
            )];
            for downstream in &downstreams {
                statements.push(insert_statement(
                    "app_downstream_version",
                    vec![
                        ("app_id", app_id.into()),
                        ("cluster_id", downstream.cluster_id.clone().into()),
                        ("sequence", sequence.into()),
                        ("parent_sequence", sequence.into()),
                        ("created_at", now.into()),
                        ("version_label", material.version_label.clone().into()),
                        ("status", status.as_str().into()),
                        ("source", options.source.clone().into()),
                        ("diff_summary", material.diff_summary.clone().into()),
                        (
                            "diff_summary_error",
                            material.diff_summary_error.clone().into(),
                        ),
                    ],
                    None,
                ));
            }
            statements.push(
                Statement::new(
                    "UPDATE app SET current_sequence = MAX(COALESCE(current_sequence, -1), ?), \
                     updated_at = ? WHERE id = ?",
                )
                .bind(sequence)
                .bind(now)
                .bind(app_id),
            );

            match self.store.execute_batch(statements).await {
                Ok(_) => {
                    self.apps.cache().invalidate(&app_id.to_string());
                    info!(
                        app_id = %app_id,
                        sequence = sequence,
                        version_label = %material.version_label,
                        status = %status,
                        downstreams = downstreams.len(),
                        "Created version"
                    );
                    return Ok(sequence);
                }
                Err(StoreError::Conflict(message)) => {
                    warn!(
                        app_id = %app_id,
                        sequence = sequence,
                        attempt = attempt,
                        error = %message,
                        "Sequence taken by a concurrent writer, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(CoreError::SequenceAllocation {
            app_id: app_id.to_string(),
            attempts: MAX_SEQUENCE_ATTEMPTS,
        })
    }

    /// Store the downloaded archive of a version and fill in its release data.
    ///
    /// Safe to repeat: the version row is upserted. A downstream still in
    /// `pending_download` moves to the status computed from the new material;
    /// any other downstream status is kept.
    pub async fn complete_download(
        &self,
        app_id: &str,
        sequence: i64,
        material: &ReleaseMaterial,
        archive: &[u8],
        options: &CreateVersionOptions,
    ) -> Result<()> {
        let existing = self.get_app_version(app_id, sequence).await?;

        self.archives
            .write_archive(&archive_path(app_id, sequence), archive)
            .await?;

        let downstreams = list_downstreams(self.store.as_ref(), app_id).await?;
        let status = compute_initial_status(&options.status_input, material);
        let now = Utc::now().timestamp();

        let mut statements = vec![insert_statement(
            "app_version",
            app_version_columns(app_id, sequence, material, VERSION_DOWNLOADED, now)?,
            Some(&["app_id", "sequence"]),
        )];
        for downstream in &downstreams {
            statements.push(downloaded_version_upsert(
                vec![
                    ("app_id", app_id.into()),
                    ("cluster_id", downstream.cluster_id.clone().into()),
                    ("sequence", sequence.into()),
                    ("parent_sequence", sequence.into()),
                    ("created_at", now.into()),
                    ("version_label", material.version_label.clone().into()),
                    ("status", status.as_str().into()),
                    ("source", options.source.clone().into()),
                    ("diff_summary", material.diff_summary.clone().into()),
                    (
                        "diff_summary_error",
                        material.diff_summary_error.clone().into(),
                    ),
                ],
            ));
        }

        self.store.execute_batch(statements).await?;
        self.apps.cache().invalidate(&app_id.to_string());

        info!(
            app_id = %app_id,
            sequence = sequence,
            was_downloaded = existing.is_downloaded,
            archive_bytes = archive.len(),
            status = %status,
            "Version download completed"
        );
        Ok(())
    }

    /// Archive bytes of a version.
    pub async fn read_archive(&self, app_id: &str, sequence: i64) -> Result<Vec<u8>> {
        self.archives
            .read_archive(&archive_path(app_id, sequence))
            .await
    }

    async fn version_refs(&self, app_id: &str) -> Result<Vec<(VersionRef, bool)>> {
        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT sequence, channel_id, is_required, update_cursor, version_label, status \
                     FROM app_version WHERE app_id = ?",
                )
                .bind(app_id),
            )
            .await?;

        result
            .rows
            .iter()
            .map(|row| -> Result<(VersionRef, bool)> {
                let reference = VersionRef {
                    sequence: row.get_i64("sequence")?,
                    channel_id: row.get_opt_string("channel_id")?,
                    is_required: row.get_bool("is_required")?,
                    cursor: row.get_opt_string("update_cursor")?,
                    version_label: row.get_string("version_label")?,
                    has_failing_strict_preflights: false,
                };
                let downloaded =
                    row.get_opt_string("status")?.as_deref() != Some(VERSION_PENDING_DOWNLOAD);
                Ok((reference, downloaded))
            })
            .collect()
    }

    /// Sequence of the newest version in release order.
    pub async fn get_latest_sequence(
        &self,
        app_id: &str,
        downloaded_only: bool,
    ) -> Result<Option<i64>> {
        let app = self.apps.get_app_uncached(app_id).await?;
        let mut refs: Vec<VersionRef> = self
            .version_refs(app_id)
            .await?
            .into_iter()
            .filter(|(_, downloaded)| *downloaded || !downloaded_only)
            .map(|(reference, _)| reference)
            .collect();

        sort_versions(&mut refs, ordering_for(app.is_semver_required));
        Ok(refs.last().map(|r| r.sequence))
    }

    /// Cursor of the highest-sequence version on a channel.
    pub async fn get_current_update_cursor(
        &self,
        app_id: &str,
        channel_id: &str,
    ) -> Result<Option<String>> {
        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT update_cursor FROM app_version WHERE app_id = ? AND channel_id = ? \
                     ORDER BY sequence DESC LIMIT 1",
                )
                .bind(app_id)
                .bind(channel_id),
            )
            .await?;
        match result.first() {
            Some(row) => Ok(row.get_opt_string("update_cursor")?),
            None => Ok(None),
        }
    }

    /// Release record of a version.
    pub async fn get_app_version(&self, app_id: &str, sequence: i64) -> Result<AppVersion> {
        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT app_id, sequence, version_label, update_cursor, channel_id, \
                     channel_name, is_required, release_notes, upstream_released_at, status, \
                     config_spec, preflight_spec, kots_license, backup_spec, identity_spec, \
                     branding_archive, embeddedcluster_config, created_at \
                     FROM app_version WHERE app_id = ? AND sequence = ?",
                )
                .bind(app_id)
                .bind(sequence),
            )
            .await?;
        let row = result.first().ok_or_else(|| CoreError::VersionNotFound {
            app_id: app_id.to_string(),
            sequence,
        })?;
        app_version_from_row(row)
    }

    /// Deployment record of a version on one cluster.
    pub async fn get_downstream_version(
        &self,
        app_id: &str,
        cluster_id: &str,
        sequence: i64,
    ) -> Result<DownstreamVersion> {
        let result = self
            .store
            .query_one(
                Statement::new(format!(
                    "SELECT {} FROM app_downstream_version adv \
                     WHERE adv.app_id = ? AND adv.cluster_id = ? AND adv.sequence = ?",
                    DOWNSTREAM_VERSION_COLUMNS
                ))
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence),
            )
            .await?;
        let row = result.first().ok_or_else(|| CoreError::VersionNotFound {
            app_id: app_id.to_string(),
            sequence,
        })?;
        downstream_version_from_row(row)
    }

    /// Recorded deploy output of a version on one cluster.
    pub async fn get_downstream_output(
        &self,
        app_id: &str,
        cluster_id: &str,
        sequence: i64,
    ) -> Result<Option<DownstreamOutput>> {
        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT dryrun_stdout, dryrun_stderr, apply_stdout, apply_stderr, \
                     helm_stdout, helm_stderr, is_error FROM app_downstream_output \
                     WHERE app_id = ? AND cluster_id = ? AND downstream_sequence = ?",
                )
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence),
            )
            .await?;
        let Some(row) = result.first() else {
            return Ok(None);
        };
        Ok(Some(DownstreamOutput {
            dryrun_stdout: decode_output(row, "dryrun_stdout")?,
            dryrun_stderr: decode_output(row, "dryrun_stderr")?,
            apply_stdout: decode_output(row, "apply_stdout")?,
            apply_stderr: decode_output(row, "apply_stderr")?,
            helm_stdout: decode_output(row, "helm_stdout")?,
            helm_stderr: decode_output(row, "helm_stderr")?,
            is_error: row.get_bool("is_error")?,
        }))
    }

    async fn load_history(&self, app_id: &str, cluster_id: &str) -> Result<Vec<HistoryEntry>> {
        let result = self
            .store
            .query_one(
                Statement::new(format!(
                    "SELECT {}, av.update_cursor AS av_update_cursor, av.channel_id AS av_channel_id, \
                     av.is_required AS av_is_required, av.preflight_spec AS av_preflight_spec, \
                     ado.downstream_sequence AS output_sequence, ado.is_error AS output_is_error \
                     FROM app_downstream_version adv \
                     JOIN app_version av ON av.app_id = adv.app_id AND av.sequence = adv.parent_sequence \
                     LEFT JOIN app_downstream_output ado ON ado.app_id = adv.app_id \
                       AND ado.cluster_id = adv.cluster_id AND ado.downstream_sequence = adv.sequence \
                     WHERE adv.app_id = ? AND adv.cluster_id = ?",
                    DOWNSTREAM_VERSION_COLUMNS
                ))
                .bind(app_id)
                .bind(cluster_id),
            )
            .await?;

        let mut entries = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let version = downstream_version_from_row(row)?;
            let preflight_spec: Option<PreflightSpec> =
                from_json(row.get_opt_string("av_preflight_spec")?)?;
            let reference = VersionRef {
                sequence: version.sequence,
                channel_id: row.get_opt_string("av_channel_id")?,
                is_required: row.get_bool("av_is_required")?,
                cursor: row.get_opt_string("av_update_cursor")?,
                version_label: version.version_label.clone(),
                has_failing_strict_preflights: has_failing_strict_preflights(
                    preflight_spec.as_ref(),
                    version.preflight_result.as_ref(),
                    version.preflight_skipped,
                ),
            };
            let output = match row.get_opt_i64("output_sequence")? {
                Some(_) => Some(DownstreamOutput {
                    is_error: row.get_bool("output_is_error")?,
                    ..Default::default()
                }),
                None => None,
            };
            entries.push(HistoryEntry {
                version,
                reference,
                output,
            });
        }
        Ok(entries)
    }

    /// Release history of a downstream with effective status and deployability.
    ///
    /// Always read from the store.
    pub async fn list_downstream_versions(
        &self,
        app_id: &str,
        cluster_id: &str,
    ) -> Result<DownstreamHistory> {
        let app = self.apps.get_app_uncached(app_id).await?;
        let downstream = self.downstream(app_id, cluster_id).await?;
        let ordering = ordering_for(app.is_semver_required);

        let mut entries = self.load_history(app_id, cluster_id).await?;
        entries.sort_by(|a, b| ordering.compare(&b.reference, &a.reference));

        let refs: Vec<VersionRef> = entries.iter().rev().map(|e| e.reference.clone()).collect();
        let current_ref = downstream
            .and_then(|seq| refs.iter().find(|r| r.sequence == seq))
            .cloned();

        let versions: Vec<DownstreamVersionView> = entries
            .into_iter()
            .map(|entry| DownstreamVersionView {
                sequence: entry.version.sequence,
                version_label: entry.version.version_label.clone(),
                status: effective_status(entry.version.status, entry.output.as_ref()),
                update_cursor: entry.reference.cursor.clone(),
                channel_id: entry.reference.channel_id.clone(),
                is_required: entry.reference.is_required,
                deployability: is_deployable(
                    &entry.reference,
                    &refs,
                    current_ref.as_ref(),
                    ordering,
                ),
                version: entry.version,
            })
            .collect();

        let current = current_ref
            .and_then(|c| versions.iter().find(|v| v.sequence == c.sequence))
            .cloned();

        Ok(DownstreamHistory { current, versions })
    }

    async fn downstream(&self, app_id: &str, cluster_id: &str) -> Result<Option<i64>> {
        let result = self
            .store
            .query_one(
                Statement::new(
                    "SELECT current_sequence FROM app_downstream WHERE app_id = ? AND cluster_id = ?",
                )
                .bind(app_id)
                .bind(cluster_id),
            )
            .await?;
        let row = result.first().ok_or_else(|| CoreError::DownstreamNotFound {
            app_id: app_id.to_string(),
            cluster_id: cluster_id.to_string(),
        })?;
        Ok(row.get_opt_i64("current_sequence")?)
    }

    /// Set the stored status of a version on every downstream.
    pub async fn set_downstream_version_status(
        &self,
        app_id: &str,
        sequence: i64,
        status: DownstreamStatus,
        status_info: Option<&str>,
    ) -> Result<()> {
        let done = self
            .store
            .execute_one(
                Statement::new(
                    "UPDATE app_downstream_version SET status = ?, status_info = ? \
                     WHERE app_id = ? AND sequence = ?",
                )
                .bind(status.as_str())
                .bind(status_info)
                .bind(app_id)
                .bind(sequence),
            )
            .await?;

        if done.rows_affected == 0 {
            return Err(CoreError::VersionNotFound {
                app_id: app_id.to_string(),
                sequence,
            });
        }
        debug!(app_id = %app_id, sequence = sequence, status = %status, "Downstream version status set");
        Ok(())
    }

    /// Record the output of a deploy attempt. Output text is stored base64 encoded.
    pub async fn record_downstream_output(
        &self,
        app_id: &str,
        cluster_id: &str,
        sequence: i64,
        output: &DownstreamOutput,
    ) -> Result<()> {
        self.get_downstream_version(app_id, cluster_id, sequence)
            .await?;

        let encode = |s: &str| Value::from(BASE64.encode(s.as_bytes()));
        self.store
            .execute_one(insert_statement(
                "app_downstream_output",
                vec![
                    ("app_id", app_id.into()),
                    ("cluster_id", cluster_id.into()),
                    ("downstream_sequence", sequence.into()),
                    ("dryrun_stdout", encode(&output.dryrun_stdout)),
                    ("dryrun_stderr", encode(&output.dryrun_stderr)),
                    ("apply_stdout", encode(&output.apply_stdout)),
                    ("apply_stderr", encode(&output.apply_stderr)),
                    ("helm_stdout", encode(&output.helm_stdout)),
                    ("helm_stderr", encode(&output.helm_stderr)),
                    ("is_error", output.is_error.into()),
                ],
                Some(&["app_id", "cluster_id", "downstream_sequence"]),
            ))
            .await?;

        info!(
            app_id = %app_id,
            cluster_id = %cluster_id,
            sequence = sequence,
            is_error = output.is_error,
            "Recorded deploy output"
        );
        Ok(())
    }

    /// Store a preflight result; a version waiting on preflights becomes pending.
    pub async fn set_preflight_result(
        &self,
        app_id: &str,
        cluster_id: &str,
        sequence: i64,
        result: &PreflightResult,
    ) -> Result<()> {
        self.get_downstream_version(app_id, cluster_id, sequence)
            .await?;

        let json = serde_json::to_string(result)?;
        let now = Utc::now().timestamp();
        self.store
            .execute_batch(vec![
                Statement::new(
                    "UPDATE app_downstream_version SET preflight_result = ?, \
                     preflight_result_created_at = ?, preflight_skipped = 0, \
                     status = CASE WHEN status = 'pending_preflight' THEN 'pending' ELSE status END \
                     WHERE app_id = ? AND cluster_id = ? AND sequence = ?",
                )
                .bind(&json)
                .bind(now)
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence),
                Statement::new(
                    "INSERT INTO preflight_result (id, app_id, cluster_id, sequence, result, created_at) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(Uuid::new_v4().to_string())
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence)
                .bind(&json)
                .bind(now),
            ])
            .await?;

        info!(
            app_id = %app_id,
            cluster_id = %cluster_id,
            sequence = sequence,
            strict_failures = result.has_strict_failures(),
            "Preflight result stored"
        );
        Ok(())
    }

    /// Store the progress document of a running preflight.
    pub async fn set_preflight_progress(
        &self,
        app_id: &str,
        cluster_id: &str,
        sequence: i64,
        progress: &str,
    ) -> Result<()> {
        let done = self
            .store
            .execute_one(
                Statement::new(
                    "UPDATE app_downstream_version SET preflight_progress = ? \
                     WHERE app_id = ? AND cluster_id = ? AND sequence = ?",
                )
                .bind(progress)
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence),
            )
            .await?;
        if done.rows_affected == 0 {
            return Err(CoreError::VersionNotFound {
                app_id: app_id.to_string(),
                sequence,
            });
        }
        Ok(())
    }

    /// Skip preflights of a version. Refused when a strict analyzer exists.
    pub async fn set_preflights_skipped(
        &self,
        app_id: &str,
        cluster_id: &str,
        sequence: i64,
    ) -> Result<()> {
        let version = self.get_downstream_version(app_id, cluster_id, sequence).await?;
        let release = self.get_app_version(app_id, version.parent_sequence).await?;

        if release
            .preflight_spec
            .as_ref()
            .is_some_and(PreflightSpec::has_strict_analyzers)
        {
            return Err(CoreError::Preflight(
                "strict preflight checks cannot be skipped".to_string(),
            ));
        }

        self.store
            .execute_one(
                Statement::new(
                    "UPDATE app_downstream_version SET preflight_skipped = 1, \
                     status = CASE WHEN status = 'pending_preflight' THEN 'pending' ELSE status END \
                     WHERE app_id = ? AND cluster_id = ? AND sequence = ?",
                )
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence),
            )
            .await?;

        info!(app_id = %app_id, cluster_id = %cluster_id, sequence = sequence, "Preflights skipped");
        Ok(())
    }

    /// Make `sequence` the deployed version of a downstream.
    ///
    /// Deployability is re-evaluated on fresh data first. A new attempt
    /// clears any earlier output, so the version reports `deploying` until
    /// the agent reports back.
    pub async fn mark_deployed(&self, app_id: &str, cluster_id: &str, sequence: i64) -> Result<()> {
        let app = self.apps.get_app_uncached(app_id).await?;
        let current_sequence = self.downstream(app_id, cluster_id).await?;
        let ordering = ordering_for(app.is_semver_required);

        let mut refs: Vec<VersionRef> = self
            .load_history(app_id, cluster_id)
            .await?
            .into_iter()
            .map(|e| e.reference)
            .collect();
        sort_versions(&mut refs, ordering);

        let candidate = refs
            .iter()
            .find(|r| r.sequence == sequence)
            .ok_or_else(|| CoreError::VersionNotFound {
                app_id: app_id.to_string(),
                sequence,
            })?;
        let current = current_sequence.and_then(|seq| refs.iter().find(|r| r.sequence == seq));

        let verdict = is_deployable(candidate, &refs, current, ordering);
        match (&verdict.blocker, current) {
            (None, _) => {}
            (Some(Blocker::Rollback), Some(current)) => {
                return Err(CoreError::RollbackUnsupported {
                    sequence,
                    current: current.sequence,
                });
            }
            (Some(blocker), _) => {
                return Err(CoreError::NotDeployable {
                    cause: blocker.cause(),
                });
            }
        }

        let now = Utc::now().timestamp();
        self.store
            .execute_batch(vec![
                Statement::new(
                    "UPDATE app_downstream SET current_sequence = ? WHERE app_id = ? AND cluster_id = ?",
                )
                .bind(sequence)
                .bind(app_id)
                .bind(cluster_id),
                Statement::new(
                    "UPDATE app_downstream_version SET status = ?, status_info = NULL, applied_at = ? \
                     WHERE app_id = ? AND cluster_id = ? AND sequence = ?",
                )
                .bind(DownstreamStatus::Deployed.as_str())
                .bind(now)
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence),
                Statement::new(
                    "DELETE FROM app_downstream_output \
                     WHERE app_id = ? AND cluster_id = ? AND downstream_sequence = ?",
                )
                .bind(app_id)
                .bind(cluster_id)
                .bind(sequence),
            ])
            .await?;

        info!(
            app_id = %app_id,
            cluster_id = %cluster_id,
            sequence = sequence,
            previous = ?current_sequence,
            "Version marked deployed"
        );
        Ok(())
    }
}
