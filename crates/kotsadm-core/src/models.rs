// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Records of the release lifecycle.
//!
//! Timestamps are unix seconds in the store and `DateTime<Utc>` here.
//! Embedded specs (config, preflight) are stored as JSON text.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::DownstreamStatus;

/// Convert stored unix seconds to a timestamp.
pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Install progress of an app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallState {
    /// Nothing has been uploaded yet.
    NotInstalled,
    /// Waiting for an online license upload.
    OnlineUploadPending,
    /// Waiting for an airgap bundle.
    AirgapUploadPending,
    /// Airgap bundle is being processed.
    AirgapUploadInProgress,
    /// Airgap bundle processing failed.
    AirgapUploadError,
    /// App is installed.
    Installed,
}

impl InstallState {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "not_installed",
            Self::OnlineUploadPending => "online_upload_pending",
            Self::AirgapUploadPending => "airgap_upload_pending",
            Self::AirgapUploadInProgress => "airgap_upload_in_progress",
            Self::AirgapUploadError => "airgap_upload_error",
            Self::Installed => "installed",
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// `not_installed` leads to any upload state or straight to `installed`;
    /// upload states move freely among themselves or to `installed`;
    /// `installed` is final.
    pub fn can_transition_to(&self, next: InstallState) -> bool {
        if *self == next {
            return true;
        }
        match self {
            Self::NotInstalled => next != Self::NotInstalled,
            Self::Installed => false,
            _ => next != Self::NotInstalled,
        }
    }
}

impl fmt::Display for InstallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_installed" => Ok(Self::NotInstalled),
            "online_upload_pending" => Ok(Self::OnlineUploadPending),
            "airgap_upload_pending" => Ok(Self::AirgapUploadPending),
            "airgap_upload_in_progress" => Ok(Self::AirgapUploadInProgress),
            "airgap_upload_error" => Ok(Self::AirgapUploadError),
            "installed" => Ok(Self::Installed),
            other => Err(format!("unknown install state '{}'", other)),
        }
    }
}

/// A managed application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct App {
    /// Opaque immutable id.
    pub id: String,
    /// Unique human-facing slug.
    pub slug: String,
    /// Display name.
    pub name: String,
    /// Icon URI.
    pub icon_uri: Option<String>,
    /// Upstream release source.
    pub upstream_uri: String,
    /// License document.
    pub license: Option<String>,
    /// Channel the app follows.
    pub channel_id: Option<String>,
    /// Whether the channel orders releases by semantic version.
    pub is_semver_required: bool,
    /// Highest sequence ever assigned.
    pub current_sequence: Option<i64>,
    /// Install progress.
    pub install_state: InstallState,
    /// Installed from an airgap bundle.
    pub is_airgap: bool,
    /// Snapshot schedule (cron).
    pub snapshot_schedule: Option<String>,
    /// Snapshot retention.
    pub snapshot_ttl: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: Option<DateTime<Utc>>,
    /// Last upstream update check.
    pub last_update_check_at: Option<DateTime<Utc>>,
}

/// Input of `AppRepository::create_app`.
#[derive(Debug, Clone, Default)]
pub struct NewApp {
    /// Display name; the slug is derived from it.
    pub name: String,
    /// Upstream release source.
    pub upstream_uri: String,
    /// License document.
    pub license: Option<String>,
    /// Channel to follow.
    pub channel_id: Option<String>,
    /// Semver channel ordering.
    pub is_semver_required: bool,
    /// Airgap install.
    pub is_airgap: bool,
}

/// A deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// Opaque id.
    pub id: String,
    /// Unique slug.
    pub slug: String,
    /// Display title.
    pub title: String,
    /// Agent authentication token.
    pub token: Option<String>,
    /// Cluster type (e.g. "existing", "embedded").
    pub cluster_type: String,
    /// Snapshot schedule (cron).
    pub snapshot_schedule: Option<String>,
    /// Snapshot retention.
    pub snapshot_ttl: Option<String>,
    /// Registration time.
    pub created_at: DateTime<Utc>,
}

/// An app deployed to a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Downstream {
    /// App id.
    pub app_id: String,
    /// Cluster id.
    pub cluster_id: String,
    /// Display name of the downstream.
    pub downstream_name: String,
    /// Sequence deployed to the cluster.
    pub current_sequence: Option<i64>,
}

/// One item of a config screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigItem {
    /// Item name.
    pub name: String,
    /// Item type (text, bool, password, ...).
    #[serde(rename = "type", default)]
    pub item_type: String,
    /// A value must be provided.
    #[serde(default)]
    pub required: bool,
    /// Item is not shown.
    #[serde(default)]
    pub hidden: bool,
    /// Rendered `when` condition; "false" hides the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Current value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ConfigItem {
    fn is_shown(&self) -> bool {
        !self.hidden && self.when.as_deref() != Some("false")
    }

    fn has_value(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        set(&self.value) || set(&self.default)
    }
}

/// A group of config items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigGroup {
    /// Group name.
    pub name: String,
    /// Rendered `when` condition; "false" hides the group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    /// Items.
    #[serde(default)]
    pub items: Vec<ConfigItem>,
}

/// Configuration schema declared by a release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Groups.
    #[serde(default)]
    pub groups: Vec<ConfigGroup>,
}

impl ConfigSpec {
    /// Whether a shown, required item has neither a value nor a default.
    pub fn has_missing_required_values(&self) -> bool {
        self.groups
            .iter()
            .filter(|g| g.when.as_deref() != Some("false"))
            .flat_map(|g| g.items.iter())
            .any(|item| item.required && item.is_shown() && !item.has_value())
    }
}

/// One analyzer of a preflight spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    /// Analyzer name.
    pub name: String,
    /// A failure blocks deployment and cannot be skipped.
    #[serde(default)]
    pub strict: bool,
    /// Analyzer is excluded from the run.
    #[serde(default)]
    pub exclude: bool,
}

/// Preflight checks declared by a release.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightSpec {
    /// Analyzers.
    #[serde(default)]
    pub analyzers: Vec<Analyzer>,
}

impl PreflightSpec {
    /// Whether any non-excluded analyzer is strict.
    pub fn has_strict_analyzers(&self) -> bool {
        self.analyzers.iter().any(|a| a.strict && !a.exclude)
    }
}

/// Outcome of one analyzer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerOutcome {
    /// Analyzer name.
    pub name: String,
    /// Analyzer was strict.
    #[serde(default)]
    pub strict: bool,
    /// Passed.
    #[serde(default)]
    pub is_pass: bool,
    /// Warned.
    #[serde(default)]
    pub is_warn: bool,
    /// Failed.
    #[serde(default)]
    pub is_fail: bool,
    /// Message shown to the user.
    #[serde(default)]
    pub message: String,
}

/// Result of a preflight run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreflightResult {
    /// Per-analyzer outcomes.
    #[serde(default)]
    pub results: Vec<AnalyzerOutcome>,
    /// Errors that prevented analyzers from running.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl PreflightResult {
    /// Whether a strict analyzer failed.
    pub fn has_strict_failures(&self) -> bool {
        self.results.iter().any(|r| r.strict && r.is_fail)
    }
}

/// Release content handed to the version manager.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleaseMaterial {
    /// Version label shown to users.
    pub version_label: String,
    /// Upstream ordering cursor.
    pub update_cursor: Option<String>,
    /// Channel id.
    pub channel_id: Option<String>,
    /// Channel name.
    pub channel_name: Option<String>,
    /// Release must not be skipped.
    pub is_required: bool,
    /// Release notes.
    pub release_notes: Option<String>,
    /// Upstream release time.
    pub released_at: Option<DateTime<Utc>>,
    /// Config schema.
    pub config_spec: Option<ConfigSpec>,
    /// Preflight checks.
    pub preflight_spec: Option<PreflightSpec>,
    /// License document.
    pub license: Option<String>,
    /// Backup spec.
    pub backup_spec: Option<String>,
    /// Identity spec.
    pub identity_spec: Option<String>,
    /// Branding archive bytes.
    pub branding_archive: Option<Vec<u8>>,
    /// Embedded cluster config.
    pub embedded_cluster_config: Option<String>,
    /// Diff against the base version.
    pub diff_summary: Option<String>,
    /// Why the diff could not be computed.
    pub diff_summary_error: Option<String>,
}

impl ReleaseMaterial {
    /// Material with only a version label.
    pub fn new(version_label: impl Into<String>) -> Self {
        Self {
            version_label: version_label.into(),
            ..Default::default()
        }
    }
}

/// An update reported upstream but not downloaded yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateInfo {
    /// Version label.
    pub version_label: String,
    /// Upstream ordering cursor.
    pub update_cursor: Option<String>,
    /// Channel id.
    pub channel_id: Option<String>,
    /// Channel name.
    pub channel_name: Option<String>,
    /// Release must not be skipped.
    pub is_required: bool,
    /// Release notes.
    pub release_notes: Option<String>,
    /// Upstream release time.
    pub released_at: Option<DateTime<Utc>>,
}

impl From<&UpdateInfo> for ReleaseMaterial {
    fn from(update: &UpdateInfo) -> Self {
        Self {
            version_label: update.version_label.clone(),
            update_cursor: update.update_cursor.clone(),
            channel_id: update.channel_id.clone(),
            channel_name: update.channel_name.clone(),
            is_required: update.is_required,
            release_notes: update.release_notes.clone(),
            released_at: update.released_at,
            ..Default::default()
        }
    }
}

/// Immutable release record.
#[derive(Debug, Clone, PartialEq)]
pub struct AppVersion {
    /// App id.
    pub app_id: String,
    /// Per-app sequence.
    pub sequence: i64,
    /// Version label.
    pub version_label: String,
    /// Upstream ordering cursor.
    pub update_cursor: Option<String>,
    /// Channel id.
    pub channel_id: Option<String>,
    /// Channel name.
    pub channel_name: Option<String>,
    /// Release must not be skipped.
    pub is_required: bool,
    /// Release notes.
    pub release_notes: Option<String>,
    /// Upstream release time.
    pub released_at: Option<DateTime<Utc>>,
    /// Archive has been downloaded.
    pub is_downloaded: bool,
    /// Config schema.
    pub config_spec: Option<ConfigSpec>,
    /// Preflight checks.
    pub preflight_spec: Option<PreflightSpec>,
    /// License document.
    pub license: Option<String>,
    /// Backup spec.
    pub backup_spec: Option<String>,
    /// Identity spec.
    pub identity_spec: Option<String>,
    /// Branding archive bytes.
    pub branding_archive: Option<Vec<u8>>,
    /// Embedded cluster config.
    pub embedded_cluster_config: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Deploy output of one attempt (plain text; base64 in the store).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownstreamOutput {
    /// Dry-run stdout.
    pub dryrun_stdout: String,
    /// Dry-run stderr.
    pub dryrun_stderr: String,
    /// Apply stdout.
    pub apply_stdout: String,
    /// Apply stderr.
    pub apply_stderr: String,
    /// Helm stdout.
    pub helm_stdout: String,
    /// Helm stderr.
    pub helm_stderr: String,
    /// The attempt failed.
    pub is_error: bool,
}

/// Per-cluster deployment record of a release.
#[derive(Debug, Clone, PartialEq)]
pub struct DownstreamVersion {
    /// App id.
    pub app_id: String,
    /// Cluster id.
    pub cluster_id: String,
    /// Downstream sequence.
    pub sequence: i64,
    /// Sequence of the originating app version.
    pub parent_sequence: i64,
    /// Version label.
    pub version_label: String,
    /// Stored status.
    pub status: DownstreamStatus,
    /// Status detail.
    pub status_info: Option<String>,
    /// What created the version ("Upstream Update", "License Change", ...).
    pub source: String,
    /// Diff summary.
    pub diff_summary: Option<String>,
    /// Diff error.
    pub diff_summary_error: Option<String>,
    /// Preflight progress document.
    pub preflight_progress: Option<String>,
    /// Preflight result.
    pub preflight_result: Option<PreflightResult>,
    /// Preflight result time.
    pub preflight_result_created_at: Option<DateTime<Utc>>,
    /// Preflights were skipped.
    pub preflight_skipped: bool,
    /// Git commit of a gitops push.
    pub git_commit_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Deployment time.
    pub applied_at: Option<DateTime<Utc>>,
}

/// Cached progress message of a long running task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    /// Task id.
    pub id: String,
    /// Last message.
    pub current_message: String,
    /// Status ("running", "failed", ...).
    pub status: String,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}
