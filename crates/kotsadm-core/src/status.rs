// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Downstream version status state machine.
//!
//! ```text
//!  pending_download ──► pending_cluster_management ──► pending_config
//!                                                           │
//!                       pending ◄── pending_preflight ◄─────┘
//!                          │
//!                          ▼
//!                      deploying ──► deployed
//!                          │
//!                          └──────► failed
//! ```
//!
//! The initial status of a new downstream version is computed once, at
//! creation time, by [`compute_initial_status`]. The status shown to users is
//! [`effective_status`], which reconciles the stored value with the deploy
//! output reported back asynchronously.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{DownstreamOutput, PreflightResult, PreflightSpec, ReleaseMaterial};

/// Status of a downstream version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum DownstreamStatus {
    /// Known upstream, archive not downloaded yet.
    PendingDownload,
    /// Cluster topology must be provisioned first.
    PendingClusterManagement,
    /// Configuration must be reviewed.
    PendingConfig,
    /// Preflight checks must run.
    PendingPreflight,
    /// Ready to deploy.
    Pending,
    /// Deploy in progress (or not confirmed yet).
    Deploying,
    /// Deployed.
    Deployed,
    /// Deploy failed.
    Failed,
    /// Unrecognized stored value.
    Unknown,
}

impl DownstreamStatus {
    /// Stored representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingDownload => "pending_download",
            Self::PendingClusterManagement => "pending_cluster_management",
            Self::PendingConfig => "pending_config",
            Self::PendingPreflight => "pending_preflight",
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl From<&str> for DownstreamStatus {
    fn from(s: &str) -> Self {
        match s {
            "pending_download" => Self::PendingDownload,
            "pending_cluster_management" => Self::PendingClusterManagement,
            "pending_config" => Self::PendingConfig,
            "pending_preflight" => Self::PendingPreflight,
            "pending" => Self::Pending,
            "deploying" => Self::Deploying,
            "deployed" => Self::Deployed,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for DownstreamStatus {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for DownstreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Circumstances of a version's creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitialStatusInput {
    /// The version is created by an install rather than an update.
    pub is_install: bool,
    /// The install is driven by automation (no user in the loop).
    pub is_automated: bool,
    /// The target is a multi-node topology that is not provisioned yet.
    pub needs_cluster_management: bool,
    /// Non-strict preflights may be skipped.
    pub skip_preflights: bool,
}

impl InitialStatusInput {
    fn is_manual_install(&self) -> bool {
        self.is_install && !self.is_automated
    }
}

/// Status a newly created downstream version starts in. First match wins.
pub fn compute_initial_status(
    input: &InitialStatusInput,
    material: &ReleaseMaterial,
) -> DownstreamStatus {
    if input.needs_cluster_management && input.is_manual_install() {
        return DownstreamStatus::PendingClusterManagement;
    }

    if let Some(config) = &material.config_spec
        && (config.has_missing_required_values() || input.is_manual_install())
    {
        return DownstreamStatus::PendingConfig;
    }

    if let Some(preflight) = &material.preflight_spec
        && !preflight.analyzers.is_empty()
        && (!input.skip_preflights || preflight.has_strict_analyzers())
    {
        return DownstreamStatus::PendingPreflight;
    }

    DownstreamStatus::Pending
}

/// Status to report for a stored status and the recorded deploy output.
pub fn effective_status(
    stored: DownstreamStatus,
    output: Option<&DownstreamOutput>,
) -> DownstreamStatus {
    match output {
        Some(output) if output.is_error => DownstreamStatus::Failed,
        None if stored == DownstreamStatus::Deployed => DownstreamStatus::Deploying,
        _ => stored,
    }
}

/// Whether a strict analyzer failed or has not been run.
///
/// Skipped preflights count as not run.
pub fn has_failing_strict_preflights(
    spec: Option<&PreflightSpec>,
    result: Option<&PreflightResult>,
    skipped: bool,
) -> bool {
    let Some(spec) = spec else {
        return false;
    };
    if !spec.has_strict_analyzers() {
        return false;
    }
    match result {
        Some(result) if !skipped => result.has_strict_failures() || !result.errors.is_empty(),
        _ => true,
    }
}
