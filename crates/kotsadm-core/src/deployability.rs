// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Deployability resolver.
//!
//! Decides whether a candidate version may be deployed next on a downstream.
//! Rules, first match wins:
//!
//! 1. A strict preflight failed or has not run: blocked.
//! 2. Nothing is deployed: deployable.
//! 3. The candidate is the deployed version: deployable (re-apply).
//! 4. The candidate is on another channel: deployable.
//! 5. The candidate precedes the deployed version: blocked (no rollback).
//! 6. Required versions of the candidate's channel lie strictly between the
//!    deployed version and the candidate, and are not the same release as
//!    either end: blocked.

use std::cmp::Ordering;

use serde::Serialize;

use crate::ordering::{VersionOrdering, VersionRef};

/// Cause reported for rule 1.
pub const STRICT_PREFLIGHT_CAUSE: &str = "Deployment is disabled as a strict analyzer in this version's preflight checks has failed or has not been run.";

/// Cause reported for rule 5.
pub const ROLLBACK_CAUSE: &str =
    "Rollback to an earlier version is not supported. Deploy a newer version instead.";

/// Why a version is not deployable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "labels")]
pub enum Blocker {
    /// A strict preflight failed or has not run.
    StrictPreflights,
    /// The candidate precedes the deployed version.
    Rollback,
    /// Required versions must be deployed first (labels, encounter order).
    RequiredVersions(Vec<String>),
}

impl Blocker {
    /// Human readable cause.
    pub fn cause(&self) -> String {
        match self {
            Self::StrictPreflights => STRICT_PREFLIGHT_CAUSE.to_string(),
            Self::Rollback => ROLLBACK_CAUSE.to_string(),
            Self::RequiredVersions(labels) if labels.len() == 1 => format!(
                "This version cannot be deployed because version {} is required and must be deployed first.",
                labels[0]
            ),
            Self::RequiredVersions(labels) => format!(
                "This version cannot be deployed because versions {} are required and must be deployed first.",
                labels.join(", ")
            ),
        }
    }
}

/// Resolver verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Deployability {
    /// Why the version is blocked, if it is.
    pub blocker: Option<Blocker>,
}

impl Deployability {
    fn allowed() -> Self {
        Self { blocker: None }
    }

    fn blocked(blocker: Blocker) -> Self {
        Self {
            blocker: Some(blocker),
        }
    }

    /// Whether the version may be deployed.
    pub fn is_deployable(&self) -> bool {
        self.blocker.is_none()
    }

    /// Human readable cause when blocked.
    pub fn cause(&self) -> Option<String> {
        self.blocker.as_ref().map(Blocker::cause)
    }
}

/// Decide whether `candidate` may be deployed given the deployed `current`.
///
/// `all_versions` is the release history of the downstream; only versions of
/// the candidate's channel that `ordering` places strictly between `current`
/// and `candidate` are considered.
pub fn is_deployable(
    candidate: &VersionRef,
    all_versions: &[VersionRef],
    current: Option<&VersionRef>,
    ordering: &dyn VersionOrdering,
) -> Deployability {
    if candidate.has_failing_strict_preflights {
        return Deployability::blocked(Blocker::StrictPreflights);
    }

    let Some(current) = current else {
        return Deployability::allowed();
    };

    if candidate.sequence == current.sequence {
        return Deployability::allowed();
    }

    if candidate.channel_id != current.channel_id {
        return Deployability::allowed();
    }

    if ordering.compare(candidate, current) == Ordering::Less {
        return Deployability::blocked(Blocker::Rollback);
    }

    let mut labels: Vec<String> = Vec::new();
    for version in all_versions {
        if version.channel_id != candidate.channel_id {
            continue;
        }
        let between = ordering.compare(version, current) == Ordering::Greater
            && ordering.compare(version, candidate) == Ordering::Less;
        if !between || !version.is_required {
            continue;
        }
        if ordering.is_redundant(version, current) || ordering.is_redundant(version, candidate) {
            continue;
        }
        if !labels.contains(&version.version_label) {
            labels.push(version.version_label.clone());
        }
    }

    if labels.is_empty() {
        Deployability::allowed()
    } else {
        Deployability::blocked(Blocker::RequiredVersions(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ordering::{CursorOrdering, SemverOrdering};

    fn version(sequence: i64, cursor: &str, label: &str, required: bool) -> VersionRef {
        VersionRef {
            sequence,
            channel_id: Some("stable".to_string()),
            is_required: required,
            cursor: Some(cursor.to_string()),
            version_label: label.to_string(),
            has_failing_strict_preflights: false,
        }
    }

    fn history() -> Vec<VersionRef> {
        vec![
            version(0, "1", "1.0", false),
            version(1, "2", "2.0", false),
            version(2, "3", "3.0", true),
            version(3, "4", "4.0", true),
            version(4, "5", "5.0", false),
        ]
    }

    #[test]
    fn test_nothing_deployed() {
        let all = history();
        let result = is_deployable(&all[4], &all, None, &CursorOrdering);
        assert!(result.is_deployable());
        assert_eq!(result.cause(), None);
    }

    #[test]
    fn test_redeploy_current() {
        let all = history();
        let result = is_deployable(&all[1], &all, Some(&all[1]), &CursorOrdering);
        assert!(result.is_deployable());
    }

    #[test]
    fn test_channel_switch_bypasses_required_versions() {
        let mut all = history();
        all[4].channel_id = Some("beta".to_string());
        let result = is_deployable(&all[4], &all, Some(&all[1]), &CursorOrdering);
        assert!(result.is_deployable());
    }

    #[test]
    fn test_required_version_of_another_channel_does_not_block() {
        let mut stable = version(0, "4", "stable-4", true);
        stable.channel_id = Some("stable".to_string());
        let mut beta_3 = version(1, "3", "beta-3", false);
        beta_3.channel_id = Some("beta".to_string());
        let mut beta_5 = version(2, "5", "beta-5", false);
        beta_5.channel_id = Some("beta".to_string());
        let all = vec![stable, beta_3, beta_5];

        let result = is_deployable(&all[2], &all, Some(&all[1]), &CursorOrdering);
        assert!(result.is_deployable());

        // Channel-switch history with interleaved releases.
        let mut all = all;
        all.push(VersionRef {
            channel_id: Some("beta".to_string()),
            ..version(3, "6", "beta-6", true)
        });
        all.push(VersionRef {
            channel_id: Some("beta".to_string()),
            ..version(4, "7", "beta-7", false)
        });
        let result = is_deployable(&all[4], &all, Some(&all[1]), &CursorOrdering);
        assert_eq!(
            result.blocker,
            Some(Blocker::RequiredVersions(vec!["beta-6".to_string()]))
        );
    }

    #[test]
    fn test_required_versions_block() {
        let all = history();
        let result = is_deployable(&all[4], &all, Some(&all[1]), &CursorOrdering);
        assert!(!result.is_deployable());
        assert_eq!(
            result.cause().unwrap(),
            "This version cannot be deployed because versions 3.0, 4.0 are required and must be deployed first."
        );
    }

    #[test]
    fn test_required_labels_are_deduplicated() {
        let all = vec![
            version(0, "2", "2.0", false),
            version(1, "3", "3.0", true),
            version(2, "3", "3.0", true),
            version(3, "3", "3.0", true),
            version(4, "5", "5.0", false),
        ];
        let result = is_deployable(&all[4], &all, Some(&all[0]), &CursorOrdering);
        assert_eq!(
            result.blocker,
            Some(Blocker::RequiredVersions(vec!["3.0".to_string()]))
        );
        assert_eq!(
            result.cause().unwrap(),
            "This version cannot be deployed because version 3.0 is required and must be deployed first."
        );
    }

    #[test]
    fn test_strict_preflights_block_everything() {
        let all = history();
        let mut candidate = all[1].clone();
        candidate.has_failing_strict_preflights = true;

        for current in [None, Some(&all[1]), Some(&all[0])] {
            let result = is_deployable(&candidate, &all, current, &CursorOrdering);
            assert!(!result.is_deployable());
            assert_eq!(result.cause().unwrap(), STRICT_PREFLIGHT_CAUSE);
        }
    }

    #[test]
    fn test_required_version_matching_an_endpoint_cursor_is_redundant() {
        let all = vec![
            version(0, "2", "2.0", false),
            version(1, "2", "2.0-rebuild", true),
            version(2, "5", "5.0-pre", true),
            version(3, "5", "5.0", false),
        ];
        // Sequence 1 shares the current cursor, sequence 2 the candidate's.
        let result = is_deployable(&all[3], &all, Some(&all[0]), &CursorOrdering);
        assert!(result.is_deployable());
    }

    #[test]
    fn test_required_endpoints_do_not_block() {
        let mut all = history();
        all[1].is_required = true;
        let result = is_deployable(&all[2], &all, Some(&all[1]), &CursorOrdering);
        assert!(result.is_deployable());
    }

    #[test]
    fn test_rollback_is_rejected() {
        let all = history();
        let result = is_deployable(&all[0], &all, Some(&all[3]), &CursorOrdering);
        assert_eq!(result.blocker, Some(Blocker::Rollback));
        assert_eq!(result.cause().unwrap(), ROLLBACK_CAUSE);
    }

    #[test]
    fn test_semver_ordering_uses_labels() {
        let all = vec![
            version(0, "1", "1.0.0", false),
            version(1, "2", "1.2.0", true),
            version(2, "3", "1.1.0", true),
            version(3, "4", "2.0.0", false),
        ];
        // 1.1.0 lies between 1.0.0 and 1.2.0 by label.
        let result = is_deployable(&all[1], &all, Some(&all[0]), &SemverOrdering);
        assert_eq!(
            result.blocker,
            Some(Blocker::RequiredVersions(vec!["1.1.0".to_string()]))
        );

        let result = is_deployable(&all[1], &all, Some(&all[0]), &CursorOrdering);
        assert!(result.is_deployable());
    }
}
