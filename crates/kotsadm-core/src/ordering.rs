// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Release ordering.
//!
//! Apps either order releases by when they were created or, when semantic
//! versioning is required, by the version label. Both rules sit behind
//! [`VersionOrdering`] so the deployability resolver is independent of which
//! one applies. Every ordering is total; ties break on sequence.

use std::cmp::Ordering;

use semver::Version;

/// The fields of a version that ordering and deployability look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionRef {
    /// Per-app sequence.
    pub sequence: i64,
    /// Channel id.
    pub channel_id: Option<String>,
    /// Release must not be skipped.
    pub is_required: bool,
    /// Upstream cursor.
    pub cursor: Option<String>,
    /// Version label.
    pub version_label: String,
    /// A strict preflight failed or has not run.
    pub has_failing_strict_preflights: bool,
}

/// Total order over releases of one app.
pub trait VersionOrdering: Send + Sync {
    /// Compare two versions in release order.
    fn compare(&self, a: &VersionRef, b: &VersionRef) -> Ordering;

    /// Whether `version` is the same release as `endpoint`.
    fn is_redundant(&self, version: &VersionRef, endpoint: &VersionRef) -> bool;
}

/// Orders by release chronology (sequence).
///
/// Cursors restart when an app switches channel, so they only decide whether
/// two releases of one channel are the same release.
#[derive(Debug, Clone, Copy, Default)]
pub struct CursorOrdering;

impl VersionOrdering for CursorOrdering {
    fn compare(&self, a: &VersionRef, b: &VersionRef) -> Ordering {
        a.sequence.cmp(&b.sequence)
    }

    fn is_redundant(&self, version: &VersionRef, endpoint: &VersionRef) -> bool {
        version.cursor.is_some()
            && version.cursor == endpoint.cursor
            && version.channel_id == endpoint.channel_id
    }
}

/// Orders by semantic version of the label, sequence breaking ties.
///
/// Labels that do not parse sort before every parsed label, in sequence
/// order among themselves.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemverOrdering;

fn parse_semver(label: &str) -> Option<Version> {
    let trimmed = label.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

impl VersionOrdering for SemverOrdering {
    fn compare(&self, a: &VersionRef, b: &VersionRef) -> Ordering {
        parse_semver(&a.version_label)
            .cmp(&parse_semver(&b.version_label))
            .then(a.sequence.cmp(&b.sequence))
    }

    fn is_redundant(&self, version: &VersionRef, endpoint: &VersionRef) -> bool {
        match (
            parse_semver(&version.version_label),
            parse_semver(&endpoint.version_label),
        ) {
            (Some(x), Some(y)) => x == y,
            _ => CursorOrdering.is_redundant(version, endpoint),
        }
    }
}

/// Ordering a channel uses.
pub fn ordering_for(is_semver_required: bool) -> &'static dyn VersionOrdering {
    if is_semver_required {
        &SemverOrdering
    } else {
        &CursorOrdering
    }
}

/// Sort versions ascending in release order.
pub fn sort_versions(versions: &mut [VersionRef], ordering: &dyn VersionOrdering) {
    versions.sort_by(|a, b| ordering.compare(a, b));
}
