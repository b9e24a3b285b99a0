// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Contracts of external collaborators.
//!
//! Archive storage and preflight execution live outside the release manager.
//! A filesystem archive store is provided for single node installs and tests.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::models::{PreflightResult, PreflightSpec};

/// Backend-agnostic blob storage for release archives.
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Read the archive stored at `path`.
    async fn read_archive(&self, path: &str) -> Result<Vec<u8>>;

    /// Store `bytes` at `path`, replacing any previous archive.
    async fn write_archive(&self, path: &str, bytes: &[u8]) -> Result<()>;
}

/// Runs preflight checks against a cluster.
#[async_trait]
pub trait PreflightRunner: Send + Sync {
    /// Run the analyzers of `spec` for a downstream version.
    async fn run(
        &self,
        app_id: &str,
        cluster_id: &str,
        sequence: i64,
        spec: &PreflightSpec,
    ) -> Result<PreflightResult>;
}

/// Storage path of a version's archive.
pub fn archive_path(app_id: &str, sequence: i64) -> String {
    format!("{}/{}.tar.gz", app_id, sequence)
}

/// Archive store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FileArchiveStore {
    root: PathBuf,
}

impl FileArchiveStore {
    /// Create a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(CoreError::Archive(format!("invalid archive path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }

    /// Verify the root is writable by writing and removing a probe file.
    pub async fn check_writable(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            CoreError::Archive(format!("cannot create {}: {}", self.root.display(), e))
        })?;

        let probe = self.root.join(".write-check");
        tokio::fs::write(&probe, b"ok").await.map_err(|e| {
            CoreError::Archive(format!("{} is not writable: {}", self.root.display(), e))
        })?;
        tokio::fs::remove_file(&probe).await?;

        info!(root = %self.root.display(), "Archive storage is writable");
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for FileArchiveStore {
    async fn read_archive(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CoreError::Archive(format!("archive '{}' not found", path)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_archive(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers never observe a partially written archive.
        let tmp = full.with_extension("partial");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &full).await?;

        debug!(path = %path, bytes = bytes.len(), "Archive written");
        Ok(())
    }
}
