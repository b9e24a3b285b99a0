// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for the release manager.
//!
//! [`ReleaseRuntime`] wires the repositories, caches and session store over a
//! shared store handle and runs the maintenance worker in the background.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kotsadm_core::collaborators::FileArchiveStore;
//! use kotsadm_core::runtime::ReleaseRuntime;
//! use kotsadm_store::persistence::SqliteStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::from_path(".data/kotsadm.db").await?);
//!
//!     let runtime = ReleaseRuntime::builder()
//!         .store(store)
//!         .archives(Arc::new(FileArchiveStore::new(".data/archives")))
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     let apps = runtime.apps().list_apps().await?;
//!
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kotsadm_store::Store;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::apps::AppRepository;
use crate::cache::AppCache;
use crate::clusters::ClusterRepository;
use crate::collaborators::{ArchiveStore, PreflightRunner};
use crate::config::Config;
use crate::maintenance_worker::{JobQueue, MaintenanceWorker, MaintenanceWorkerConfig};
use crate::session_store::{InMemorySecretBackend, SecretBackend, SessionStore};
use crate::tasks::TaskStatusStore;
use crate::versions::VersionManager;

/// Builder for creating a [`ReleaseRuntime`].
pub struct ReleaseRuntimeBuilder {
    store: Option<Arc<dyn Store>>,
    archives: Option<Arc<dyn ArchiveStore>>,
    secret_backend: Option<Arc<dyn SecretBackend>>,
    preflights: Option<Arc<dyn PreflightRunner>>,
    cache_ttl: Duration,
    session_max_age: Duration,
    oidc_state_max_age: Duration,
    maintenance: MaintenanceWorkerConfig,
}

impl Default for ReleaseRuntimeBuilder {
    fn default() -> Self {
        Self {
            store: None,
            archives: None,
            secret_backend: None,
            preflights: None,
            cache_ttl: Duration::from_secs(60),
            session_max_age: Duration::from_secs(12 * 3600), // 12 hours
            oidc_state_max_age: Duration::from_secs(600),    // 10 minutes
            maintenance: MaintenanceWorkerConfig::default(),
        }
    }
}

impl ReleaseRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take TTLs and the maintenance interval from loaded configuration.
    pub fn config(mut self, config: &Config) -> Self {
        self.cache_ttl = config.cache_ttl;
        self.session_max_age = config.session_max_age;
        self.oidc_state_max_age = config.oidc_state_max_age;
        self.maintenance.interval = config.maintenance_interval;
        self
    }

    /// Set the store handle (required).
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the archive store (required).
    pub fn archives(mut self, archives: Arc<dyn ArchiveStore>) -> Self {
        self.archives = Some(archives);
        self
    }

    /// Set the session secret backend.
    ///
    /// Default: process-local [`InMemorySecretBackend`]
    pub fn secret_backend(mut self, backend: Arc<dyn SecretBackend>) -> Self {
        self.secret_backend = Some(backend);
        self
    }

    /// Set the preflight runner used by queued preflight jobs.
    ///
    /// Default: none (preflight jobs are logged and skipped)
    pub fn preflights(mut self, runner: Arc<dyn PreflightRunner>) -> Self {
        self.preflights = Some(runner);
        self
    }

    /// Set the app and task status cache TTL.
    ///
    /// Default: 60 seconds
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the maintenance worker configuration.
    pub fn maintenance(mut self, config: MaintenanceWorkerConfig) -> Self {
        self.maintenance = config;
        self
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<ReleaseRuntimeConfig> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("store is required"))?;
        let archives = self
            .archives
            .ok_or_else(|| anyhow::anyhow!("archives is required"))?;
        if self.maintenance.interval.is_zero() {
            anyhow::bail!("maintenance interval must be greater than zero");
        }

        Ok(ReleaseRuntimeConfig {
            store,
            archives,
            secret_backend: self
                .secret_backend
                .unwrap_or_else(|| Arc::new(InMemorySecretBackend::new())),
            preflights: self.preflights,
            cache_ttl: self.cache_ttl,
            session_max_age: self.session_max_age,
            oidc_state_max_age: self.oidc_state_max_age,
            maintenance: self.maintenance,
        })
    }
}

/// Configuration for a [`ReleaseRuntime`].
pub struct ReleaseRuntimeConfig {
    store: Arc<dyn Store>,
    archives: Arc<dyn ArchiveStore>,
    secret_backend: Arc<dyn SecretBackend>,
    preflights: Option<Arc<dyn PreflightRunner>>,
    cache_ttl: Duration,
    session_max_age: Duration,
    oidc_state_max_age: Duration,
    maintenance: MaintenanceWorkerConfig,
}

impl ReleaseRuntimeConfig {
    /// Start the runtime, spawning the maintenance worker.
    pub async fn start(self) -> Result<ReleaseRuntime> {
        let app_cache = Arc::new(AppCache::new(self.cache_ttl));
        let apps = AppRepository::new(self.store.clone(), app_cache);
        let clusters = ClusterRepository::new(self.store.clone());
        let versions = VersionManager::new(self.store.clone(), apps.clone(), self.archives);
        let tasks = TaskStatusStore::new(self.store.clone(), self.cache_ttl);
        let sessions = Arc::new(SessionStore::new(
            self.secret_backend,
            self.session_max_age,
            self.oidc_state_max_age,
        )?);

        let (worker, jobs) = MaintenanceWorker::new(
            sessions.clone(),
            tasks.clone(),
            versions.clone(),
            self.preflights,
            self.maintenance,
        );
        let worker_shutdown = worker.shutdown_handle();
        let worker_handle = tokio::spawn(async move {
            worker.run().await;
        });

        info!(
            backend = self.store.backend_name(),
            cache_ttl_secs = self.cache_ttl.as_secs(),
            "ReleaseRuntime started"
        );

        Ok(ReleaseRuntime {
            store: self.store,
            apps,
            clusters,
            versions,
            tasks,
            sessions,
            jobs,
            worker_handle,
            worker_shutdown,
        })
    }
}

/// A running release manager.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct ReleaseRuntime {
    store: Arc<dyn Store>,
    apps: AppRepository,
    clusters: ClusterRepository,
    versions: VersionManager,
    tasks: TaskStatusStore,
    sessions: Arc<SessionStore>,
    jobs: JobQueue,
    worker_handle: JoinHandle<()>,
    worker_shutdown: Arc<Notify>,
}

impl ReleaseRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> ReleaseRuntimeBuilder {
        ReleaseRuntimeBuilder::new()
    }

    /// Shared store handle.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// App repository.
    pub fn apps(&self) -> &AppRepository {
        &self.apps
    }

    /// Cluster repository.
    pub fn clusters(&self) -> &ClusterRepository {
        &self.clusters
    }

    /// Version manager.
    pub fn versions(&self) -> &VersionManager {
        &self.versions
    }

    /// Task status repository.
    pub fn tasks(&self) -> &TaskStatusStore {
        &self.tasks
    }

    /// Session store.
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Queue feeding the maintenance worker.
    pub fn jobs(&self) -> &JobQueue {
        &self.jobs
    }

    /// Gracefully shut down the runtime.
    ///
    /// Signals the maintenance worker, waits for it, then closes the store.
    pub async fn shutdown(self) -> Result<()> {
        info!("ReleaseRuntime shutting down...");

        self.worker_shutdown.notify_one();

        if let Err(e) = self.worker_handle.await {
            error!("Maintenance worker task panicked: {}", e);
            return Err(anyhow::anyhow!("maintenance worker panicked: {}", e));
        }

        self.store.close().await;
        info!("ReleaseRuntime shutdown complete");
        Ok(())
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.worker_handle.is_finished()
    }
}
