// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Background worker for queued jobs and periodic maintenance.
//!
//! Side effects that must not block a request (pruning sessions, clearing
//! stale task statuses, running preflights) are submitted as [`Job`]s through
//! a [`JobQueue`]. The worker also runs the pruning jobs on a fixed interval.
//! Failures are logged; they never reach the submitter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::collaborators::PreflightRunner;
use crate::error::{CoreError, Result};
use crate::session_store::SessionStore;
use crate::tasks::TaskStatusStore;
use crate::versions::VersionManager;

/// Capacity of the job queue.
const QUEUE_CAPACITY: usize = 256;

/// A unit of background work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// Drop expired sessions and OIDC states.
    PruneSessions,
    /// Delete task statuses not updated within `older_than`.
    ClearStaleTaskStatuses {
        /// Age threshold.
        older_than: Duration,
    },
    /// Run the preflights of a downstream version and store the result.
    RunPreflights {
        /// App id.
        app_id: String,
        /// Cluster id.
        cluster_id: String,
        /// Downstream sequence.
        sequence: i64,
    },
}

impl Job {
    fn name(&self) -> &'static str {
        match self {
            Self::PruneSessions => "prune_sessions",
            Self::ClearStaleTaskStatuses { .. } => "clear_stale_task_statuses",
            Self::RunPreflights { .. } => "run_preflights",
        }
    }
}

/// Configuration for the maintenance worker.
#[derive(Debug, Clone)]
pub struct MaintenanceWorkerConfig {
    /// How often periodic maintenance runs.
    pub interval: Duration,
    /// Task statuses older than this are cleared periodically.
    pub task_status_max_age: Duration,
}

impl Default for MaintenanceWorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),             // 1 hour
            task_status_max_age: Duration::from_secs(86400), // 24 hours
        }
    }
}

/// Sending side of the job queue.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Queue a job, waiting for room if the queue is full.
    pub async fn submit(&self, job: Job) -> Result<()> {
        self.tx.send(job).await.map_err(|_| CoreError::WorkerStopped)
    }

    /// Queue a job without waiting.
    pub fn try_submit(&self, job: Job) -> Result<()> {
        self.tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(job) => {
                warn!(job = job.name(), "Maintenance queue full, dropping job");
                CoreError::InvalidRequest("maintenance queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => CoreError::WorkerStopped,
        })
    }
}

/// Background worker processing maintenance jobs.
pub struct MaintenanceWorker {
    sessions: Arc<SessionStore>,
    tasks: TaskStatusStore,
    versions: VersionManager,
    preflights: Option<Arc<dyn PreflightRunner>>,
    config: MaintenanceWorkerConfig,
    jobs: mpsc::Receiver<Job>,
    shutdown: Arc<Notify>,
}

impl MaintenanceWorker {
    /// Create a worker and the queue that feeds it.
    pub fn new(
        sessions: Arc<SessionStore>,
        tasks: TaskStatusStore,
        versions: VersionManager,
        preflights: Option<Arc<dyn PreflightRunner>>,
        config: MaintenanceWorkerConfig,
    ) -> (Self, JobQueue) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let worker = Self {
            sessions,
            tasks,
            versions,
            preflights,
            config,
            jobs: rx,
            shutdown: Arc::new(Notify::new()),
        };
        (worker, JobQueue { tx })
    }

    /// Get a handle that can be used to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the worker loop until the shutdown signal is received.
    pub async fn run(mut self) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            task_status_max_age_secs = self.config.task_status_max_age.as_secs(),
            preflight_runner = self.preflights.is_some(),
            "Maintenance worker started"
        );

        let mut ticker =
            tokio::time::interval_at(Instant::now() + self.config.interval, self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut queue_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Maintenance worker received shutdown signal");
                    break;
                }

                job = self.jobs.recv(), if queue_open => {
                    match job {
                        Some(job) => self.process(job).await,
                        None => {
                            debug!("Maintenance queue closed, running periodic jobs only");
                            queue_open = false;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.run_periodic().await;
                }
            }
        }

        info!("Maintenance worker stopped");
    }

    async fn run_periodic(&self) {
        self.process(Job::PruneSessions).await;
        self.process(Job::ClearStaleTaskStatuses {
            older_than: self.config.task_status_max_age,
        })
        .await;
    }

    async fn process(&self, job: Job) {
        let name = job.name();
        let outcome = match job {
            Job::PruneSessions => self.sessions.prune().await.map(|pruned| {
                debug!(pruned = pruned, "Sessions pruned");
            }),
            Job::ClearStaleTaskStatuses { older_than } => self
                .tasks
                .clear_stale_task_statuses(older_than)
                .await
                .map(|_| ()),
            Job::RunPreflights {
                app_id,
                cluster_id,
                sequence,
            } => self.run_preflights(&app_id, &cluster_id, sequence).await,
        };

        if let Err(e) = outcome {
            error!(job = name, error = %e, code = e.error_code(), "Maintenance job failed");
        }
    }

    async fn run_preflights(&self, app_id: &str, cluster_id: &str, sequence: i64) -> Result<()> {
        let Some(runner) = &self.preflights else {
            warn!(app_id = %app_id, sequence = sequence, "No preflight runner configured");
            return Ok(());
        };

        let version = self
            .versions
            .get_downstream_version(app_id, cluster_id, sequence)
            .await?;
        let release = self
            .versions
            .get_app_version(app_id, version.parent_sequence)
            .await?;
        let Some(spec) = release.preflight_spec else {
            debug!(app_id = %app_id, sequence = sequence, "Release declares no preflights");
            return Ok(());
        };

        self.versions
            .set_preflight_progress(app_id, cluster_id, sequence, r#"{"status":"running"}"#)
            .await?;
        let result = runner.run(app_id, cluster_id, sequence, &spec).await?;
        self.versions
            .set_preflight_result(app_id, cluster_id, sequence, &result)
            .await?;

        info!(
            app_id = %app_id,
            cluster_id = %cluster_id,
            sequence = sequence,
            analyzers = result.results.len(),
            "Preflights completed"
        );
        Ok(())
    }
}
