// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded wait for the store to become ready.
//!
//! A freshly started cluster may still be electing a leader, so startup
//! polls instead of failing fast. Only retryable errors are retried; the
//! wait ends at the caller's deadline or on cancellation.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::persistence::Store;

/// Poll cadence and deadline for [`wait_for_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOptions {
    /// Delay between probes.
    pub poll_interval: Duration,
    /// Total time allowed before giving up.
    pub timeout: Duration,
}

impl Default for ReadinessOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Poll `store.ping()` until it succeeds.
///
/// Returns `DeadlineExceeded` once `options.timeout` elapses, `Cancelled`
/// when `cancel` fires, and any non-retryable probe error immediately.
pub async fn wait_for_ready(
    store: &dyn Store,
    options: ReadinessOptions,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match store.ping().await {
            Ok(()) => {
                info!(
                    backend = store.backend_name(),
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Store is ready"
                );
                return Ok(());
            }
            Err(err) if err.is_retryable() => {
                debug!(attempts, error = %err, "Store not ready yet");
                if attempts % 10 == 0 {
                    warn!(attempts, error = %err, "Still waiting for store");
                }
            }
            Err(err) => return Err(err),
        }

        let remaining = options.timeout.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(StoreError::DeadlineExceeded {
                operation: "store readiness",
                elapsed_secs: started.elapsed().as_secs(),
            });
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(StoreError::Cancelled("store readiness")),
            _ = tokio::time::sleep(options.poll_interval.min(remaining)) => {}
        }
    }
}
