// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! kotsadm core - release manager process
//!
//! Startup sequence:
//! - wait for the store to accept queries
//! - apply the schema
//! - copy the legacy database once, when one is configured
//! - verify the archive location
//! - run until Ctrl-C

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kotsadm_core::collaborators::FileArchiveStore;
use kotsadm_core::config::Config;
use kotsadm_core::runtime::ReleaseRuntime;
use kotsadm_store::legacy::{self, PostgresLegacySource};
use kotsadm_store::migrations::{self, SchemaSource};
use kotsadm_store::readiness::wait_for_ready;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kotsadm_core=info,kotsadm_store=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let config = Config::from_env()?;

    info!(
        store_uri = %config.store.uri,
        archive_dir = %config.archive_dir.display(),
        legacy_migration = config.legacy_database_uri.is_some(),
        "Starting kotsadm core"
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let store = config.store.open().await?;
    wait_for_ready(store.as_ref(), config.store.readiness, &cancel).await?;

    migrations::apply_schema(
        store.as_ref(),
        &SchemaSource::from_dir(config.schema_dir.as_deref()),
    )
    .await?;
    info!("Store schema verified");

    if let Some(legacy_uri) = &config.legacy_database_uri {
        let source = PostgresLegacySource::connect(legacy_uri).await?;
        let outcome = async {
            source
                .apply_schema(&SchemaSource::from_dir(config.legacy_schema_dir.as_deref()))
                .await?;
            legacy::migrate_once(&source, store.as_ref(), &cancel).await
        }
        .await;
        source.close().await;
        let outcome = outcome?;
        info!(?outcome, "Legacy migration finished");
    }

    let archives = Arc::new(FileArchiveStore::new(config.archive_dir.clone()));
    if config.skip_bucket_checks {
        warn!("Skipping archive location check");
    } else {
        archives.check_writable().await?;
    }

    // Start the runtime
    let runtime = ReleaseRuntime::builder()
        .config(&config)
        .store(store)
        .archives(archives)
        .build()?
        .start()
        .await?;

    info!("kotsadm core ready");

    // Wait for shutdown signal
    cancel.cancelled().await;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("kotsadm core shut down");

    Ok(())
}
