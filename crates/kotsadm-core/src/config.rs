// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for kotsadm-core.

use std::path::PathBuf;
use std::time::Duration;

use kotsadm_store::StoreConfig;

/// Release manager configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// System-of-record store connection.
    pub store: StoreConfig,
    /// Legacy PostgreSQL database to migrate from at startup.
    pub legacy_database_uri: Option<String>,
    /// Directory of `*.sql` files for the legacy schema (embedded DDL when unset).
    pub legacy_schema_dir: Option<PathBuf>,
    /// Directory of `*.sql` files for the store schema (embedded DDL when unset).
    pub schema_dir: Option<PathBuf>,
    /// TTL of the app and task status caches.
    pub cache_ttl: Duration,
    /// Lifetime of an authentication session.
    pub session_max_age: Duration,
    /// Lifetime of an OIDC anti-replay state.
    pub oidc_state_max_age: Duration,
    /// Root directory of release archives.
    pub archive_dir: PathBuf,
    /// Skip the archive storage write check at startup.
    pub skip_bucket_checks: bool,
    /// Cadence of periodic maintenance.
    pub maintenance_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Store settings are read by [`StoreConfig::from_env`]. Optional (with defaults):
    /// - `KOTSADM_LEGACY_DATABASE_URI`: legacy database to migrate from (default: unset)
    /// - `KOTSADM_LEGACY_SCHEMA_DIR`: legacy schema directory (default: embedded)
    /// - `KOTSADM_SCHEMA_DIR`: store schema directory (default: embedded)
    /// - `KOTSADM_CACHE_TTL_SECS`: cache TTL (default: 60)
    /// - `KOTSADM_SESSION_MAX_AGE_HOURS`: session lifetime (default: 12)
    /// - `KOTSADM_OIDC_STATE_MAX_AGE_MINS`: OIDC state lifetime (default: 10)
    /// - `KOTSADM_ARCHIVE_DIR`: archive root (default: .data/archives)
    /// - `KOTSADM_SKIP_BUCKET_CHECKS`: "true" or "1" to skip (default: false)
    /// - `KOTSADM_MAINTENANCE_INTERVAL_SECS`: maintenance cadence (default: 3600)
    pub fn from_env() -> Result<Self, ConfigError> {
        let store = StoreConfig::from_env()?;

        let legacy_database_uri = non_empty_var("KOTSADM_LEGACY_DATABASE_URI");
        let legacy_schema_dir = non_empty_var("KOTSADM_LEGACY_SCHEMA_DIR").map(PathBuf::from);
        let schema_dir = non_empty_var("KOTSADM_SCHEMA_DIR").map(PathBuf::from);

        let cache_ttl_secs = parse_u64("KOTSADM_CACHE_TTL_SECS", 60)?;
        let session_hours = parse_u64("KOTSADM_SESSION_MAX_AGE_HOURS", 12)?;
        let oidc_mins = parse_u64("KOTSADM_OIDC_STATE_MAX_AGE_MINS", 10)?;
        let maintenance_secs = parse_u64("KOTSADM_MAINTENANCE_INTERVAL_SECS", 3600)?;

        if maintenance_secs == 0 {
            return Err(ConfigError::Invalid(
                "KOTSADM_MAINTENANCE_INTERVAL_SECS",
                "must be greater than zero",
            ));
        }

        let archive_dir = PathBuf::from(
            std::env::var("KOTSADM_ARCHIVE_DIR").unwrap_or_else(|_| ".data/archives".to_string()),
        );

        let skip_bucket_checks = std::env::var("KOTSADM_SKIP_BUCKET_CHECKS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            store,
            legacy_database_uri,
            legacy_schema_dir,
            schema_dir,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            session_max_age: Duration::from_secs(session_hours * 3600),
            oidc_state_max_age: Duration::from_secs(oidc_mins * 60),
            archive_dir,
            skip_bucket_checks,
            maintenance_interval: Duration::from_secs(maintenance_secs),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_u64(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| ConfigError::Invalid(key, "must be a non-negative integer")),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Store configuration is invalid.
    #[error(transparent)]
    Store(#[from] kotsadm_store::ConfigError),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            self.vars.push((key.to_string(), env::var(key).ok()));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    const OPTIONAL: &[&str] = &[
        "KOTSADM_LEGACY_DATABASE_URI",
        "KOTSADM_LEGACY_SCHEMA_DIR",
        "KOTSADM_SCHEMA_DIR",
        "KOTSADM_CACHE_TTL_SECS",
        "KOTSADM_SESSION_MAX_AGE_HOURS",
        "KOTSADM_OIDC_STATE_MAX_AGE_MINS",
        "KOTSADM_ARCHIVE_DIR",
        "KOTSADM_SKIP_BUCKET_CHECKS",
        "KOTSADM_MAINTENANCE_INTERVAL_SECS",
    ];

    #[test]
    fn test_config_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("KOTSADM_STORE_URI", "http://rqlite:4001");
        for key in OPTIONAL {
            guard.remove(key);
        }

        let config = Config::from_env().unwrap();

        assert_eq!(config.store.uri, "http://rqlite:4001");
        assert!(config.legacy_database_uri.is_none());
        assert!(config.schema_dir.is_none());
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.session_max_age, Duration::from_secs(12 * 3600));
        assert_eq!(config.oidc_state_max_age, Duration::from_secs(600));
        assert_eq!(config.archive_dir, PathBuf::from(".data/archives"));
        assert!(!config.skip_bucket_checks);
        assert_eq!(config.maintenance_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_config_custom_values() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();
        guard.set("KOTSADM_STORE_URI", "sqlite::memory:");
        guard.set("KOTSADM_LEGACY_DATABASE_URI", "postgres://kotsadm@postgres/kotsadm");
        guard.set("KOTSADM_SCHEMA_DIR", "/schema/rqlite");
        guard.set("KOTSADM_CACHE_TTL_SECS", "5");
        guard.set("KOTSADM_SKIP_BUCKET_CHECKS", "1");
        guard.set("KOTSADM_MAINTENANCE_INTERVAL_SECS", "30");

        let config = Config::from_env().unwrap();

        assert_eq!(
            config.legacy_database_uri.as_deref(),
            Some("postgres://kotsadm@postgres/kotsadm")
        );
        assert_eq!(config.schema_dir, Some(PathBuf::from("/schema/rqlite")));
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert!(config.skip_bucket_checks);
        assert_eq!(config.maintenance_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_config_errors() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("KOTSADM_STORE_URI");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Store(kotsadm_store::ConfigError::Missing("KOTSADM_STORE_URI"))
        ));

        guard.set("KOTSADM_STORE_URI", "http://rqlite:4001");
        guard.set("KOTSADM_CACHE_TTL_SECS", "soon");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("KOTSADM_CACHE_TTL_SECS", _)
        ));

        guard.set("KOTSADM_CACHE_TTL_SECS", "60");
        guard.set("KOTSADM_MAINTENANCE_INTERVAL_SECS", "0");
        assert!(matches!(
            Config::from_env().unwrap_err(),
            ConfigError::Invalid("KOTSADM_MAINTENANCE_INTERVAL_SECS", _)
        ));
    }
}
