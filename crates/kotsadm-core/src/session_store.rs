// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authentication sessions and OIDC anti-replay state.
//!
//! Kept in a secret backend rather than the SQL store, so logins keep working
//! while the store is unavailable. One mutex serializes every access; each
//! write prunes expired sessions and stale OIDC states before saving.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Session id (bearer secret).
    pub id: String,
    /// Authenticated user.
    pub user_id: String,
    /// Granted roles.
    pub roles: Vec<String>,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
}

/// Everything persisted in the secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretData {
    /// Sessions by id.
    #[serde(default)]
    pub sessions: HashMap<String, Session>,
    /// OIDC states by value, with their creation time.
    #[serde(default)]
    pub oidc_states: HashMap<String, DateTime<Utc>>,
}

/// Storage of the session secret.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Load the current secret contents.
    async fn load(&self) -> Result<SecretData>;

    /// Replace the secret contents.
    async fn save(&self, data: &SecretData) -> Result<()>;
}

/// Process-local secret backend.
#[derive(Default)]
pub struct InMemorySecretBackend {
    data: Mutex<SecretData>,
}

impl InMemorySecretBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretBackend for InMemorySecretBackend {
    async fn load(&self) -> Result<SecretData> {
        Ok(self.data.lock().await.clone())
    }

    async fn save(&self, data: &SecretData) -> Result<()> {
        *self.data.lock().await = data.clone();
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| CoreError::Session(format!("invalid duration: {}", e)))
}

/// Session and OIDC state store.
pub struct SessionStore {
    backend: Arc<dyn SecretBackend>,
    state: Mutex<SecretData>,
    session_max_age: chrono::Duration,
    oidc_state_max_age: chrono::Duration,
}

impl SessionStore {
    /// Create a store over a backend.
    pub fn new(
        backend: Arc<dyn SecretBackend>,
        session_max_age: Duration,
        oidc_state_max_age: Duration,
    ) -> Result<Self> {
        Ok(Self {
            backend,
            state: Mutex::new(SecretData::default()),
            session_max_age: to_chrono(session_max_age)?,
            oidc_state_max_age: to_chrono(oidc_state_max_age)?,
        })
    }

    /// Reload from the backend, keeping the last known state on failure.
    async fn refresh(&self, state: &mut SecretData) {
        match self.backend.load().await {
            Ok(data) => *state = data,
            Err(e) => warn!(error = %e, "Failed to load session secret, using last known state"),
        }
    }

    fn prune_data(&self, state: &mut SecretData, now: DateTime<Utc>) -> usize {
        let before = state.sessions.len() + state.oidc_states.len();
        state.sessions.retain(|_, s| s.expires_at > now);
        let horizon = now - self.oidc_state_max_age;
        state.oidc_states.retain(|_, created| *created > horizon);
        before - (state.sessions.len() + state.oidc_states.len())
    }

    async fn save(&self, state: &mut SecretData) -> Result<()> {
        let pruned = self.prune_data(state, Utc::now());
        if pruned > 0 {
            debug!(pruned = pruned, "Pruned expired session entries");
        }
        self.backend.save(state).await
    }

    /// Start a session for a user.
    pub async fn create_session(&self, user_id: &str, roles: Vec<String>) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            roles,
            issued_at: now,
            expires_at: now + self.session_max_age,
        };

        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        state.sessions.insert(session.id.clone(), session.clone());
        self.save(&mut state).await?;

        debug!(user_id = %user_id, "Session created");
        Ok(session)
    }

    /// Session by id, unless missing or expired.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        Ok(state
            .sessions
            .get(id)
            .filter(|s| s.expires_at > Utc::now())
            .cloned())
    }

    /// End a session.
    pub async fn delete_session(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        state.sessions.remove(id);
        self.save(&mut state).await
    }

    /// Remember an OIDC state issued with an authorization request.
    pub async fn put_oidc_state(&self, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        state.oidc_states.insert(value.to_string(), Utc::now());
        self.save(&mut state).await
    }

    /// Consume an OIDC state. Returns false when unknown, already used or stale.
    pub async fn take_oidc_state(&self, value: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        let Some(created) = state.oidc_states.remove(value) else {
            return Ok(false);
        };
        self.save(&mut state).await?;
        Ok(created > Utc::now() - self.oidc_state_max_age)
    }

    /// Drop expired sessions and stale OIDC states. Returns how many were removed.
    pub async fn prune(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        let pruned = self.prune_data(&mut state, Utc::now());
        if pruned > 0 {
            self.backend.save(&state).await?;
        }
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn store(backend: Arc<dyn SecretBackend>, session_max_age: Duration) -> SessionStore {
        SessionStore::new(backend, session_max_age, Duration::from_secs(600)).unwrap()
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let sessions = store(Arc::new(InMemorySecretBackend::new()), Duration::from_secs(3600));

        let session = sessions
            .create_session("admin", vec!["cluster-admin".to_string()])
            .await
            .unwrap();
        let found = sessions.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(found, session);

        sessions.delete_session(&session.id).await.unwrap();
        assert!(sessions.get_session(&session.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions_are_pruned_on_write() {
        let backend = Arc::new(InMemorySecretBackend::new());
        let sessions = store(backend.clone(), Duration::ZERO);

        let expired = sessions.create_session("admin", vec![]).await.unwrap();
        assert!(sessions.get_session(&expired.id).await.unwrap().is_none());

        sessions.put_oidc_state("state-1").await.unwrap();
        let data = backend.load().await.unwrap();
        assert!(data.sessions.is_empty());
        assert!(data.oidc_states.contains_key("state-1"));
    }

    #[tokio::test]
    async fn test_oidc_state_is_single_use() {
        let sessions = store(Arc::new(InMemorySecretBackend::new()), Duration::from_secs(3600));

        sessions.put_oidc_state("abc").await.unwrap();
        assert!(sessions.take_oidc_state("abc").await.unwrap());
        assert!(!sessions.take_oidc_state("abc").await.unwrap());
        assert!(!sessions.take_oidc_state("never-issued").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_oidc_state_is_rejected() {
        let backend = Arc::new(InMemorySecretBackend::new());
        let mut data = SecretData::default();
        data.oidc_states
            .insert("old".to_string(), Utc::now() - chrono::Duration::hours(1));
        backend.save(&data).await.unwrap();

        let sessions = store(backend.clone(), Duration::from_secs(3600));
        assert!(!sessions.take_oidc_state("old").await.unwrap());
        assert_eq!(sessions.prune().await.unwrap(), 0);
    }

    struct FlakyBackend {
        inner: InMemorySecretBackend,
        fail_loads: AtomicBool,
        fail_saves: AtomicBool,
    }

    #[async_trait]
    impl SecretBackend for FlakyBackend {
        async fn load(&self) -> Result<SecretData> {
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(CoreError::Session("secret unavailable".to_string()));
            }
            self.inner.load().await
        }

        async fn save(&self, data: &SecretData) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(CoreError::Session("secret unavailable".to_string()));
            }
            self.inner.save(data).await
        }
    }

    #[tokio::test]
    async fn test_load_failure_falls_back_to_last_known_state() {
        let backend = Arc::new(FlakyBackend {
            inner: InMemorySecretBackend::new(),
            fail_loads: AtomicBool::new(false),
            fail_saves: AtomicBool::new(false),
        });
        let sessions = store(backend.clone(), Duration::from_secs(3600));
        let session = sessions.create_session("admin", vec![]).await.unwrap();

        backend.fail_loads.store(true, Ordering::SeqCst);
        let found = sessions.get_session(&session.id).await.unwrap();
        assert_eq!(found.map(|s| s.user_id), Some("admin".to_string()));

        backend.fail_saves.store(true, Ordering::SeqCst);
        let err = sessions.create_session("other", vec![]).await.unwrap_err();
        assert!(matches!(err, CoreError::Session(_)));
    }
}
