//! Server-side sessions keyed by an opaque, client-carried session id.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ras_identity_core::{IdentityClaims, generate_opaque_token};
use ras_identity_oidc::{AccessToken, RefreshedTokens};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found")]
    SessionNotFound,

    #[error("Session id already in use")]
    DuplicateSession,

    #[error("Session store error: {0}")]
    StoreError(String),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::SessionNotFound => "session_not_found",
            SessionError::DuplicateSession | SessionError::StoreError(_) => "session_store_error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions unused for longer than this are treated as gone
    pub idle_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_seconds: 24 * 60 * 60,
        }
    }
}

impl SessionConfig {
    pub fn with_idle_timeout(mut self, seconds: u64) -> Self {
        self.idle_timeout_seconds = seconds;
        self
    }

    fn idle_timeout(&self) -> Duration {
        const MAX_SECS: u64 = 100 * 365 * 24 * 3600;
        Duration::seconds(self.idle_timeout_seconds.min(MAX_SECS) as i64)
    }
}

/// An authenticated user's server-side state.
#[derive(Clone)]
pub struct Session {
    pub session_id: String,
    pub claims: IdentityClaims,
    pub access_token: AccessToken,
    pub refresh_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    pub fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        now - self.last_seen_at > idle_timeout
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject", &self.claims.subject)
            .field("access_token", &self.access_token)
            .field("created_at", &self.created_at)
            .field("last_seen_at", &self.last_seen_at)
            .finish_non_exhaustive()
    }
}

/// Session persistence.
///
/// Each operation must be atomic with respect to the others.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store a new session; fails if the id is already taken
    async fn insert(&self, session: Session) -> SessionResult<()>;

    async fn get(&self, session_id: &str) -> SessionResult<Option<Session>>;

    /// Advance `last_seen_at` to `now`, never moving it backwards
    async fn touch(&self, session_id: &str, now: DateTime<Utc>) -> SessionResult<Option<Session>>;

    /// Replace the session's tokens, keeping the refresh token if none is given
    async fn replace_tokens(
        &self,
        session_id: &str,
        access_token: AccessToken,
        refresh_token: Option<String>,
    ) -> SessionResult<Option<Session>>;

    async fn remove(&self, session_id: &str) -> SessionResult<Option<Session>>;

    /// Remove sessions last seen before `cutoff`, returning how many were dropped
    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> SessionResult<usize>;
}

/// In-memory implementation of SessionStore
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: Session) -> SessionResult<()> {
        let mut sessions = self.sessions.write().await;

        if sessions.contains_key(&session.session_id) {
            return Err(SessionError::DuplicateSession);
        }

        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> SessionResult<Option<Session>> {
        Ok(self.sessions.read().await.get(session_id).cloned())
    }

    async fn touch(&self, session_id: &str, now: DateTime<Utc>) -> SessionResult<Option<Session>> {
        let mut sessions = self.sessions.write().await;

        Ok(sessions.get_mut(session_id).map(|session| {
            session.last_seen_at = session.last_seen_at.max(now);
            session.clone()
        }))
    }

    async fn replace_tokens(
        &self,
        session_id: &str,
        access_token: AccessToken,
        refresh_token: Option<String>,
    ) -> SessionResult<Option<Session>> {
        let mut sessions = self.sessions.write().await;

        Ok(sessions.get_mut(session_id).map(|session| {
            session.access_token = access_token;
            if refresh_token.is_some() {
                session.refresh_token = refresh_token;
            }
            session.clone()
        }))
    }

    async fn remove(&self, session_id: &str) -> SessionResult<Option<Session>> {
        Ok(self.sessions.write().await.remove(session_id))
    }

    async fn remove_idle(&self, cutoff: DateTime<Utc>) -> SessionResult<usize> {
        let mut sessions = self.sessions.write().await;

        let before = sessions.len();
        sessions.retain(|_, session| session.last_seen_at >= cutoff);
        Ok(before - sessions.len())
    }
}

/// Creates, resolves and terminates sessions on top of an injected store.
///
/// A session that was invalidated or went idle is gone for good: later calls
/// with its id behave as if it never existed.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session for a validated identity.
    pub async fn create(
        &self,
        claims: IdentityClaims,
        access_token: AccessToken,
        refresh_token: Option<String>,
    ) -> SessionResult<Session> {
        let now = Utc::now();
        let session = Session {
            session_id: generate_opaque_token(),
            claims,
            access_token,
            refresh_token,
            created_at: now,
            last_seen_at: now,
        };

        self.store.insert(session.clone()).await?;

        info!("Created session for subject {}", session.claims.subject);
        Ok(session)
    }

    pub async fn resolve(&self, session_id: &str) -> SessionResult<Session> {
        let session = self
            .store
            .get(session_id)
            .await?
            .ok_or(SessionError::SessionNotFound)?;

        if session.is_idle(Utc::now(), self.config.idle_timeout()) {
            debug!("Session for subject {} went idle", session.claims.subject);
            self.store.remove(session_id).await?;
            return Err(SessionError::SessionNotFound);
        }

        Ok(session)
    }

    /// Mark the session as used now.
    pub async fn touch(&self, session_id: &str) -> SessionResult<Session> {
        self.resolve(session_id).await?;

        self.store
            .touch(session_id, Utc::now())
            .await?
            .ok_or(SessionError::SessionNotFound)
    }

    /// Store tokens obtained from a refresh grant.
    pub async fn rotate_tokens(
        &self,
        session_id: &str,
        tokens: RefreshedTokens,
    ) -> SessionResult<Session> {
        self.resolve(session_id).await?;

        let session = self
            .store
            .replace_tokens(session_id, tokens.access_token, tokens.refresh_token)
            .await?
            .ok_or(SessionError::SessionNotFound)?;

        debug!("Rotated tokens for subject {}", session.claims.subject);
        Ok(session)
    }

    /// End the session. Invalidating an unknown session is not an error.
    pub async fn invalidate(&self, session_id: &str) -> SessionResult<()> {
        if let Some(session) = self.store.remove(session_id).await? {
            info!("Invalidated session for subject {}", session.claims.subject);
        }
        Ok(())
    }

    pub async fn sweep_expired(&self) -> SessionResult<usize> {
        let cutoff = Utc::now() - self.config.idle_timeout();
        let removed = self.store.remove_idle(cutoff).await?;

        if removed > 0 {
            debug!("Swept {} idle sessions", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_identity_core::Audience;
    use std::collections::HashSet;

    fn claims() -> IdentityClaims {
        IdentityClaims {
            subject: "subject-42".to_string(),
            issuer: "https://login.example.com/tenant/v2.0".to_string(),
            audience: Audience::One("client-123".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
            issued_at: Utc::now(),
            nonce: "nonce-1".to_string(),
            display_name: Some("Ada Lovelace".to_string()),
            preferred_username: Some("ada@example.com".to_string()),
            email: None,
            additional_claims: HashMap::new(),
        }
    }

    fn access_token() -> AccessToken {
        AccessToken::new("at-1", Some(3600), Utc::now())
    }

    fn manager(store: Arc<InMemorySessionStore>) -> SessionManager {
        SessionManager::new(store, SessionConfig::default())
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let store = Arc::new(InMemorySessionStore::new());
        let sessions = manager(store.clone());

        let session = sessions
            .create(claims(), access_token(), Some("rt-1".to_string()))
            .await
            .unwrap();

        let resolved = sessions.resolve(&session.session_id).await.unwrap();
        assert_eq!(resolved.claims, session.claims);
        assert_eq!(resolved.refresh_token.as_deref(), Some("rt-1"));

        sessions.invalidate(&session.session_id).await.unwrap();
        assert!(matches!(
            sessions.resolve(&session.session_id).await,
            Err(SessionError::SessionNotFound)
        ));

        // Idempotent
        sessions.invalidate(&session.session_id).await.unwrap();
        assert!(store.is_empty().await);

        // Terminated is absorbing
        assert!(matches!(
            sessions.touch(&session.session_id).await,
            Err(SessionError::SessionNotFound)
        ));
    }

    #[tokio::test]
    async fn test_touch_is_monotonic_and_preserves_identity() {
        let sessions = manager(Arc::new(InMemorySessionStore::new()));
        let session = sessions.create(claims(), access_token(), None).await.unwrap();

        let mut last_seen = session.last_seen_at;
        for _ in 0..5 {
            let touched = sessions.touch(&session.session_id).await.unwrap();
            assert!(touched.last_seen_at >= last_seen);
            assert_eq!(touched.session_id, session.session_id);
            assert_eq!(touched.claims, session.claims);
            assert_eq!(touched.created_at, session.created_at);
            last_seen = touched.last_seen_at;
        }
    }

    #[tokio::test]
    async fn test_store_touch_never_moves_backwards() {
        let store = InMemorySessionStore::new();
        let now = Utc::now();
        store
            .insert(Session {
                session_id: "s-1".to_string(),
                claims: claims(),
                access_token: access_token(),
                refresh_token: None,
                created_at: now,
                last_seen_at: now,
            })
            .await
            .unwrap();

        let touched = store
            .touch("s-1", now - Duration::minutes(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(touched.last_seen_at, now);
    }

    #[tokio::test]
    async fn test_idle_session_is_not_found() {
        let store = Arc::new(InMemorySessionStore::new());
        let sessions =
            SessionManager::new(store.clone(), SessionConfig::default().with_idle_timeout(60));

        let now = Utc::now();
        store
            .insert(Session {
                session_id: "stale".to_string(),
                claims: claims(),
                access_token: access_token(),
                refresh_token: None,
                created_at: now - Duration::hours(2),
                last_seen_at: now - Duration::minutes(5),
            })
            .await
            .unwrap();

        assert!(matches!(
            sessions.resolve("stale").await,
            Err(SessionError::SessionNotFound)
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_idle_sessions() {
        let store = Arc::new(InMemorySessionStore::new());
        let sessions =
            SessionManager::new(store.clone(), SessionConfig::default().with_idle_timeout(60));

        let live = sessions.create(claims(), access_token(), None).await.unwrap();
        let now = Utc::now();
        store
            .insert(Session {
                session_id: "stale".to_string(),
                claims: claims(),
                access_token: access_token(),
                refresh_token: None,
                created_at: now - Duration::hours(2),
                last_seen_at: now - Duration::hours(1),
            })
            .await
            .unwrap();

        assert_eq!(sessions.sweep_expired().await.unwrap(), 1);
        assert!(sessions.resolve(&live.session_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotate_tokens_keeps_refresh_token_when_not_reissued() {
        let sessions = manager(Arc::new(InMemorySessionStore::new()));
        let session = sessions
            .create(claims(), access_token(), Some("rt-1".to_string()))
            .await
            .unwrap();

        let rotated = sessions
            .rotate_tokens(
                &session.session_id,
                RefreshedTokens {
                    access_token: AccessToken::new("at-2", Some(3600), Utc::now()),
                    refresh_token: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(rotated.access_token.secret, "at-2");
        assert_eq!(rotated.refresh_token.as_deref(), Some("rt-1"));
        assert_eq!(rotated.created_at, session.created_at);
    }

    #[tokio::test]
    async fn test_session_ids_are_unique() {
        let sessions = manager(Arc::new(InMemorySessionStore::new()));
        let mut ids = HashSet::new();

        for _ in 0..1000 {
            let session = sessions.create(claims(), access_token(), None).await.unwrap();
            assert!(ids.insert(session.session_id));
        }
    }

    #[tokio::test]
    async fn test_concurrent_invalidate() {
        let sessions = manager(Arc::new(InMemorySessionStore::new()));
        let session = sessions.create(claims(), access_token(), None).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let sessions = sessions.clone();
            let session_id = session.session_id.clone();
            handles.push(tokio::spawn(async move { sessions.invalidate(&session_id).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert!(sessions.resolve(&session.session_id).await.is_err());
    }
}
