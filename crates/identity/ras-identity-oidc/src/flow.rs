//! Pending login flows, held server-side between the redirect and the callback.

use crate::config::duration_from_secs;
use crate::error::{OidcError, OidcResult};
use crate::pkce::code_challenge_s256;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ras_identity_core::generate_opaque_token;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// State of one in-flight login attempt.
///
/// Only `flow_id` ever reaches the browser; everything else stays here.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingFlow {
    pub flow_id: String,
    pub state: String,
    pub code_verifier: String,
    pub nonce: String,
    pub requested_scopes: BTreeSet<String>,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingFlow {
    /// Generate fresh identifiers, `state`, `nonce` and PKCE verifier.
    pub fn generate(
        requested_scopes: BTreeSet<String>,
        redirect_uri: String,
        ttl: Duration,
    ) -> Self {
        let created_at = Utc::now();

        Self {
            flow_id: generate_opaque_token(),
            state: generate_opaque_token(),
            code_verifier: generate_opaque_token(),
            nonce: generate_opaque_token(),
            requested_scopes,
            redirect_uri,
            created_at,
            expires_at: created_at + ttl,
        }
    }

    pub fn code_challenge(&self) -> String {
        code_challenge_s256(&self.code_verifier)
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

impl fmt::Debug for PendingFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFlow")
            .field("flow_id", &self.flow_id)
            .field("requested_scopes", &self.requested_scopes)
            .field("redirect_uri", &self.redirect_uri)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Storage for pending flows.
///
/// Implementations must make `consume` atomic: two concurrent calls with the
/// same flow id yield at most one flow.
#[async_trait]
pub trait FlowStateStore: Send + Sync {
    /// Lifetime given to newly created flows
    fn flow_ttl(&self) -> Duration;

    /// Store a flow; fails if the flow id is already taken
    async fn insert(&self, flow: PendingFlow) -> OidcResult<()>;

    /// Retrieve and remove a flow by id
    async fn consume(&self, flow_id: &str) -> OidcResult<PendingFlow>;

    /// Remove expired flows, returning how many were dropped
    async fn sweep_expired(&self) -> OidcResult<usize>;

    /// Create and store a new flow for the given scopes and redirect URI
    async fn create(
        &self,
        requested_scopes: BTreeSet<String>,
        redirect_uri: &str,
    ) -> OidcResult<PendingFlow> {
        let flow =
            PendingFlow::generate(requested_scopes, redirect_uri.to_string(), self.flow_ttl());
        self.insert(flow.clone()).await?;
        debug!("Created pending flow {}", flow.flow_id);
        Ok(flow)
    }
}

/// In-memory implementation of FlowStateStore
pub struct InMemoryFlowStore {
    flows: Arc<RwLock<HashMap<String, PendingFlow>>>,
    ttl: Duration,
}

impl InMemoryFlowStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            flows: Arc::new(RwLock::new(HashMap::new())),
            ttl: duration_from_secs(ttl_seconds),
        }
    }

    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.flows.read().await.is_empty()
    }
}

impl Default for InMemoryFlowStore {
    fn default() -> Self {
        Self::new(600)
    }
}

#[async_trait]
impl FlowStateStore for InMemoryFlowStore {
    fn flow_ttl(&self) -> Duration {
        self.ttl
    }

    async fn insert(&self, flow: PendingFlow) -> OidcResult<()> {
        let mut flows = self.flows.write().await;

        if flows.contains_key(&flow.flow_id) {
            return Err(OidcError::DuplicateFlow);
        }

        flows.insert(flow.flow_id.clone(), flow);
        Ok(())
    }

    async fn consume(&self, flow_id: &str) -> OidcResult<PendingFlow> {
        let mut flows = self.flows.write().await;

        // Remove first so an expired or replayed flow can never be read twice
        let flow = flows.remove(flow_id).ok_or(OidcError::FlowNotFound)?;

        if flow.is_expired() {
            debug!("Pending flow {} expired before callback", flow_id);
            return Err(OidcError::FlowNotFound);
        }

        Ok(flow)
    }

    async fn sweep_expired(&self) -> OidcResult<usize> {
        let mut flows = self.flows.write().await;
        let now = Utc::now();

        let before = flows.len();
        flows.retain(|_, flow| now <= flow.expires_at);
        let removed = before - flows.len();

        if removed > 0 {
            debug!("Swept {} expired pending flows", removed);
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn scopes() -> BTreeSet<String> {
        ["openid", "profile"].into_iter().map(String::from).collect()
    }

    #[tokio::test]
    async fn test_in_memory_flow_store() {
        let store = InMemoryFlowStore::new(300);

        let flow = store
            .create(scopes(), "http://localhost:5000/callback")
            .await
            .unwrap();

        assert_eq!(flow.redirect_uri, "http://localhost:5000/callback");
        assert_eq!(flow.expires_at - flow.created_at, Duration::seconds(300));

        let consumed = store.consume(&flow.flow_id).await.unwrap();
        assert_eq!(consumed, flow);

        // Read-once: a second consume must fail
        let result = store.consume(&flow.flow_id).await;
        assert!(matches!(result, Err(OidcError::FlowNotFound)));
    }

    #[tokio::test]
    async fn test_generated_values_are_unique() {
        let store = InMemoryFlowStore::new(600);
        let mut states = HashSet::new();
        let mut nonces = HashSet::new();
        let mut verifiers = HashSet::new();
        let mut flow_ids = Vec::new();

        for _ in 0..10_000 {
            let flow = store
                .create(scopes(), "http://localhost:5000/callback")
                .await
                .unwrap();
            assert!(states.insert(flow.state.clone()));
            assert!(nonces.insert(flow.nonce.clone()));
            assert!(verifiers.insert(flow.code_verifier.clone()));
            flow_ids.push(flow.flow_id);
        }

        assert_eq!(store.len().await, 10_000);

        for flow_id in &flow_ids {
            assert!(store.consume(flow_id).await.is_ok());
            assert!(matches!(
                store.consume(flow_id).await,
                Err(OidcError::FlowNotFound)
            ));
        }
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_flow_is_not_consumable() {
        let store = InMemoryFlowStore::new(600);

        let mut flow = PendingFlow::generate(
            scopes(),
            "http://localhost:5000/callback".to_string(),
            Duration::minutes(10),
        );
        flow.expires_at = Utc::now() - Duration::seconds(1);
        store.insert(flow.clone()).await.unwrap();

        let result = store.consume(&flow.flow_id).await;
        assert!(matches!(result, Err(OidcError::FlowNotFound)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_expired_flow_cleanup() {
        let store = InMemoryFlowStore::new(600);

        let mut stale = PendingFlow::generate(
            scopes(),
            "http://localhost:5000/callback".to_string(),
            Duration::minutes(10),
        );
        stale.expires_at = Utc::now() - Duration::minutes(1);
        store.insert(stale.clone()).await.unwrap();

        let live = store
            .create(scopes(), "http://localhost:5000/callback")
            .await
            .unwrap();

        let cleaned = store.sweep_expired().await.unwrap();
        assert_eq!(cleaned, 1);
        assert_eq!(store.len().await, 1);
        assert!(store.consume(&live.flow_id).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_flow_id_is_rejected() {
        let store = InMemoryFlowStore::new(600);
        let flow = PendingFlow::generate(
            scopes(),
            "http://localhost:5000/callback".to_string(),
            Duration::minutes(10),
        );

        store.insert(flow.clone()).await.unwrap();
        assert!(matches!(
            store.insert(flow).await,
            Err(OidcError::DuplicateFlow)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_consume_yields_one_winner() {
        let store = Arc::new(InMemoryFlowStore::new(600));
        let flow = store
            .create(scopes(), "http://localhost:5000/callback")
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let flow_id = flow.flow_id.clone();
            handles.push(tokio::spawn(
                async move { store.consume(&flow_id).await.is_ok() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_debug_hides_secrets() {
        let flow = PendingFlow::generate(
            scopes(),
            "http://localhost:5000/callback".to_string(),
            Duration::minutes(10),
        );
        let rendered = format!("{:?}", flow);
        assert!(!rendered.contains(&flow.code_verifier));
        assert!(!rendered.contains(&flow.nonce));
    }
}
