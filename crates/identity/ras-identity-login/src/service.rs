//! Login orchestration over the OIDC and session crates.

use crate::error::{LoginError, LoginResult};
use ras_identity_oidc::{
    ApiError, AuthorizationRequestBuilder, AuthorizationResponse, FlowStateStore, IdTokenValidator,
    InMemoryFlowStore, OidcConfig, OidcResult, ProviderConfig, ResourceResponse, SigningKeyCache,
    TokenExchangeClient, build_logout_url, token_key_id,
};
use ras_identity_session::{InMemorySessionStore, Session, SessionConfig, SessionManager};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

/// Where to send the browser to start signing in.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Goes into the flow cookie; nothing else about the flow leaves the server
    pub flow_id: String,
    pub authorization_url: Url,
}

pub struct LoginService {
    provider: ProviderConfig,
    flows: Arc<dyn FlowStateStore>,
    sessions: SessionManager,
    client: TokenExchangeClient,
    signing_keys: SigningKeyCache,
    validator: IdTokenValidator,
    authorization: AuthorizationRequestBuilder,
}

impl LoginService {
    pub fn new(
        provider: ProviderConfig,
        oidc_config: &OidcConfig,
        flows: Arc<dyn FlowStateStore>,
        sessions: SessionManager,
    ) -> OidcResult<Self> {
        provider.validate()?;

        let client = TokenExchangeClient::new(oidc_config.http_timeout_seconds)?;
        let signing_keys =
            SigningKeyCache::new(client.http_client().clone(), &provider.jwks_uri, oidc_config)?;
        let validator = IdTokenValidator::new(&provider.issuer, &provider.client_id)
            .with_leeway(oidc_config.clock_skew_seconds);
        let authorization =
            AuthorizationRequestBuilder::new(&provider.client_id, &provider.authorization_endpoint)
                .with_extra_params(provider.auth_params.clone());

        Ok(Self {
            provider,
            flows,
            sessions,
            client,
            signing_keys,
            validator,
            authorization,
        })
    }

    /// Service backed by the in-memory flow and session stores
    pub fn in_memory(
        provider: ProviderConfig,
        oidc_config: &OidcConfig,
        session_config: SessionConfig,
    ) -> OidcResult<Self> {
        let flows = Arc::new(InMemoryFlowStore::new(oidc_config.flow_ttl_seconds));
        let sessions = SessionManager::new(Arc::new(InMemorySessionStore::new()), session_config);
        Self::new(provider, oidc_config, flows, sessions)
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn flow_ttl_seconds(&self) -> u64 {
        u64::try_from(self.flows.flow_ttl().num_seconds()).unwrap_or(0)
    }

    pub async fn start_login(&self) -> LoginResult<LoginRedirect> {
        let scopes = self.provider.requested_scopes();
        let flow = self.flows.create(scopes, &self.provider.redirect_uri).await?;
        let authorization_url = self.authorization.build(&flow, &flow.requested_scopes)?;

        info!("Starting login flow {}", flow.flow_id);
        Ok(LoginRedirect {
            flow_id: flow.flow_id,
            authorization_url,
        })
    }

    /// Finish a login from the provider's callback.
    ///
    /// The pending flow is consumed before anything else, so a callback can
    /// never be replayed, even one carrying an `error`.
    pub async fn complete_login(
        &self,
        flow_id: Option<&str>,
        params: AuthorizationResponse,
    ) -> LoginResult<Session> {
        let flow_id = flow_id.ok_or(LoginError::FlowNotFound)?;
        let flow = self.flows.consume(flow_id).await?;

        if params.state.as_deref() != Some(flow.state.as_str()) {
            warn!("Callback state does not match pending flow {}", flow.flow_id);
            return Err(LoginError::FlowNotFound);
        }

        if let Some(provider_error) = params.error {
            warn!(
                "Provider returned {} for flow {}: {}",
                provider_error,
                flow.flow_id,
                params.error_description.as_deref().unwrap_or("no description")
            );
            return Err(LoginError::ProviderError {
                error: provider_error,
            });
        }

        let code = params
            .code
            .filter(|code| !code.is_empty())
            .ok_or(LoginError::MissingCode)?;

        let tokens = self
            .client
            .exchange_code(
                &code,
                &flow,
                &self.provider.token_endpoint,
                &self.provider.credentials(),
            )
            .await
            .map_err(|e| {
                error!("Token exchange failed for flow {}: {}", flow.flow_id, e);
                LoginError::Oidc(e.into())
            })?;

        let kid = token_key_id(&tokens.id_token).map_err(|e| {
            warn!("Identity token rejected: {}", e.code());
            LoginError::Oidc(e.into())
        })?;
        let keys = self.signing_keys.signing_keys(kid.as_deref()).await?;

        let claims = self
            .validator
            .validate(&tokens.id_token, &flow, &keys)
            .map_err(|e| {
                warn!("Identity token rejected for flow {}: {}", flow.flow_id, e.code());
                LoginError::Oidc(e.into())
            })?;

        let session = self
            .sessions
            .create(claims, tokens.access_token, tokens.refresh_token)
            .await?;

        info!("Login flow {} completed", flow.flow_id);
        Ok(session)
    }

    /// Resolve the session and mark it as used
    pub async fn current_session(&self, session_id: Option<&str>) -> LoginResult<Session> {
        let session_id = session_id.ok_or(LoginError::NotAuthenticated)?;
        Ok(self.sessions.touch(session_id).await?)
    }

    /// Call a protected resource on the signed-in user's behalf.
    ///
    /// An expired access token is refreshed first when the session holds a
    /// refresh token; the upstream response is returned unchanged.
    pub async fn call_resource_api(
        &self,
        session_id: Option<&str>,
        endpoint: &str,
    ) -> LoginResult<ResourceResponse> {
        let mut session = self.current_session(session_id).await?;

        if session.access_token.is_expired() {
            session = self.refresh_session_tokens(session).await?;
        }

        Ok(self
            .client
            .call_resource_api(Some(&session.access_token), endpoint)
            .await?)
    }

    async fn refresh_session_tokens(&self, session: Session) -> LoginResult<Session> {
        let Some(refresh_token) = session.refresh_token.as_deref() else {
            return Err(ApiError::TokenExpired.into());
        };

        let refreshed = self
            .client
            .refresh_tokens(
                refresh_token,
                &self.provider.token_endpoint,
                &self.provider.credentials(),
            )
            .await
            .map_err(|e| {
                warn!("Access token refresh failed: {}", e);
                LoginError::from(ApiError::TokenExpired)
            })?;

        debug!("Refreshed access token for subject {}", session.claims.subject);
        Ok(self
            .sessions
            .rotate_tokens(&session.session_id, refreshed)
            .await?)
    }

    /// End the local session and return the provider's sign-out URL, if any.
    pub async fn logout(&self, session_id: Option<&str>) -> LoginResult<Option<Url>> {
        if let Some(session_id) = session_id {
            self.sessions.invalidate(session_id).await?;
        }

        let Some(end_session_endpoint) = &self.provider.end_session_endpoint else {
            return Ok(None);
        };

        let landing = self.post_logout_redirect_uri()?;
        Ok(Some(build_logout_url(end_session_endpoint, landing.as_str())?))
    }

    /// The site root of the redirect URI
    fn post_logout_redirect_uri(&self) -> LoginResult<Url> {
        let redirect = Url::parse(&self.provider.redirect_uri)
            .map_err(|e| LoginError::Oidc(e.into()))?;
        redirect.join("/").map_err(|e| LoginError::Oidc(e.into()))
    }

    /// Drop expired flows and idle sessions.
    pub async fn sweep(&self) -> LoginResult<(usize, usize)> {
        let flows = self.flows.sweep_expired().await?;
        let sessions = self.sessions.sweep_expired().await?;
        Ok((flows, sessions))
    }
}
