//! HTTP client for the provider's token, discovery and resource endpoints.

use crate::config::{ClientCredentials, parse_absolute_url};
use crate::error::{ApiError, ExchangeError, OidcError, OidcResult};
use crate::flow::PendingFlow;
use crate::types::{
    AccessToken, ProviderMetadata, RefreshedTokens, ResourceResponse, TokenEndpointResponse,
    TokenErrorResponse, TokenResponse,
};
use chrono::Utc;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Talks to the provider over HTTPS.
///
/// Requests are never retried: an authorization code is single use and a
/// replayed refresh grant may revoke the token family.
#[derive(Clone)]
pub struct TokenExchangeClient {
    http_client: Client,
}

impl TokenExchangeClient {
    pub fn new(http_timeout_seconds: u64) -> OidcResult<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(http_timeout_seconds))
            .build()
            .map_err(|e| OidcError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// Shared HTTP client, reused for signing key fetches
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The redirect URI sent here is the one recorded in the flow, so it is
    /// byte-identical to the one in the authorization request.
    pub async fn exchange_code(
        &self,
        code: &str,
        flow: &PendingFlow,
        token_endpoint: &str,
        credentials: &ClientCredentials,
    ) -> Result<TokenResponse, ExchangeError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", flow.redirect_uri.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code_verifier", flow.code_verifier.as_str()),
        ];

        let raw = self.post_token_request(token_endpoint, &params).await?;
        let tokens = raw.into_token_response(&flow.requested_scopes, Utc::now())?;

        info!("Successfully exchanged code for tokens for flow {}", flow.flow_id);
        Ok(tokens)
    }

    /// Obtain a fresh access token through the `refresh_token` grant.
    pub async fn refresh_tokens(
        &self,
        refresh_token: &str,
        token_endpoint: &str,
        credentials: &ClientCredentials,
    ) -> Result<RefreshedTokens, ExchangeError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
        ];

        let raw = self.post_token_request(token_endpoint, &params).await?;
        let tokens = raw.into_refreshed_tokens(Utc::now())?;

        debug!("Refreshed access token");
        Ok(tokens)
    }

    async fn post_token_request(
        &self,
        token_endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<TokenEndpointResponse, ExchangeError> {
        let response = self
            .http_client
            .post(token_endpoint)
            .form(params)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            // The body may carry provider diagnostics; it goes to the log only
            warn!("Token endpoint returned HTTP {}: {}", status.as_u16(), error_text);

            let error = serde_json::from_str::<TokenErrorResponse>(&error_text)
                .ok()
                .map(|body| body.error);

            return Err(ExchangeError::Rejected {
                status: status.as_u16(),
                error,
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        serde_json::from_str(&body).map_err(|e| {
            error!("Token endpoint returned an unparseable body");
            ExchangeError::MalformedResponse(e.to_string())
        })
    }

    /// Call a protected resource with the access token as a bearer credential.
    ///
    /// Any upstream status is passed through unchanged.
    pub async fn call_resource_api(
        &self,
        access_token: Option<&AccessToken>,
        endpoint: &str,
    ) -> Result<ResourceResponse, ApiError> {
        let token = access_token
            .filter(|t| !t.secret.is_empty())
            .ok_or(ApiError::MissingToken)?;

        if token.is_expired() {
            return Err(ApiError::TokenExpired);
        }

        let response = self
            .http_client
            .get(endpoint)
            .bearer_auth(&token.secret)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?
            .to_vec();

        debug!("Resource API {} answered HTTP {}", endpoint, status);
        Ok(ResourceResponse {
            status,
            content_type,
            body,
        })
    }

    /// Fetch the provider's discovery document and check it names `issuer`.
    pub async fn discover(&self, issuer: &str) -> OidcResult<ProviderMetadata> {
        let base = issuer.trim_end_matches('/');
        let metadata = self.fetch_metadata(base).await?;

        match metadata.issuer.as_deref() {
            Some(advertised) if advertised.trim_end_matches('/') == base => {}
            advertised => {
                return Err(OidcError::ConfigError(format!(
                    "discovery document issuer {:?} does not match {}",
                    advertised, issuer
                )));
            }
        }

        info!("Discovered OpenID provider {}", issuer);
        Ok(metadata)
    }

    /// Discover a provider through an authority URL whose path need not equal
    /// the issuer, such as an Entra tenant given by domain name.
    ///
    /// The advertised issuer is then trusted as long as it lives on the same
    /// origin as the authority. Templated issuers (multi-tenant endpoints
    /// like `common`) are rejected since no single issuer can be expected.
    pub async fn discover_authority(&self, authority: &str) -> OidcResult<ProviderMetadata> {
        let base = authority.trim_end_matches('/');
        let metadata = self.fetch_metadata(base).await?;

        let advertised = metadata.issuer.as_deref().ok_or_else(|| {
            OidcError::ConfigError("discovery document has no issuer".to_string())
        })?;

        if advertised.contains('{') {
            return Err(OidcError::ConfigError(format!(
                "authority {} is multi-tenant (issuer {}); configure a single tenant",
                authority, advertised
            )));
        }

        let authority_url = parse_absolute_url("authority", base)?;
        let issuer_url = parse_absolute_url("issuer", advertised)?;
        if authority_url.origin() != issuer_url.origin() {
            return Err(OidcError::ConfigError(format!(
                "discovery document issuer {} is not served by {}",
                advertised, authority
            )));
        }

        info!("Discovered OpenID provider {} via {}", advertised, authority);
        Ok(metadata)
    }

    async fn fetch_metadata(&self, base: &str) -> OidcResult<ProviderMetadata> {
        let discovery_url = format!("{}{}", base, DISCOVERY_PATH);
        parse_absolute_url("issuer", &discovery_url)?;

        let response = self
            .http_client
            .get(&discovery_url)
            .send()
            .await
            .map_err(|e| OidcError::DiscoveryFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OidcError::DiscoveryFailed(format!(
                "{} returned HTTP {}",
                discovery_url,
                response.status().as_u16()
            )));
        }

        let metadata: ProviderMetadata = response.json().await.map_err(|e| {
            OidcError::DiscoveryFailed(format!("invalid discovery document: {}", e))
        })?;

        if !metadata.supports_pkce_s256() {
            return Err(OidcError::DiscoveryFailed(
                "provider does not support S256 code challenges".to_string(),
            ));
        }

        Ok(metadata)
    }
}
