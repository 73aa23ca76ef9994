//! OIDC configuration types.

use crate::error::{OidcError, OidcResult};
use crate::types::ProviderMetadata;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use url::Url;

/// Scope that must be part of every request, since we always need an `id_token`.
pub const OPENID_SCOPE: &str = "openid";

/// Confidential client credentials sent to the token endpoint.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Everything needed to talk to one OpenID provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub client_id: String,
    pub client_secret: String,
    /// Expected `iss` of identity tokens.
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub end_session_endpoint: Option<String>,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Extra parameters appended to the authorization request (e.g. `prompt`)
    #[serde(default)]
    pub auth_params: BTreeMap<String, String>,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_id", &self.provider_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("jwks_uri", &self.jwks_uri)
            .field("end_session_endpoint", &self.end_session_endpoint)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl ProviderConfig {
    /// Build a provider config from a discovery document.
    pub fn from_metadata(
        provider_id: impl Into<String>,
        metadata: ProviderMetadata,
        credentials: ClientCredentials,
        redirect_uri: impl Into<String>,
        scopes: Vec<String>,
    ) -> OidcResult<Self> {
        let issuer = metadata.issuer.ok_or_else(|| {
            OidcError::ConfigError("Discovery document has no issuer".to_string())
        })?;
        let jwks_uri = metadata.jwks_uri.ok_or_else(|| {
            OidcError::ConfigError("Discovery document has no jwks_uri".to_string())
        })?;

        let config = Self {
            provider_id: provider_id.into(),
            client_id: credentials.client_id,
            client_secret: credentials.client_secret,
            issuer,
            authorization_endpoint: metadata.authorization_endpoint,
            token_endpoint: metadata.token_endpoint,
            jwks_uri,
            end_session_endpoint: metadata.end_session_endpoint,
            redirect_uri: redirect_uri.into(),
            scopes,
            auth_params: BTreeMap::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on anything that would break every login attempt.
    pub fn validate(&self) -> OidcResult<()> {
        if self.client_id.trim().is_empty() {
            return Err(OidcError::ConfigError("client_id is empty".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(OidcError::ConfigError(
                "client_secret is empty; a confidential client secret must be supplied"
                    .to_string(),
            ));
        }
        if self.issuer.trim().is_empty() {
            return Err(OidcError::ConfigError("issuer is empty".to_string()));
        }

        parse_absolute_url("authorization_endpoint", &self.authorization_endpoint)?;
        parse_absolute_url("token_endpoint", &self.token_endpoint)?;
        parse_absolute_url("jwks_uri", &self.jwks_uri)?;
        parse_absolute_url("redirect_uri", &self.redirect_uri)?;
        if let Some(endpoint) = &self.end_session_endpoint {
            parse_absolute_url("end_session_endpoint", endpoint)?;
        }

        Ok(())
    }

    pub fn credentials(&self) -> ClientCredentials {
        ClientCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
        }
    }

    /// Configured scopes plus `openid`, deduplicated and ordered.
    pub fn requested_scopes(&self) -> BTreeSet<String> {
        let mut scopes: BTreeSet<String> = self
            .scopes
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        scopes.insert(OPENID_SCOPE.to_string());
        scopes
    }
}

/// Timeouts and lifetimes for the OIDC client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    pub flow_ttl_seconds: u64,
    pub http_timeout_seconds: u64,
    /// Tolerance applied to `exp` and `iat`
    pub clock_skew_seconds: u64,
    /// How long a fetched key set is trusted before a background refresh
    pub jwks_refresh_seconds: u64,
    /// Lower bound between refreshes triggered by an unknown key id
    pub jwks_min_refresh_interval_seconds: u64,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            flow_ttl_seconds: 600, // 10 minutes
            http_timeout_seconds: 10,
            clock_skew_seconds: 300,
            jwks_refresh_seconds: 3600,
            jwks_min_refresh_interval_seconds: 30,
        }
    }
}

impl OidcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flow_ttl(mut self, seconds: u64) -> Self {
        self.flow_ttl_seconds = seconds;
        self
    }

    pub fn with_http_timeout(mut self, seconds: u64) -> Self {
        self.http_timeout_seconds = seconds;
        self
    }

    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew_seconds = seconds;
        self
    }

    pub fn with_jwks_refresh(mut self, seconds: u64) -> Self {
        self.jwks_refresh_seconds = seconds;
        self
    }

    pub fn with_jwks_min_refresh_interval(mut self, seconds: u64) -> Self {
        self.jwks_min_refresh_interval_seconds = seconds;
        self
    }
}

/// Longest lifetime accepted from configuration or a provider (100 years).
pub(crate) const MAX_LIFETIME_SECS: u64 = 100 * 365 * 24 * 3600;

/// Convert seconds to a chrono duration, capped at [`MAX_LIFETIME_SECS`].
pub(crate) fn duration_from_secs(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_LIFETIME_SECS) as i64)
}

/// Parse a URL that must be absolute with an http(s) scheme and a host.
pub(crate) fn parse_absolute_url(name: &str, value: &str) -> OidcResult<Url> {
    if value.trim().is_empty() {
        return Err(OidcError::ConfigError(format!("{} is empty", name)));
    }

    let url = Url::parse(value)
        .map_err(|e| OidcError::ConfigError(format!("{} is not an absolute URL: {}", name, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(OidcError::ConfigError(format!(
            "{} must be an http(s) URL with a host",
            name
        )));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_config() -> ProviderConfig {
        ProviderConfig {
            provider_id: "entra".to_string(),
            client_id: "client-123".to_string(),
            client_secret: "secret-xyz".to_string(),
            issuer: "https://login.example.com/tenant/v2.0".to_string(),
            authorization_endpoint: "https://login.example.com/authorize".to_string(),
            token_endpoint: "https://login.example.com/token".to_string(),
            jwks_uri: "https://login.example.com/keys".to_string(),
            end_session_endpoint: None,
            redirect_uri: "http://localhost:5000/getAToken".to_string(),
            scopes: vec!["User.Read".to_string(), "profile".to_string()],
            auth_params: BTreeMap::new(),
        }
    }

    #[test]
    fn test_valid_provider_config() {
        assert!(provider_config().validate().is_ok());
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        let mut config = provider_config();
        config.client_secret = String::new();
        assert!(matches!(config.validate(), Err(OidcError::ConfigError(_))));
    }

    #[test]
    fn test_relative_redirect_uri_is_rejected() {
        let mut config = provider_config();
        config.redirect_uri = "/getAToken".to_string();
        assert!(matches!(config.validate(), Err(OidcError::ConfigError(_))));

        config.redirect_uri = "ftp://localhost/getAToken".to_string();
        assert!(matches!(config.validate(), Err(OidcError::ConfigError(_))));
    }

    #[test]
    fn test_requested_scopes_always_include_openid() {
        let scopes = provider_config().requested_scopes();
        let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
        assert_eq!(scopes, vec!["User.Read", "openid", "profile"]);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", provider_config());
        assert!(!rendered.contains("secret-xyz"));
        assert!(format!("{:?}", provider_config().credentials()).contains("<redacted>"));
    }

    #[test]
    fn test_oidc_config_builder() {
        let config = OidcConfig::new().with_flow_ttl(60).with_http_timeout(5);
        assert_eq!(config.flow_ttl_seconds, 60);
        assert_eq!(config.http_timeout_seconds, 5);
        assert_eq!(config.clock_skew_seconds, 300);
    }
}
