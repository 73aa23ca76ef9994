//! OIDC protocol types.

use crate::config::{MAX_LIFETIME_SECS, duration_from_secs};
use crate::error::ExchangeError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Lifetime assumed for access tokens when the provider omits `expires_in`.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Query parameters the provider sends to the redirect URI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationResponse {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Raw token endpoint response, as sent on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEndpointResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub id_token: Option<String>,
}

/// Error body of a rejected token request (RFC 6749 section 5.2)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,
    pub error_description: Option<String>,
}

/// Bearer token for resource API calls.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Lifetimes beyond 100 years are capped, and an expiry past the
    /// representable range saturates.
    pub fn new(secret: impl Into<String>, expires_in: Option<u64>, now: DateTime<Utc>) -> Self {
        let lifetime = expires_in
            .map(duration_from_secs)
            .unwrap_or_else(|| Duration::seconds(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS));

        Self {
            secret: secret.into(),
            expires_at: now
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Result of a successful authorization code exchange.
///
/// The identity token is kept raw: its claims only become available through
/// the identity token validator.
#[derive(Clone)]
pub struct TokenResponse {
    pub access_token: AccessToken,
    pub refresh_token: Option<String>,
    pub id_token: String,
    pub granted_scopes: BTreeSet<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &self.access_token)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("granted_scopes", &self.granted_scopes)
            .finish_non_exhaustive()
    }
}

impl TokenEndpointResponse {
    /// Check the response shape and convert it into a [`TokenResponse`].
    ///
    /// When the provider omits `scope`, the granted scopes equal the requested ones.
    pub fn into_token_response(
        self,
        requested_scopes: &BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Result<TokenResponse, ExchangeError> {
        self.check_shape()?;

        let id_token = self
            .id_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ExchangeError::MalformedResponse("missing id_token".to_string()))?;

        let granted_scopes = match self.scope.as_deref() {
            Some(scope) => split_scopes(scope),
            None => requested_scopes.clone(),
        };

        Ok(TokenResponse {
            access_token: AccessToken::new(self.access_token, self.expires_in, now),
            refresh_token: self.refresh_token,
            id_token,
            granted_scopes,
        })
    }

    /// Convert a refresh grant response, which may legitimately omit `id_token`.
    pub fn into_refreshed_tokens(
        self,
        now: DateTime<Utc>,
    ) -> Result<RefreshedTokens, ExchangeError> {
        self.check_shape()?;

        Ok(RefreshedTokens {
            access_token: AccessToken::new(self.access_token, self.expires_in, now),
            refresh_token: self.refresh_token,
        })
    }

    fn check_shape(&self) -> Result<(), ExchangeError> {
        if self.access_token.is_empty() {
            return Err(ExchangeError::MalformedResponse(
                "empty access_token".to_string(),
            ));
        }
        if let Some(expires_in) = self.expires_in {
            if expires_in > MAX_LIFETIME_SECS {
                return Err(ExchangeError::MalformedResponse(format!(
                    "expires_in {} is out of range",
                    expires_in
                )));
            }
        }
        if !self.token_type.eq_ignore_ascii_case("bearer") {
            return Err(ExchangeError::MalformedResponse(format!(
                "unsupported token_type {}",
                self.token_type
            )));
        }
        Ok(())
    }
}

/// Tokens obtained through the `refresh_token` grant
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: AccessToken,
    /// Rotated refresh token, if the provider issued a new one
    pub refresh_token: Option<String>,
}

/// Upstream resource API response, passed through unchanged
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// OpenID provider metadata (`.well-known/openid-configuration`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: Option<String>,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: Option<String>,
    pub end_session_endpoint: Option<String>,
    pub scopes_supported: Option<Vec<String>>,
    pub response_types_supported: Option<Vec<String>>,
    pub grant_types_supported: Option<Vec<String>>,
    pub code_challenge_methods_supported: Option<Vec<String>>,
}

impl ProviderMetadata {
    /// Providers that do not advertise methods are assumed to accept S256.
    pub fn supports_pkce_s256(&self) -> bool {
        self.code_challenge_methods_supported
            .as_ref()
            .is_none_or(|methods| methods.iter().any(|m| m == "S256"))
    }
}

pub(crate) fn split_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(String::from).collect()
}
