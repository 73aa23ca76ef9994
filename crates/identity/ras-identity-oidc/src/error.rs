//! OIDC error types.

use thiserror::Error;

pub type OidcResult<T> = Result<T, OidcError>;

#[derive(Debug, Error)]
pub enum OidcError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Pending flow not found or expired")]
    FlowNotFound,

    #[error("Flow id already in use")]
    DuplicateFlow,

    #[error("Token exchange failed: {0}")]
    ExchangeFailed(#[from] ExchangeError),

    #[error("Identity token rejected: {0}")]
    InvalidIdToken(#[from] ValidationError),

    #[error("Resource API call failed: {0}")]
    ResourceApiFailed(#[from] ApiError),

    #[error("Signing keys unavailable: {0}")]
    SigningKeysUnavailable(String),

    #[error("Provider discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),
}

impl OidcError {
    /// Stable, non-sensitive reason code suitable for returning to clients.
    pub fn code(&self) -> &'static str {
        match self {
            OidcError::ConfigError(_) | OidcError::UrlError(_) => "configuration_error",
            OidcError::FlowNotFound | OidcError::DuplicateFlow => "flow_not_found",
            OidcError::ExchangeFailed(_) => "exchange_failed",
            OidcError::InvalidIdToken(e) => e.code(),
            OidcError::ResourceApiFailed(e) => e.code(),
            OidcError::SigningKeysUnavailable(_) => "signing_keys_unavailable",
            OidcError::DiscoveryFailed(_) => "discovery_failed",
        }
    }
}

/// Why the authorization code could not be exchanged.
///
/// Authorization codes are single use, so none of these are retried.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(
        "token endpoint returned HTTP {status} ({})",
        .error.as_deref().unwrap_or("no error code")
    )]
    Rejected { status: u16, error: Option<String> },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),

    #[error("network failure: {0}")]
    Network(String),
}

/// Identity token trust check that failed, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("token is not a well-formed JWT")]
    Malformed,

    #[error("signature does not verify against any trusted key")]
    BadSignature,

    #[error("issuer does not match")]
    IssuerMismatch,

    #[error("audience does not include this client")]
    AudienceMismatch,

    #[error("token has expired")]
    Expired,

    #[error("token was issued in the future")]
    NotYetValid,

    #[error("nonce does not match the pending flow")]
    NonceMismatch,
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed => "validation_failed.malformed",
            ValidationError::BadSignature => "validation_failed.bad_signature",
            ValidationError::IssuerMismatch => "validation_failed.issuer_mismatch",
            ValidationError::AudienceMismatch => "validation_failed.audience_mismatch",
            ValidationError::Expired => "validation_failed.expired",
            ValidationError::NotYetValid => "validation_failed.not_yet_valid",
            ValidationError::NonceMismatch => "validation_failed.nonce_mismatch",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("no access token available")]
    MissingToken,

    #[error("access token expired")]
    TokenExpired,

    #[error("network failure: {0}")]
    Network(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingToken => "api_error.missing_token",
            ApiError::TokenExpired => "api_error.token_expired",
            ApiError::Network(_) => "api_error.network",
        }
    }

    /// Whether the caller should send the user through login again.
    pub fn requires_login(&self) -> bool {
        matches!(self, ApiError::MissingToken | ApiError::TokenExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(OidcError::FlowNotFound.code(), "flow_not_found");
        assert_eq!(
            OidcError::from(ValidationError::NonceMismatch).code(),
            "validation_failed.nonce_mismatch"
        );
        assert_eq!(
            OidcError::from(ExchangeError::Network("timeout".to_string())).code(),
            "exchange_failed"
        );
        assert_eq!(
            OidcError::from(ApiError::TokenExpired).code(),
            "api_error.token_expired"
        );
    }

    #[test]
    fn test_rejected_exchange_message_omits_provider_description() {
        let err = ExchangeError::Rejected {
            status: 400,
            error: Some("invalid_grant".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "token endpoint returned HTTP 400 (invalid_grant)"
        );
    }
}
