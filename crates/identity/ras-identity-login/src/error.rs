//! Login errors and their HTTP mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use ras_identity_oidc::{ApiError, OidcError};
use ras_identity_session::SessionError;
use thiserror::Error;

pub type LoginResult<T> = Result<T, LoginError>;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Pending login not found or expired")]
    FlowNotFound,

    /// The provider sent `error` to the callback; the description is logged only
    #[error("Provider returned error: {error}")]
    ProviderError { error: String },

    #[error("Authorization response has no code")]
    MissingCode,

    #[error("Not signed in")]
    NotAuthenticated,

    #[error(transparent)]
    Oidc(OidcError),

    #[error(transparent)]
    Session(SessionError),
}

impl From<OidcError> for LoginError {
    fn from(err: OidcError) -> Self {
        match err {
            OidcError::FlowNotFound => LoginError::FlowNotFound,
            other => LoginError::Oidc(other),
        }
    }
}

impl From<SessionError> for LoginError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionNotFound => LoginError::NotAuthenticated,
            other => LoginError::Session(other),
        }
    }
}

impl From<ApiError> for LoginError {
    fn from(err: ApiError) -> Self {
        LoginError::Oidc(OidcError::ResourceApiFailed(err))
    }
}

impl LoginError {
    /// Stable reason code returned to clients
    pub fn code(&self) -> &'static str {
        match self {
            LoginError::FlowNotFound => "flow_not_found",
            LoginError::ProviderError { .. } => "provider_error",
            LoginError::MissingCode => "missing_code",
            LoginError::NotAuthenticated => "not_authenticated",
            LoginError::Oidc(e) => e.code(),
            LoginError::Session(e) => e.code(),
        }
    }

    /// The browser should be sent back to the start of the login flow.
    pub fn restarts_login(&self) -> bool {
        matches!(self, LoginError::FlowNotFound)
    }

    /// The caller has no usable session and must sign in again.
    pub fn requires_login(&self) -> bool {
        match self {
            LoginError::NotAuthenticated => true,
            LoginError::Oidc(OidcError::ResourceApiFailed(e)) => e.requires_login(),
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            LoginError::FlowNotFound
            | LoginError::ProviderError { .. }
            | LoginError::MissingCode => StatusCode::BAD_REQUEST,
            LoginError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            LoginError::Oidc(e) => match e {
                OidcError::ExchangeFailed(_) | OidcError::InvalidIdToken(_) => {
                    StatusCode::BAD_REQUEST
                }
                OidcError::ResourceApiFailed(api) if api.requires_login() => {
                    StatusCode::UNAUTHORIZED
                }
                OidcError::ResourceApiFailed(_)
                | OidcError::SigningKeysUnavailable(_)
                | OidcError::DiscoveryFailed(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            LoginError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.code() });
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ras_identity_oidc::{ExchangeError, ValidationError};

    #[test]
    fn test_flow_not_found_restarts_login() {
        let err = LoginError::from(OidcError::FlowNotFound);
        assert!(err.restarts_login());
        assert_eq!(err.code(), "flow_not_found");
    }

    #[test]
    fn test_callback_failures_are_bad_requests() {
        let cases = [
            LoginError::ProviderError {
                error: "access_denied".to_string(),
            },
            LoginError::MissingCode,
            LoginError::from(OidcError::from(ExchangeError::Rejected {
                status: 400,
                error: Some("invalid_grant".to_string()),
            })),
            LoginError::from(OidcError::from(ValidationError::BadSignature)),
        ];

        for err in cases {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert!(!err.restarts_login());
        }
    }

    #[test]
    fn test_expired_access_token_requires_login() {
        let err = LoginError::from(ApiError::TokenExpired);
        assert!(err.requires_login());
        assert_eq!(err.code(), "api_error.token_expired");

        let network = LoginError::from(ApiError::Network("reset".to_string()));
        assert!(!network.requires_login());
        assert_eq!(network.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_missing_session_is_not_authenticated() {
        let err = LoginError::from(SessionError::SessionNotFound);
        assert!(matches!(err, LoginError::NotAuthenticated));
        assert!(err.requires_login());
    }
}
