//! OpenID Connect authorization code flow with PKCE.
//!
//! This crate covers the relying-party side of the flow: pending flow state,
//! authorization request construction, the back-channel token exchange, and
//! identity token validation against the provider's published keys.

mod authorize;
mod client;
mod config;
mod error;
mod flow;
mod jwks;
mod pkce;
mod types;
mod validator;


pub use authorize::{AuthorizationRequestBuilder, build_authorization_url, build_logout_url};
pub use client::TokenExchangeClient;
pub use config::{ClientCredentials, OPENID_SCOPE, OidcConfig, ProviderConfig};
pub use error::{ApiError, ExchangeError, OidcError, OidcResult, ValidationError};
pub use flow::{FlowStateStore, InMemoryFlowStore, PendingFlow};
pub use jwks::{ProviderSigningKeys, SigningKeyCache};
pub use pkce::{CODE_CHALLENGE_METHOD_S256, PkceChallenge, code_challenge_s256};
pub use types::{
    AccessToken, AuthorizationResponse, DEFAULT_ACCESS_TOKEN_LIFETIME_SECS, ProviderMetadata,
    RefreshedTokens, ResourceResponse, TokenResponse,
};
pub use validator::{IdTokenValidator, token_key_id};

// Re-export common types for convenience
pub use ras_identity_core::{Audience, IdentityClaims};
