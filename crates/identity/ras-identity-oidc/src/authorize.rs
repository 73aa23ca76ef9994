//! Authorization request construction.

use crate::config::parse_absolute_url;
use crate::error::{OidcError, OidcResult};
use crate::flow::PendingFlow;
use crate::pkce::CODE_CHALLENGE_METHOD_S256;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};
use url::Url;

/// Parameters owned by the protocol; extra parameters may not override them.
const RESERVED_PARAMS: &[&str] = &[
    "response_type",
    "client_id",
    "redirect_uri",
    "scope",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
];

/// Builds the provider authorization URL for a pending flow.
///
/// Output depends only on the inputs: the same flow always yields the same URL.
#[derive(Debug, Clone)]
pub struct AuthorizationRequestBuilder {
    client_id: String,
    authorization_endpoint: String,
    extra_params: BTreeMap<String, String>,
}

impl AuthorizationRequestBuilder {
    pub fn new(client_id: impl Into<String>, authorization_endpoint: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            authorization_endpoint: authorization_endpoint.into(),
            extra_params: BTreeMap::new(),
        }
    }

    /// Append provider-specific parameters such as `prompt` or `domain_hint`
    pub fn with_extra_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.extra_params.extend(params);
        self
    }

    pub fn build(&self, flow: &PendingFlow, scopes: &BTreeSet<String>) -> OidcResult<Url> {
        if self.client_id.trim().is_empty() {
            return Err(OidcError::ConfigError("client_id is empty".to_string()));
        }
        if scopes.is_empty() {
            return Err(OidcError::ConfigError("no scopes requested".to_string()));
        }

        let mut url = parse_absolute_url("authorization_endpoint", &self.authorization_endpoint)?;
        parse_absolute_url("redirect_uri", &flow.redirect_uri)?;

        let scope = scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");

        let mut params = url.query_pairs_mut();
        params.append_pair("response_type", "code");
        params.append_pair("client_id", &self.client_id);
        params.append_pair("redirect_uri", &flow.redirect_uri);
        params.append_pair("scope", &scope);
        params.append_pair("state", &flow.state);
        params.append_pair("nonce", &flow.nonce);
        params.append_pair("code_challenge", &flow.code_challenge());
        params.append_pair("code_challenge_method", CODE_CHALLENGE_METHOD_S256);

        for (key, value) in &self.extra_params {
            if RESERVED_PARAMS.contains(&key.as_str()) {
                warn!(
                    "Ignoring extra authorization parameter {} that would override the protocol",
                    key
                );
                continue;
            }
            params.append_pair(key, value);
        }

        drop(params);

        debug!("Built authorization URL for flow {}", flow.flow_id);
        Ok(url)
    }
}

/// Build the authorization URL for `flow`.
pub fn build_authorization_url(
    flow: &PendingFlow,
    client_id: &str,
    authorization_endpoint: &str,
    scopes: &BTreeSet<String>,
) -> OidcResult<Url> {
    AuthorizationRequestBuilder::new(client_id, authorization_endpoint).build(flow, scopes)
}

/// Build the provider's RP-initiated logout URL.
pub fn build_logout_url(
    end_session_endpoint: &str,
    post_logout_redirect_uri: &str,
) -> OidcResult<Url> {
    let mut url = parse_absolute_url("end_session_endpoint", end_session_endpoint)?;
    parse_absolute_url("post_logout_redirect_uri", post_logout_redirect_uri)?;

    url.query_pairs_mut()
        .append_pair("post_logout_redirect_uri", post_logout_redirect_uri);

    Ok(url)
}
