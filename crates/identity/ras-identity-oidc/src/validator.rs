//! Identity token validation.

use crate::error::ValidationError;
use crate::flow::PendingFlow;
use crate::jwks::ProviderSigningKeys;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use ras_identity_core::{Audience, IdentityClaims};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Claims as they appear in the token, before any trust decision.
#[derive(Debug, Deserialize)]
struct RawIdTokenClaims {
    sub: String,
    iss: String,
    aud: Audience,
    exp: i64,
    iat: i64,
    nbf: Option<i64>,
    nonce: Option<String>,
    name: Option<String>,
    preferred_username: Option<String>,
    email: Option<String>,
    #[serde(flatten)]
    additional_claims: HashMap<String, serde_json::Value>,
}

/// Verifies identity tokens against the provider keys and the pending flow.
///
/// Checks run in a fixed order and the first failure is reported: signature,
/// issuer, audience, expiry and issue time, then nonce.
#[derive(Debug, Clone)]
pub struct IdTokenValidator {
    expected_issuer: String,
    expected_audience: String,
    leeway_seconds: i64,
    allowed_algorithms: Vec<Algorithm>,
}

impl IdTokenValidator {
    pub fn new(expected_issuer: impl Into<String>, expected_audience: impl Into<String>) -> Self {
        Self {
            expected_issuer: expected_issuer.into(),
            expected_audience: expected_audience.into(),
            leeway_seconds: 300,
            allowed_algorithms: vec![Algorithm::RS256],
        }
    }

    /// Clock skew tolerated on `exp`, `iat` and `nbf`
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        self
    }

    pub fn with_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    pub fn validate(
        &self,
        raw_id_token: &str,
        flow: &PendingFlow,
        keys: &ProviderSigningKeys,
    ) -> Result<IdentityClaims, ValidationError> {
        self.validate_at(raw_id_token, flow, keys, Utc::now())
    }

    pub fn validate_at(
        &self,
        raw_id_token: &str,
        flow: &PendingFlow,
        keys: &ProviderSigningKeys,
        now: DateTime<Utc>,
    ) -> Result<IdentityClaims, ValidationError> {
        let claims = self.verify_signature(raw_id_token, keys)?;

        if claims.iss != self.expected_issuer {
            debug!("Identity token issuer {} does not match", claims.iss);
            return Err(ValidationError::IssuerMismatch);
        }

        if !claims.aud.contains(&self.expected_audience) {
            return Err(ValidationError::AudienceMismatch);
        }

        let now_ts = now.timestamp();
        if now_ts > claims.exp.saturating_add(self.leeway_seconds) {
            return Err(ValidationError::Expired);
        }
        if claims.iat > now_ts.saturating_add(self.leeway_seconds) {
            return Err(ValidationError::NotYetValid);
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now_ts.saturating_add(self.leeway_seconds) {
                return Err(ValidationError::NotYetValid);
            }
        }

        match claims.nonce.as_deref() {
            Some(nonce) if nonce == flow.nonce => {}
            _ => {
                warn!("Identity token nonce mismatch for flow {}", flow.flow_id);
                return Err(ValidationError::NonceMismatch);
            }
        }

        let expires_at =
            DateTime::from_timestamp(claims.exp, 0).ok_or(ValidationError::Malformed)?;
        let issued_at = DateTime::from_timestamp(claims.iat, 0).ok_or(ValidationError::Malformed)?;

        let mut additional_claims = claims.additional_claims;
        if let Some(nbf) = claims.nbf {
            additional_claims.insert("nbf".to_string(), nbf.into());
        }

        Ok(IdentityClaims {
            subject: claims.sub,
            issuer: claims.iss,
            audience: claims.aud,
            expires_at,
            issued_at,
            nonce: flow.nonce.clone(),
            display_name: claims.name,
            preferred_username: claims.preferred_username,
            email: claims.email,
            additional_claims,
        })
    }

    /// Verify the signature only. Every claim check happens afterwards so the
    /// failure order stays fixed.
    fn verify_signature(
        &self,
        raw_id_token: &str,
        keys: &ProviderSigningKeys,
    ) -> Result<RawIdTokenClaims, ValidationError> {
        let header = decode_header(raw_id_token).map_err(|_| ValidationError::Malformed)?;

        if !self.allowed_algorithms.contains(&header.alg) {
            warn!("Identity token signed with disallowed algorithm {:?}", header.alg);
            return Err(ValidationError::BadSignature);
        }

        let key = keys.lookup(header.kid.as_deref()).ok_or_else(|| {
            debug!("No signing key for kid {:?}", header.kid);
            ValidationError::BadSignature
        })?;

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims = HashSet::new();

        decode::<RawIdTokenClaims>(raw_id_token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => ValidationError::Malformed,
                _ => ValidationError::BadSignature,
            })
    }
}

/// Read the `kid` from a token header without trusting anything else in it.
pub fn token_key_id(raw_id_token: &str) -> Result<Option<String>, ValidationError> {
    decode_header(raw_id_token)
        .map(|header| header.kid)
        .map_err(|_| ValidationError::Malformed)
}
