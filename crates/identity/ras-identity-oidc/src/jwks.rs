//! Provider signing keys and their refresh policy.

use crate::config::{OidcConfig, duration_from_secs, parse_absolute_url};
use crate::error::{OidcError, OidcResult};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// The provider's published verification keys, indexed by key id.
#[derive(Clone)]
pub struct ProviderSigningKeys {
    keyed: HashMap<String, DecodingKey>,
    unkeyed: Vec<DecodingKey>,
}

impl fmt::Debug for ProviderSigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSigningKeys")
            .field("key_ids", &self.keyed.keys().collect::<Vec<_>>())
            .field("unkeyed", &self.unkeyed.len())
            .finish()
    }
}

impl ProviderSigningKeys {
    /// Parse a JWKS document, skipping keys that cannot verify signatures.
    pub fn from_jwks_json(document: &str) -> OidcResult<Self> {
        let value: serde_json::Value = serde_json::from_str(document).map_err(|e| {
            OidcError::SigningKeysUnavailable(format!("invalid JWKS document: {}", e))
        })?;

        let entries = value
            .get("keys")
            .and_then(|keys| keys.as_array())
            .ok_or_else(|| {
                OidcError::SigningKeysUnavailable("JWKS document has no keys array".to_string())
            })?;

        let mut keyed = HashMap::new();
        let mut unkeyed = Vec::new();

        for entry in entries {
            let jwk: Jwk = match serde_json::from_value(entry.clone()) {
                Ok(jwk) => jwk,
                Err(e) => {
                    debug!("Skipping unparseable JWK: {}", e);
                    continue;
                }
            };

            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }

            let key = match DecodingKey::from_jwk(&jwk) {
                Ok(key) => key,
                Err(e) => {
                    debug!("Skipping unusable JWK {:?}: {}", jwk.common.key_id, e);
                    continue;
                }
            };

            match jwk.common.key_id {
                Some(kid) if !kid.trim().is_empty() => {
                    keyed.insert(kid, key);
                }
                _ => unkeyed.push(key),
            }
        }

        if keyed.is_empty() && unkeyed.is_empty() {
            return Err(OidcError::SigningKeysUnavailable(
                "JWKS does not contain usable signing keys".to_string(),
            ));
        }

        Ok(Self { keyed, unkeyed })
    }

    /// Find the key for a token header's `kid`.
    ///
    /// Tokens without a `kid` are only accepted when the provider publishes a
    /// single key.
    pub fn lookup(&self, kid: Option<&str>) -> Option<&DecodingKey> {
        match kid {
            Some(kid) => self.keyed.get(kid),
            None if self.len() == 1 => self.unkeyed.first().or_else(|| self.keyed.values().next()),
            None => None,
        }
    }

    pub fn contains(&self, kid: Option<&str>) -> bool {
        self.lookup(kid).is_some()
    }

    pub fn len(&self) -> usize {
        self.keyed.len() + self.unkeyed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct CachedKeys {
    keys: Arc<ProviderSigningKeys>,
    fetched_at: DateTime<Utc>,
}

/// Caches the provider's key set and refreshes it on age or key rotation.
///
/// A token signed with an unknown `kid` triggers a refresh, rate limited by
/// the minimum refresh interval. Concurrent refreshes are coalesced into a
/// single fetch.
pub struct SigningKeyCache {
    http_client: reqwest::Client,
    jwks_uri: String,
    refresh_after: Duration,
    min_refresh_interval: Duration,
    cached: RwLock<Option<CachedKeys>>,
    refresh_lock: Mutex<()>,
}

impl SigningKeyCache {
    pub fn new(
        http_client: reqwest::Client,
        jwks_uri: impl Into<String>,
        config: &OidcConfig,
    ) -> OidcResult<Self> {
        let jwks_uri = jwks_uri.into();
        parse_absolute_url("jwks_uri", &jwks_uri)?;

        Ok(Self {
            http_client,
            jwks_uri,
            refresh_after: duration_from_secs(config.jwks_refresh_seconds),
            min_refresh_interval: duration_from_secs(config.jwks_min_refresh_interval_seconds),
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Return a key set suitable for verifying a token with the given `kid`.
    ///
    /// When a refresh fails but an older key set exists, the older set is
    /// returned and verification decides.
    pub async fn signing_keys(&self, kid: Option<&str>) -> OidcResult<Arc<ProviderSigningKeys>> {
        if let Some(keys) = self.usable_cached(kid).await {
            return Ok(keys);
        }

        let _refresh = self.refresh_lock.lock().await;

        // Another task may have refreshed while we waited for the lock
        let (current, last_fetch) = {
            let cached = self.cached.read().await;
            match cached.as_ref() {
                Some(entry) => (Some(entry.keys.clone()), Some(entry.fetched_at)),
                None => (None, None),
            }
        };

        if let (Some(keys), Some(fetched_at)) = (&current, last_fetch) {
            let age = Utc::now() - fetched_at;
            if age < self.refresh_after && keys.contains(kid) {
                return Ok(keys.clone());
            }
            if age < self.min_refresh_interval {
                debug!("Signing key refresh for kid {:?} is rate limited", kid);
                return Ok(keys.clone());
            }
        }

        match self.fetch().await {
            Ok(keys) => {
                let keys = Arc::new(keys);
                *self.cached.write().await = Some(CachedKeys {
                    keys: keys.clone(),
                    fetched_at: Utc::now(),
                });
                Ok(keys)
            }
            Err(e) => match current {
                Some(keys) => {
                    warn!("Signing key refresh failed, keeping previous key set: {}", e);
                    Ok(keys)
                }
                None => Err(e),
            },
        }
    }

    async fn usable_cached(&self, kid: Option<&str>) -> Option<Arc<ProviderSigningKeys>> {
        let cached = self.cached.read().await;
        let entry = cached.as_ref()?;

        if Utc::now() - entry.fetched_at < self.refresh_after && entry.keys.contains(kid) {
            Some(entry.keys.clone())
        } else {
            None
        }
    }

    async fn fetch(&self) -> OidcResult<ProviderSigningKeys> {
        let response = self
            .http_client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| OidcError::SigningKeysUnavailable(format!("JWKS request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OidcError::SigningKeysUnavailable(format!(
                "JWKS endpoint returned HTTP {}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OidcError::SigningKeysUnavailable(format!("JWKS read failed: {}", e)))?;

        let keys = ProviderSigningKeys::from_jwks_json(&body)?;
        info!("Fetched {} provider signing keys", keys.len());
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JWKS: &str = include_str!("../fixtures/jwks.json");
    const ROTATED_JWKS: &str = include_str!("../fixtures/rotated-jwks.json");

    #[test]
    fn test_parse_fixture_jwks() {
        let keys = ProviderSigningKeys::from_jwks_json(JWKS).unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys.lookup(Some("provider-key-1")).is_some());
        assert!(keys.lookup(Some("provider-key-2")).is_none());
        // Single published key is used for tokens without a kid
        assert!(keys.lookup(None).is_some());
    }

    #[test]
    fn test_unusable_keys_are_skipped() {
        let rotated: serde_json::Value = serde_json::from_str(ROTATED_JWKS).unwrap();
        let mut keys = rotated["keys"].as_array().unwrap().clone();
        keys.push(serde_json::json!({ "kty": "unknown", "kid": "mystery" }));
        keys.push(serde_json::json!({
            "kty": "RSA",
            "use": "enc",
            "kid": "encryption-only",
            "n": "AQAB",
            "e": "AQAB"
        }));
        let document = serde_json::json!({ "keys": keys }).to_string();

        let parsed = ProviderSigningKeys::from_jwks_json(&document).unwrap();
        assert!(parsed.contains(Some("provider-key-2")));
        assert!(!parsed.contains(Some("mystery")));
        assert!(!parsed.contains(Some("encryption-only")));
    }

    #[test]
    fn test_kidless_lookup_with_several_keys_fails() {
        let first: serde_json::Value = serde_json::from_str(JWKS).unwrap();
        let second: serde_json::Value = serde_json::from_str(ROTATED_JWKS).unwrap();
        let mut keys = first["keys"].as_array().unwrap().clone();
        keys.extend(second["keys"].as_array().unwrap().iter().cloned());
        let document = serde_json::json!({ "keys": keys }).to_string();

        let parsed = ProviderSigningKeys::from_jwks_json(&document).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.lookup(None).is_none());
    }

    #[test]
    fn test_empty_or_invalid_documents_are_rejected() {
        assert!(matches!(
            ProviderSigningKeys::from_jwks_json(r#"{"keys": []}"#),
            Err(OidcError::SigningKeysUnavailable(_))
        ));
        assert!(matches!(
            ProviderSigningKeys::from_jwks_json("not json"),
            Err(OidcError::SigningKeysUnavailable(_))
        ));
        assert!(matches!(
            ProviderSigningKeys::from_jwks_json(r#"{"issuer": "x"}"#),
            Err(OidcError::SigningKeysUnavailable(_))
        ));
    }

    #[test]
    fn test_cache_rejects_relative_jwks_uri() {
        let result = SigningKeyCache::new(reqwest::Client::new(), "/keys", &OidcConfig::default());
        assert!(matches!(result, Err(OidcError::ConfigError(_))));
    }
}
