//! Core identity types shared by the OIDC and session crates.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of random bytes behind every opaque identifier (256 bits).
pub const OPAQUE_TOKEN_BYTES: usize = 32;

/// Generate an unguessable, URL-safe identifier from the OS CSPRNG.
///
/// Used for flow ids, session ids, `state` and `nonce` values.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; OPAQUE_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// The `aud` claim, which providers emit either as a string or as an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Audience::One(aud) => aud == value,
            Audience::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }

    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Audience::One(aud) => vec![aud.clone()],
            Audience::Many(auds) => auds.clone(),
        }
    }
}

/// Claims extracted from an identity token that passed every trust check.
///
/// Only the identity token validator constructs these; nothing downstream
/// sees unvalidated claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub subject: String,
    pub issuer: String,
    pub audience: Audience,
    pub expires_at: DateTime<Utc>,
    pub issued_at: DateTime<Utc>,
    pub nonce: String,
    pub display_name: Option<String>,
    pub preferred_username: Option<String>,
    pub email: Option<String>,
    /// Provider-specific claims (`oid`, `tid`, ...), kept verbatim.
    pub additional_claims: HashMap<String, serde_json::Value>,
}

impl IdentityClaims {
    /// Look up a provider-specific string claim such as Entra's `oid`.
    pub fn additional_str(&self, name: &str) -> Option<&str> {
        self.additional_claims.get(name).and_then(|v| v.as_str())
    }

    /// Best human-readable label for the signed-in user.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.preferred_username.as_deref())
            .unwrap_or(&self.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_opaque_tokens_are_url_safe_and_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_opaque_token()).collect();
        assert_eq!(tokens.len(), 1000);

        for token in &tokens {
            // 32 bytes -> 43 base64url characters without padding
            assert_eq!(token.len(), 43);
            assert!(
                token
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
    }

    #[test]
    fn test_audience_deserializes_string_and_array() {
        let one: Audience = serde_json::from_str(r#""client-a""#).unwrap();
        assert!(one.contains("client-a"));
        assert!(!one.contains("client-b"));

        let many: Audience = serde_json::from_str(r#"["client-a", "client-b"]"#).unwrap();
        assert!(many.contains("client-b"));
        assert_eq!(many.to_vec(), vec!["client-a", "client-b"]);
    }

    #[test]
    fn test_label_prefers_display_name() {
        let mut claims = IdentityClaims {
            subject: "sub-1".to_string(),
            issuer: "https://issuer.example".to_string(),
            audience: Audience::One("client".to_string()),
            expires_at: Utc::now(),
            issued_at: Utc::now(),
            nonce: "n".to_string(),
            display_name: None,
            preferred_username: Some("ada@example.com".to_string()),
            email: None,
            additional_claims: HashMap::from([(
                "oid".to_string(),
                serde_json::Value::String("object-1".to_string()),
            )]),
        };

        assert_eq!(claims.label(), "ada@example.com");
        assert_eq!(claims.additional_str("oid"), Some("object-1"));

        claims.display_name = Some("Ada Lovelace".to_string());
        assert_eq!(claims.label(), "Ada Lovelace");
    }
}
