//! PKCE (RFC 7636) verifier and S256 challenge.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use ras_identity_core::generate_opaque_token;
use sha2::{Digest, Sha256};

pub const CODE_CHALLENGE_METHOD_S256: &str = "S256";

/// PKCE code challenge and verifier
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub code_verifier: String,
    pub code_challenge: String,
    pub code_challenge_method: String,
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

impl PkceChallenge {
    /// Generate a new verifier (256 bits of entropy, 43 characters) and its challenge
    pub fn new() -> Self {
        Self::from_verifier(generate_opaque_token())
    }

    pub fn from_verifier(code_verifier: String) -> Self {
        let code_challenge = code_challenge_s256(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
            code_challenge_method: CODE_CHALLENGE_METHOD_S256.to_string(),
        }
    }
}

/// `BASE64URL(SHA256(verifier))` without padding
pub fn code_challenge_s256(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
