//! Confirmation token generation and hashing.
//!
//! A confirmation token is 32 bytes (256 bits) from the thread CSPRNG, encoded as base64url
//! without padding. Only its SHA-256 digest (lowercase hex) is ever persisted; the raw value
//! lives in the outbound email and the inbound confirmation URL and nowhere else.

use base64::{Engine as _, engine::general_purpose};
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};
use std::fmt;

const TOKEN_BYTES: usize = 32;

/// Length of an encoded token: 32 bytes in unpadded base64url.
pub const TOKEN_LEN: usize = 43;

/// A raw confirmation token. `Debug` is redacted so it can't leak into logs via `{:?}`.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfirmationToken(String);

/// One-way digest of a [`ConfirmationToken`], the only form that reaches storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenHash(String);

impl ConfirmationToken {
    /// Generate a fresh token
    pub fn generate() -> Self {
        let mut token_bytes = [0u8; TOKEN_BYTES];
        rng().fill(&mut token_bytes);

        Self(general_purpose::URL_SAFE_NO_PAD.encode(token_bytes))
    }

    /// Accept a token from an inbound URL. Returns `None` unless it has the exact shape
    /// [`generate`](Self::generate) produces, so garbage never costs a storage round trip.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let well_formed = raw.len() == TOKEN_LEN && raw.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(raw.to_string()))
    }

    pub fn hash(&self) -> TokenHash {
        TokenHash::of(&self.0)
    }

    /// The raw value, for embedding in a confirmation link.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConfirmationToken(<redacted>)")
    }
}

impl TokenHash {
    pub fn of(raw: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token() {
        let token1 = ConfirmationToken::generate();
        let token2 = ConfirmationToken::generate();

        assert_ne!(token1, token2);

        // Tokens should be base64url encoded (43 chars for 32 bytes)
        assert_eq!(token1.expose().len(), TOKEN_LEN);
        assert!(token1.expose().chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert!(!token1.expose().contains('='));
    }

    #[test]
    fn test_hash_is_deterministic_hex() {
        let token = ConfirmationToken::generate();
        let hash = token.hash();

        assert_eq!(hash, token.hash());
        assert_eq!(hash.as_str().len(), 64);
        assert!(hash.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(hash.as_str(), token.expose());
    }

    #[test]
    fn test_known_digest() {
        // sha256("abc")
        assert_eq!(
            TokenHash::of("abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_roundtrips_generated_tokens() {
        let token = ConfirmationToken::generate();
        let parsed = ConfirmationToken::parse(token.expose()).unwrap();
        assert_eq!(parsed.hash(), token.hash());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ConfirmationToken::parse("").is_none());
        assert!(ConfirmationToken::parse("short").is_none());
        assert!(ConfirmationToken::parse(&"a".repeat(TOKEN_LEN + 1)).is_none());
        assert!(ConfirmationToken::parse(&format!("{}=", "a".repeat(TOKEN_LEN - 1))).is_none());
        assert!(ConfirmationToken::parse(&"a".repeat(TOKEN_LEN)).is_some());
    }

    #[test]
    fn test_debug_is_redacted() {
        let token = ConfirmationToken::generate();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.expose()));
    }
}
