//! Opaque bearer tokens.
//!
//! Plaintext is 26 characters of base32 (130 random bits). Only the
//! SHA-256 of the plaintext is ever stored.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Scope for tokens that authenticate API requests.
pub const SCOPE_AUTHENTICATION: &str = "authentication";
/// Scope for one-shot account activation tokens.
pub const SCOPE_ACTIVATION: &str = "activation";

/// Length of every plaintext token.
pub const TOKEN_LEN: usize = 26;

const ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// A freshly minted token. `plaintext` is handed to the client once.
#[derive(Debug, Clone)]
pub struct OpaqueToken {
    pub plaintext: String,
    pub hash: [u8; 32],
    pub user_id: i64,
    pub expiry: DateTime<Utc>,
    pub scope: String,
}

impl OpaqueToken {
    /// Mint a token for `user_id` valid for `ttl`.
    ///
    /// `None` when `ttl` puts the expiry outside the representable range.
    pub fn generate(user_id: i64, ttl: Duration, scope: &str) -> Option<Self> {
        let expiry = Utc::now().checked_add_signed(ttl)?;

        let mut rng = rand::thread_rng();
        let plaintext: String = (0..TOKEN_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();

        Some(Self {
            hash: hash_plaintext(&plaintext),
            plaintext,
            user_id,
            expiry,
            scope: scope.to_string(),
        })
    }
}

/// SHA-256 of the plaintext, the form tokens are stored and looked up in.
pub fn hash_plaintext(plaintext: &str) -> [u8; 32] {
    Sha256::digest(plaintext.as_bytes()).into()
}

/// Format check run before any store lookup.
pub fn validate_plaintext(plaintext: &str) -> bool {
    !plaintext.is_empty() && plaintext.len() == TOKEN_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_well_formed() {
        let token = OpaqueToken::generate(7, Duration::hours(1), SCOPE_AUTHENTICATION).unwrap();
        assert_eq!(token.plaintext.len(), TOKEN_LEN);
        assert!(token.plaintext.bytes().all(|b| ALPHABET.contains(&b)));
        assert!(validate_plaintext(&token.plaintext));
        assert_eq!(token.hash, hash_plaintext(&token.plaintext));
        assert!(token.expiry > Utc::now());
    }

    #[test]
    fn tokens_differ() {
        let a = OpaqueToken::generate(1, Duration::hours(1), SCOPE_AUTHENTICATION).unwrap();
        let b = OpaqueToken::generate(1, Duration::hours(1), SCOPE_AUTHENTICATION).unwrap();
        assert_ne!(a.plaintext, b.plaintext);
    }

    #[test]
    fn overflowing_ttl_is_refused() {
        assert!(OpaqueToken::generate(1, Duration::MAX, SCOPE_AUTHENTICATION).is_none());
        assert!(OpaqueToken::generate(1, Duration::days(365 * 10), SCOPE_AUTHENTICATION).is_some());
    }

    #[test]
    fn plaintext_format() {
        assert!(!validate_plaintext(""));
        assert!(!validate_plaintext("TOOSHORT"));
        assert!(!validate_plaintext(&"A".repeat(27)));
        assert!(validate_plaintext(&"A".repeat(26)));
    }
}
