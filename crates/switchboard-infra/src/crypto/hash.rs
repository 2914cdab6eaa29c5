//! SHA-256 hashing of API key secrets.
//!
//! Implements the `SecretHasher` trait from `switchboard-core` using the
//! `sha2` crate. Only the digest is ever persisted.

use sha2::{Digest, Sha256};

use switchboard_core::hash::SecretHasher;

/// SHA-256 implementation of `SecretHasher`, producing lowercase hex.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256SecretHasher;

impl Sha256SecretHasher {
    pub fn new() -> Self {
        Self
    }
}

impl SecretHasher for Sha256SecretHasher {
    fn hash_secret(&self, secret: &str) -> String {
        format!("{:x}", Sha256::digest(secret.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digest_of_empty_secret() {
        assert_eq!(
            Sha256SecretHasher::new().hash_secret(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_is_stable_lowercase_hex() {
        let hasher = Sha256SecretHasher::new();
        let a = hasher.hash_secret("sb_live_0123456789abcdef");
        assert_eq!(a, hasher.hash_secret("sb_live_0123456789abcdef"));
        assert_ne!(a, hasher.hash_secret("sb_live_0123456789abcdeg"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }
}
