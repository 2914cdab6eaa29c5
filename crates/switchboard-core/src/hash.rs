//! SecretHasher trait for one-way hashing of API key secrets.
//!
//! Defined in switchboard-core so access control can hash secrets without
//! coupling to a specific algorithm. The `Sha256SecretHasher` adapter lives
//! in switchboard-infra.

/// Abstraction over one-way secret hashing.
pub trait SecretHasher: Send + Sync {
    /// Compute a lowercase hex digest of the given secret.
    fn hash_secret(&self, secret: &str) -> String;
}

/// Compare two digests without short-circuiting on the first mismatch.
///
/// Length is not secret (all digests share one width), so a length
/// mismatch returns early.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
