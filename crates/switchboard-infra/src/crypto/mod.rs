//! Cryptographic adapters.
//!
//! - `hash`: SHA-256 digests of API key secrets

pub mod hash;
