//! Infrastructure layer for Switchboard.
//!
//! Implements the ports defined in `switchboard-core`: SQLite repositories,
//! SHA-256 secret hashing, an in-process messaging backend, and config
//! loading from the data directory.

pub mod backend;
pub mod config;
pub mod crypto;
pub mod sqlite;
