//! Role-based access control: API key issuance, validation and permission checks.

pub mod access;
pub mod permissions;

pub use access::{AccessControl, CreateKeyRequest, CreatedKey};
pub use permissions::tool_permissions;
