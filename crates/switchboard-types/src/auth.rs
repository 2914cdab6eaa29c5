//! API key, role and permission types for role-based access control.
//!
//! A key resolves to exactly one permission set: the custom permission list
//! when one is present, otherwise the fixed bundle of its role.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an API key, wrapping a UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(pub Uuid);

impl ApiKeyId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for ApiKeyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ApiKeyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// An opaque permission token such as `send:messages`.
///
/// `admin:*` is the wildcard and satisfies every permission check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const READ_MESSAGES: Permission = Permission::from_static("read:messages");
    pub const READ_CHATS: Permission = Permission::from_static("read:chats");
    pub const READ_USERS: Permission = Permission::from_static("read:users");
    pub const READ_HISTORY: Permission = Permission::from_static("read:history");
    pub const READ_ANALYTICS: Permission = Permission::from_static("read:analytics");
    pub const SEND_MESSAGES: Permission = Permission::from_static("send:messages");
    pub const EDIT_MESSAGES: Permission = Permission::from_static("edit:messages");
    pub const DELETE_MESSAGES: Permission = Permission::from_static("delete:messages");
    pub const PIN_MESSAGES: Permission = Permission::from_static("pin:messages");
    pub const FORWARD_MESSAGES: Permission = Permission::from_static("forward:messages");
    pub const ADD_REACTIONS: Permission = Permission::from_static("add:reactions");
    pub const ADMIN_CHATS: Permission = Permission::from_static("admin:chats");
    pub const ADMIN_USERS: Permission = Permission::from_static("admin:users");
    pub const ADMIN_BOTS: Permission = Permission::from_static("admin:bots");
    pub const ADMIN_AUDIT_LOG: Permission = Permission::from_static("admin:audit_log");
    pub const ADMIN_API_KEYS: Permission = Permission::from_static("admin:api_keys");
    pub const MANAGE_SCHEDULER: Permission = Permission::from_static("manage:scheduler");
    pub const MANAGE_BATCH: Permission = Permission::from_static("manage:batch");
    pub const ADMIN_ALL: Permission = Permission::from_static("admin:*");

    pub const fn from_static(token: &'static str) -> Self {
        Self(Cow::Borrowed(token))
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(Cow::Owned(token.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "admin:*"
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Permission {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Named permission bundles. Immutable at runtime.
///
/// `Custom` marks a key whose permissions come solely from its custom list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Developer,
    Bot,
    ReadOnly,
    Custom,
}

impl Role {
    /// The fixed permission bundle for this role.
    pub fn default_permissions(&self) -> Vec<Permission> {
        match self {
            Role::Admin => vec![Permission::ADMIN_ALL],
            Role::Developer => vec![
                Permission::READ_MESSAGES,
                Permission::READ_CHATS,
                Permission::READ_USERS,
                Permission::READ_HISTORY,
                Permission::READ_ANALYTICS,
                Permission::SEND_MESSAGES,
                Permission::EDIT_MESSAGES,
                Permission::DELETE_MESSAGES,
                Permission::PIN_MESSAGES,
                Permission::FORWARD_MESSAGES,
                Permission::ADD_REACTIONS,
                Permission::ADMIN_CHATS,
                Permission::ADMIN_BOTS,
                Permission::ADMIN_AUDIT_LOG,
                Permission::MANAGE_SCHEDULER,
                Permission::MANAGE_BATCH,
            ],
            Role::Bot => vec![
                Permission::READ_MESSAGES,
                Permission::READ_CHATS,
                Permission::READ_USERS,
                Permission::SEND_MESSAGES,
                Permission::EDIT_MESSAGES,
                Permission::ADD_REACTIONS,
            ],
            Role::ReadOnly => vec![
                Permission::READ_MESSAGES,
                Permission::READ_CHATS,
                Permission::READ_USERS,
                Permission::READ_HISTORY,
                Permission::READ_ANALYTICS,
            ],
            Role::Custom => Vec::new(),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Developer => write!(f, "developer"),
            Role::Bot => write!(f, "bot"),
            Role::ReadOnly => write!(f, "read_only"),
            Role::Custom => write!(f, "custom"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "developer" => Ok(Role::Developer),
            "bot" => Ok(Role::Bot),
            "read_only" | "readonly" | "read-only" => Ok(Role::ReadOnly),
            "custom" => Ok(Role::Custom),
            other => Err(format!("invalid role: '{other}'")),
        }
    }
}

/// A stored API key. The plaintext secret is never part of this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    /// Human label ("ci", "assistant", "bot:echo").
    pub name: String,
    /// Leading characters of the secret, for identification in listings.
    pub key_prefix: String,
    /// Lowercase hex digest of the secret.
    pub secret_hash: String,
    pub role: Role,
    /// When present, fully replaces the role's permission bundle.
    pub custom_permissions: Option<Vec<Permission>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Effective permission set: custom overrides if present, role defaults otherwise.
    pub fn permissions(&self) -> Vec<Permission> {
        match &self.custom_permissions {
            Some(custom) => custom.clone(),
            None => self.role.default_permissions(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Whether this key's permission set satisfies `permission`.
    ///
    /// The Admin role always does, regardless of custom overrides.
    pub fn grants(&self, permission: &Permission) -> bool {
        if self.role == Role::Admin {
            return true;
        }
        self.permissions()
            .iter()
            .any(|p| p.is_wildcard() || p == permission)
    }

    /// Listing view without the secret digest.
    pub fn summary(&self) -> ApiKeySummary {
        ApiKeySummary {
            id: self.id,
            name: self.name.clone(),
            key_prefix: self.key_prefix.clone(),
            role: self.role,
            permissions: self.permissions(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_used_at: self.last_used_at,
            revoked: self.revoked,
        }
    }
}

/// Public view of an API key, safe to return to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeySummary {
    pub id: ApiKeyId,
    pub name: String,
    pub key_prefix: String,
    pub role: Role,
    pub permissions: Vec<Permission>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(role: Role, custom: Option<Vec<Permission>>) -> ApiKey {
        ApiKey {
            id: ApiKeyId::new(),
            name: "test".to_string(),
            key_prefix: "sbk_0000".to_string(),
            secret_hash: "00".to_string(),
            role,
            custom_permissions: custom,
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
            revoked: false,
            revoked_at: None,
        }
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::Admin, Role::Developer, Role::Bot, Role::ReadOnly, Role::Custom] {
            assert_eq!(role.to_string().parse::<Role>().unwrap(), role);
        }
        assert_eq!("ReadOnly".parse::<Role>().unwrap(), Role::ReadOnly);
        assert!("superuser".parse::<Role>().is_err());
    }

    #[test]
    fn test_builtin_roles_are_non_empty() {
        for role in [Role::Admin, Role::Developer, Role::Bot, Role::ReadOnly] {
            assert!(!role.default_permissions().is_empty(), "{role} has no permissions");
        }
    }

    #[test]
    fn test_read_only_cannot_send() {
        let k = key(Role::ReadOnly, None);
        assert!(k.grants(&Permission::READ_MESSAGES));
        assert!(!k.grants(&Permission::SEND_MESSAGES));
    }

    #[test]
    fn test_admin_grants_everything() {
        let k = key(Role::Admin, Some(vec![Permission::READ_CHATS]));
        assert!(k.grants(&Permission::new("anything:at_all")));
    }

    #[test]
    fn test_custom_replaces_role_bundle() {
        let k = key(Role::Developer, Some(vec![Permission::READ_CHATS]));
        assert!(k.grants(&Permission::READ_CHATS));
        assert!(!k.grants(&Permission::SEND_MESSAGES));
    }

    #[test]
    fn test_wildcard_in_custom_list() {
        let k = key(Role::Custom, Some(vec![Permission::ADMIN_ALL]));
        assert!(k.grants(&Permission::DELETE_MESSAGES));
    }

    #[test]
    fn test_expiry_and_revocation() {
        let now = Utc::now();
        let mut k = key(Role::Bot, None);
        assert!(k.is_active(now));
        k.expires_at = Some(now);
        assert!(!k.is_active(now));
        k.expires_at = None;
        k.revoked = true;
        assert!(!k.is_active(now));
    }

    #[test]
    fn test_permission_serializes_as_plain_string() {
        let json = serde_json::to_string(&Permission::SEND_MESSAGES).unwrap();
        assert_eq!(json, "\"send:messages\"");
        let back: Permission = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Permission::SEND_MESSAGES);
    }
}
