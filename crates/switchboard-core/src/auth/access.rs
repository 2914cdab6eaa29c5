//! AccessControl service.
//!
//! Keys live in the repository; a write-through cache of every key record
//! sits behind one async `RwLock`. Lock discipline:
//! - `validate` and read-only lookups take the read lock
//! - `check_permission` (which updates `last_used_at`), `revoke`,
//!   `extend_expiration` and purges take the write lock
//!
//! so a permission check can never interleave with a revocation of the same
//! key, and a key is observed either fully active or fully revoked.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::SecretString;
use tokio::sync::RwLock;

use switchboard_types::auth::{ApiKey, ApiKeyId, ApiKeySummary, Permission, Role};
use switchboard_types::error::AccessError;

use crate::clock::Clock;
use crate::hash::{SecretHasher, constant_time_eq};
use crate::repository::BoxApiKeyRepository;

/// Prefix of every issued secret.
pub const KEY_PREFIX: &str = "sbk_";

/// Characters of the secret kept for identification in listings.
const DISPLAY_PREFIX_LEN: usize = 12;

/// Parameters for issuing a key.
#[derive(Debug, Clone)]
pub struct CreateKeyRequest {
    pub name: String,
    /// Role name; unknown names are accepted only together with custom permissions.
    pub role: String,
    pub custom_permissions: Option<Vec<Permission>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A freshly issued key. `secret` is the only copy of the plaintext.
#[derive(Debug)]
pub struct CreatedKey {
    pub key: ApiKeySummary,
    pub secret: SecretString,
}

pub struct AccessControl {
    repo: BoxApiKeyRepository,
    hasher: Arc<dyn SecretHasher>,
    clock: Arc<dyn Clock>,
    keys: RwLock<HashMap<ApiKeyId, ApiKey>>,
}

impl AccessControl {
    /// Build the service and warm the cache from the repository.
    pub async fn load(
        repo: BoxApiKeyRepository,
        hasher: Arc<dyn SecretHasher>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AccessError> {
        let keys = repo
            .list()
            .await?
            .into_iter()
            .map(|k| (k.id, k))
            .collect::<HashMap<_, _>>();
        tracing::debug!(count = keys.len(), "loaded api keys");
        Ok(Self {
            repo,
            hasher,
            clock,
            keys: RwLock::new(keys),
        })
    }

    /// Issue a new key. Only the hash of the secret is persisted.
    pub async fn create_key(&self, request: CreateKeyRequest) -> Result<CreatedKey, AccessError> {
        let role = match (request.role.parse::<Role>(), &request.custom_permissions) {
            (Ok(Role::Custom), None) | (Err(_), None) => {
                return Err(AccessError::InvalidRole(request.role));
            }
            (Ok(role), _) => role,
            (Err(_), Some(_)) => Role::Custom,
        };
        if request
            .custom_permissions
            .as_ref()
            .is_some_and(|p| p.is_empty())
        {
            return Err(AccessError::EmptyPermissions);
        }

        let now = self.clock.now();
        if request.expires_at.is_some_and(|e| e <= now) {
            return Err(AccessError::InvalidExpiry);
        }

        let secret = generate_secret();
        let key = ApiKey {
            id: ApiKeyId::new(),
            name: request.name,
            key_prefix: secret[..DISPLAY_PREFIX_LEN].to_string(),
            secret_hash: self.hasher.hash_secret(&secret),
            role,
            custom_permissions: request.custom_permissions,
            created_at: now,
            expires_at: request.expires_at,
            last_used_at: None,
            revoked: false,
            revoked_at: None,
        };

        let mut keys = self.keys.write().await;
        self.repo.create(&key).await?;
        let summary = key.summary();
        keys.insert(key.id, key);
        drop(keys);

        tracing::info!(key_id = %summary.id, role = %summary.role, "issued api key");
        Ok(CreatedKey {
            key: summary,
            secret: SecretString::from(secret),
        })
    }

    /// Resolve a plaintext secret to its key id.
    ///
    /// The secret is hashed and compared against every stored digest in
    /// constant time, without stopping at the first match.
    pub async fn validate(&self, secret: &str) -> Result<ApiKeyId, AccessError> {
        let digest = self.hasher.hash_secret(secret);
        let now = self.clock.now();
        let keys = self.keys.read().await;

        let mut matched: Option<&ApiKey> = None;
        for key in keys.values() {
            if constant_time_eq(key.secret_hash.as_bytes(), digest.as_bytes()) {
                matched = Some(key);
            }
        }

        match matched {
            Some(key) if key.is_active(now) => Ok(key.id),
            _ => Err(AccessError::Invalid),
        }
    }

    /// Fail with `Invalid` unless the key exists and is neither revoked nor expired.
    pub async fn ensure_active(&self, key_id: &ApiKeyId) -> Result<(), AccessError> {
        let now = self.clock.now();
        let keys = self.keys.read().await;
        match keys.get(key_id) {
            Some(key) if key.is_active(now) => Ok(()),
            _ => Err(AccessError::Invalid),
        }
    }

    /// Whether `key_id` holds `permission`. Updates `last_used_at`.
    ///
    /// An unknown, revoked or expired key is an error rather than `false`,
    /// so callers can tell a bad credential from a missing grant.
    pub async fn check_permission(
        &self,
        key_id: &ApiKeyId,
        permission: &Permission,
    ) -> Result<bool, AccessError> {
        let now = self.clock.now();
        let granted = {
            let mut keys = self.keys.write().await;
            let key = keys.get_mut(key_id).ok_or(AccessError::Invalid)?;
            if !key.is_active(now) {
                return Err(AccessError::Invalid);
            }
            key.last_used_at = Some(now);
            key.grants(permission)
        };

        // Best effort: a failed timestamp write must not flip the decision.
        if let Err(e) = self.repo.touch_last_used(key_id, now).await {
            tracing::warn!(key_id = %key_id, error = %e, "failed to persist last_used_at");
        }
        Ok(granted)
    }

    /// Revoke a key. Idempotent.
    pub async fn revoke(&self, key_id: &ApiKeyId) -> Result<(), AccessError> {
        let mut keys = self.keys.write().await;
        let mut updated = keys.get(key_id).cloned().ok_or(AccessError::KeyNotFound)?;
        if updated.revoked {
            return Ok(());
        }
        updated.revoked = true;
        updated.revoked_at = Some(self.clock.now());
        self.repo.update(&updated).await?;
        keys.insert(updated.id, updated);
        tracing::info!(key_id = %key_id, "revoked api key");
        Ok(())
    }

    /// Move a key's expiry to `new_expiry`. Revoked keys cannot be revived.
    pub async fn extend_expiration(
        &self,
        key_id: &ApiKeyId,
        new_expiry: DateTime<Utc>,
    ) -> Result<ApiKeySummary, AccessError> {
        if new_expiry <= self.clock.now() {
            return Err(AccessError::InvalidExpiry);
        }
        let mut keys = self.keys.write().await;
        let mut updated = keys.get(key_id).cloned().ok_or(AccessError::KeyNotFound)?;
        if updated.revoked {
            return Err(AccessError::Invalid);
        }
        updated.expires_at = Some(new_expiry);
        self.repo.update(&updated).await?;
        let summary = updated.summary();
        keys.insert(updated.id, updated);
        Ok(summary)
    }

    pub async fn get_key(&self, key_id: &ApiKeyId) -> Option<ApiKeySummary> {
        self.keys.read().await.get(key_id).map(ApiKey::summary)
    }

    /// Keys oldest first.
    pub async fn list_keys(&self, include_revoked: bool) -> Vec<ApiKeySummary> {
        let keys = self.keys.read().await;
        let mut out: Vec<ApiKeySummary> = keys
            .values()
            .filter(|k| include_revoked || !k.revoked)
            .map(ApiKey::summary)
            .collect();
        out.sort_by_key(|k| k.created_at);
        out
    }

    pub async fn effective_permissions(
        &self,
        key_id: &ApiKeyId,
    ) -> Result<Vec<Permission>, AccessError> {
        self.keys
            .read()
            .await
            .get(key_id)
            .map(ApiKey::permissions)
            .ok_or(AccessError::KeyNotFound)
    }

    pub async fn active_key_count(&self) -> usize {
        let now = self.clock.now();
        self.keys
            .read()
            .await
            .values()
            .filter(|k| k.is_active(now))
            .count()
    }

    /// Delete keys whose expiry has passed. Returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, AccessError> {
        let now = self.clock.now();
        self.purge_where(|k| k.is_expired(now)).await
    }

    /// Delete revoked keys. Returns how many were removed.
    pub async fn purge_revoked(&self) -> Result<usize, AccessError> {
        self.purge_where(|k| k.revoked).await
    }

    async fn purge_where(&self, pred: impl Fn(&ApiKey) -> bool) -> Result<usize, AccessError> {
        let mut keys = self.keys.write().await;
        let doomed: Vec<ApiKeyId> = keys.values().filter(|k| pred(k)).map(|k| k.id).collect();
        for id in &doomed {
            self.repo.delete(id).await?;
            keys.remove(id);
        }
        if !doomed.is_empty() {
            tracing::info!(count = doomed.len(), "purged api keys");
        }
        Ok(doomed.len())
    }
}

/// `sbk_` followed by 32 random bytes, hex encoded.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!("{KEY_PREFIX}{hex}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::ApiKeyRepository;
    use crate::testing::{MemoryApiKeys, PlainHasher};
    use chrono::Duration;
    use secrecy::ExposeSecret;

    async fn setup() -> (AccessControl, Arc<ManualClock>, MemoryApiKeys) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let repo = MemoryApiKeys::default();
        let ac = AccessControl::load(
            BoxApiKeyRepository::new(repo.clone()),
            Arc::new(PlainHasher),
            clock.clone(),
        )
        .await
        .unwrap();
        (ac, clock, repo)
    }

    fn request(role: &str) -> CreateKeyRequest {
        CreateKeyRequest {
            name: "test".to_string(),
            role: role.to_string(),
            custom_permissions: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn created_key_validates_and_secret_is_not_stored() {
        let (ac, _, repo) = setup().await;
        let created = ac.create_key(request("developer")).await.unwrap();
        let secret = created.secret.expose_secret();

        assert!(secret.starts_with("sbk_"));
        assert_eq!(secret.len(), 4 + 64);
        assert_eq!(ac.validate(secret).await.unwrap(), created.key.id);

        let stored = repo.list().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_ne!(stored[0].secret_hash, secret);
        assert_eq!(stored[0].key_prefix, &secret[..12]);
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid() {
        let (ac, _, _) = setup().await;
        ac.create_key(request("bot")).await.unwrap();
        assert!(matches!(
            ac.validate("sbk_nope").await,
            Err(AccessError::Invalid)
        ));
    }

    #[tokio::test]
    async fn revoked_key_never_validates() {
        let (ac, _, _) = setup().await;
        let mut created = Vec::new();
        for role in ["admin", "developer", "bot", "read_only"] {
            created.push(ac.create_key(request(role)).await.unwrap());
        }
        for c in &created {
            ac.revoke(&c.key.id).await.unwrap();
            assert!(matches!(
                ac.validate(c.secret.expose_secret()).await,
                Err(AccessError::Invalid)
            ));
            assert!(matches!(
                ac.check_permission(&c.key.id, &Permission::READ_MESSAGES).await,
                Err(AccessError::Invalid)
            ));
        }
    }

    #[tokio::test]
    async fn revocation_survives_reload() {
        let (ac, clock, repo) = setup().await;
        let created = ac.create_key(request("admin")).await.unwrap();
        ac.revoke(&created.key.id).await.unwrap();

        let reloaded = AccessControl::load(
            BoxApiKeyRepository::new(repo),
            Arc::new(PlainHasher),
            clock,
        )
        .await
        .unwrap();
        assert!(reloaded.validate(created.secret.expose_secret()).await.is_err());
    }

    #[tokio::test]
    async fn expired_key_is_invalid() {
        let (ac, clock, _) = setup().await;
        let mut req = request("bot");
        req.expires_at = Some(clock.now() + Duration::hours(1));
        let created = ac.create_key(req).await.unwrap();
        assert!(ac.validate(created.secret.expose_secret()).await.is_ok());

        clock.advance(Duration::hours(2));
        assert!(ac.validate(created.secret.expose_secret()).await.is_err());
        assert_eq!(ac.purge_expired().await.unwrap(), 1);
        assert!(ac.get_key(&created.key.id).await.is_none());
    }

    #[tokio::test]
    async fn extend_expiration_revives_expired_key() {
        let (ac, clock, _) = setup().await;
        let mut req = request("bot");
        req.expires_at = Some(clock.now() + Duration::minutes(5));
        let created = ac.create_key(req).await.unwrap();
        clock.advance(Duration::minutes(10));
        assert!(ac.ensure_active(&created.key.id).await.is_err());

        let new_expiry = clock.now() + Duration::days(30);
        let summary = ac.extend_expiration(&created.key.id, new_expiry).await.unwrap();
        assert_eq!(summary.expires_at, Some(new_expiry));
        assert!(ac.ensure_active(&created.key.id).await.is_ok());

        assert!(matches!(
            ac.extend_expiration(&created.key.id, clock.now()).await,
            Err(AccessError::InvalidExpiry)
        ));
    }

    #[tokio::test]
    async fn unknown_role_needs_custom_permissions() {
        let (ac, _, _) = setup().await;
        assert!(matches!(
            ac.create_key(request("superuser")).await,
            Err(AccessError::InvalidRole(r)) if r == "superuser"
        ));
        assert!(matches!(
            ac.create_key(request("custom")).await,
            Err(AccessError::InvalidRole(_))
        ));

        let mut req = request("auditor");
        req.custom_permissions = Some(vec![Permission::ADMIN_AUDIT_LOG]);
        let created = ac.create_key(req).await.unwrap();
        assert_eq!(created.key.role, Role::Custom);
        assert_eq!(created.key.permissions, vec![Permission::ADMIN_AUDIT_LOG]);

        let mut empty = request("auditor");
        empty.custom_permissions = Some(Vec::new());
        assert!(matches!(
            ac.create_key(empty).await,
            Err(AccessError::EmptyPermissions)
        ));
    }

    #[tokio::test]
    async fn check_permission_updates_last_used() {
        let (ac, clock, repo) = setup().await;
        let created = ac.create_key(request("read_only")).await.unwrap();
        clock.advance(Duration::seconds(30));

        assert!(ac
            .check_permission(&created.key.id, &Permission::READ_MESSAGES)
            .await
            .unwrap());
        assert!(!ac
            .check_permission(&created.key.id, &Permission::SEND_MESSAGES)
            .await
            .unwrap());

        let stored = repo.get(&created.key.id).await.unwrap().unwrap();
        assert_eq!(stored.last_used_at, Some(clock.now()));
        assert_eq!(
            ac.get_key(&created.key.id).await.unwrap().last_used_at,
            Some(clock.now())
        );
    }

    #[tokio::test]
    async fn admin_role_satisfies_everything() {
        let (ac, _, _) = setup().await;
        let created = ac.create_key(request("admin")).await.unwrap();
        for perm in [
            Permission::SEND_MESSAGES,
            Permission::ADMIN_API_KEYS,
            Permission::new("plugin:custom"),
        ] {
            assert!(ac.check_permission(&created.key.id, &perm).await.unwrap());
        }
    }

    #[tokio::test]
    async fn adding_custom_permission_only_grants() {
        let (ac, _, _) = setup().await;
        let universe = vec![
            Permission::READ_MESSAGES,
            Permission::SEND_MESSAGES,
            Permission::DELETE_MESSAGES,
            Permission::ADMIN_BOTS,
            Permission::MANAGE_SCHEDULER,
        ];

        for base_len in 1..universe.len() {
            let base: Vec<Permission> = universe[..base_len].to_vec();
            let extended: Vec<Permission> = universe[..=base_len].to_vec();

            let mut req = request("custom");
            req.custom_permissions = Some(base);
            let small = ac.create_key(req).await.unwrap();
            let mut req = request("custom");
            req.custom_permissions = Some(extended);
            let large = ac.create_key(req).await.unwrap();

            for perm in &universe {
                let before = ac.check_permission(&small.key.id, perm).await.unwrap();
                let after = ac.check_permission(&large.key.id, perm).await.unwrap();
                assert!(!before || after, "{perm} lost after adding a permission");
            }
        }
    }

    #[tokio::test]
    async fn concurrent_checks_never_succeed_after_revoke_returns() {
        let (ac, _, _) = setup().await;
        let ac = Arc::new(ac);
        let created = ac.create_key(request("developer")).await.unwrap();
        let id = created.key.id;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ac = ac.clone();
            handles.push(tokio::spawn(async move {
                ac.check_permission(&id, &Permission::SEND_MESSAGES).await
            }));
        }
        ac.revoke(&id).await.unwrap();

        // Every check either completed before the revoke or observed it.
        for h in handles {
            match h.await.unwrap() {
                Ok(granted) => assert!(granted),
                Err(e) => assert!(matches!(e, AccessError::Invalid)),
            }
        }
        assert!(matches!(
            ac.check_permission(&id, &Permission::SEND_MESSAGES).await,
            Err(AccessError::Invalid)
        ));
    }

    #[tokio::test]
    async fn listing_hides_revoked_by_default() {
        let (ac, _, _) = setup().await;
        let a = ac.create_key(request("bot")).await.unwrap();
        ac.create_key(request("bot")).await.unwrap();
        ac.revoke(&a.key.id).await.unwrap();

        assert_eq!(ac.list_keys(false).await.len(), 1);
        assert_eq!(ac.list_keys(true).await.len(), 2);
        assert_eq!(ac.active_key_count().await, 1);
        assert_eq!(ac.purge_revoked().await.unwrap(), 1);
        assert_eq!(ac.list_keys(true).await.len(), 1);
    }
}
