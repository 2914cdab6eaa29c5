//! SQLite API key repository.

use chrono::{DateTime, Utc};
use sqlx::Row;

use switchboard_core::repository::ApiKeyRepository;
use switchboard_types::auth::{ApiKey, ApiKeyId, Permission, Role};
use switchboard_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_opt_datetime, query_err};

pub struct SqliteApiKeyRepository {
    pool: DatabasePool,
}

impl SqliteApiKeyRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct ApiKeyRow {
    id: String,
    name: String,
    key_prefix: String,
    secret_hash: String,
    role: String,
    custom_permissions: Option<String>,
    created_at: String,
    expires_at: Option<String>,
    last_used_at: Option<String>,
    revoked: bool,
    revoked_at: Option<String>,
}

impl ApiKeyRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            key_prefix: row.try_get("key_prefix")?,
            secret_hash: row.try_get("secret_hash")?,
            role: row.try_get("role")?,
            custom_permissions: row.try_get("custom_permissions")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            last_used_at: row.try_get("last_used_at")?,
            revoked: row.try_get("revoked")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }

    fn into_key(self) -> Result<ApiKey, RepositoryError> {
        let id = self
            .id
            .parse::<ApiKeyId>()
            .map_err(|e| RepositoryError::Query(format!("invalid key id: {e}")))?;
        let role: Role = self.role.parse().map_err(RepositoryError::Query)?;
        let custom_permissions = self
            .custom_permissions
            .map(|json| {
                serde_json::from_str::<Vec<String>>(&json)
                    .map(|list| list.into_iter().map(Permission::new).collect())
                    .map_err(|e| RepositoryError::Query(format!("invalid permissions JSON: {e}")))
            })
            .transpose()?;

        Ok(ApiKey {
            id,
            name: self.name,
            key_prefix: self.key_prefix,
            secret_hash: self.secret_hash,
            role,
            custom_permissions,
            created_at: parse_datetime(&self.created_at)?,
            expires_at: parse_opt_datetime(self.expires_at)?,
            last_used_at: parse_opt_datetime(self.last_used_at)?,
            revoked: self.revoked,
            revoked_at: parse_opt_datetime(self.revoked_at)?,
        })
    }
}

fn permissions_json(key: &ApiKey) -> Result<Option<String>, RepositoryError> {
    key.custom_permissions
        .as_ref()
        .map(|list| {
            let tokens: Vec<&str> = list.iter().map(Permission::as_str).collect();
            serde_json::to_string(&tokens).map_err(|e| RepositoryError::Query(e.to_string()))
        })
        .transpose()
}

impl ApiKeyRepository for SqliteApiKeyRepository {
    async fn create(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO api_keys (id, name, key_prefix, secret_hash, role, custom_permissions, created_at, expires_at, last_used_at, revoked, revoked_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(key.id.to_string())
        .bind(&key.name)
        .bind(&key.key_prefix)
        .bind(&key.secret_hash)
        .bind(key.role.to_string())
        .bind(permissions_json(key)?)
        .bind(format_datetime(&key.created_at))
        .bind(key.expires_at.as_ref().map(format_datetime))
        .bind(key.last_used_at.as_ref().map(format_datetime))
        .bind(key.revoked)
        .bind(key.revoked_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| ApiKeyRow::from_row(&r).map_err(query_err)?.into_key())
            .transpose()
    }

    async fn list(&self) -> Result<Vec<ApiKey>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM api_keys ORDER BY created_at ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter()
            .map(|r| ApiKeyRow::from_row(r).map_err(query_err)?.into_key())
            .collect()
    }

    async fn update(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE api_keys SET name = ?, role = ?, custom_permissions = ?, expires_at = ?, last_used_at = ?, revoked = ?, revoked_at = ?
             WHERE id = ?",
        )
        .bind(&key.name)
        .bind(key.role.to_string())
        .bind(permissions_json(key)?)
        .bind(key.expires_at.as_ref().map(format_datetime))
        .bind(key.last_used_at.as_ref().map(format_datetime))
        .bind(key.revoked)
        .bind(key.revoked_at.as_ref().map(format_datetime))
        .bind(key.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn touch_last_used(&self, id: &ApiKeyId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(format_datetime(&at))
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn delete(&self, id: &ApiKeyId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use chrono::TimeZone;

    fn make_key(name: &str, hash: &str, custom: Option<Vec<Permission>>) -> ApiKey {
        ApiKey {
            id: ApiKeyId::new(),
            name: name.to_string(),
            key_prefix: "sb_abcd".to_string(),
            secret_hash: hash.to_string(),
            role: if custom.is_some() { Role::Custom } else { Role::Developer },
            custom_permissions: custom,
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap(),
            expires_at: None,
            last_used_at: None,
            revoked: false,
            revoked_at: None,
        }
    }

    #[tokio::test]
    async fn create_get_roundtrip() {
        let repo = SqliteApiKeyRepository::new(test_pool().await);
        let key = make_key(
            "ci",
            "aa11",
            Some(vec![Permission::READ_MESSAGES, Permission::new("custom:thing")]),
        );
        repo.create(&key).await.unwrap();

        let loaded = repo.get(&key.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "ci");
        assert_eq!(loaded.role, Role::Custom);
        assert_eq!(loaded.permissions(), key.permissions());
        assert_eq!(loaded.created_at, key.created_at);
        assert!(repo.get(&ApiKeyId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_hash_conflicts() {
        let repo = SqliteApiKeyRepository::new(test_pool().await);
        repo.create(&make_key("a", "same", None)).await.unwrap();
        let err = repo.create(&make_key("b", "same", None)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_revocation_and_touch() {
        let repo = SqliteApiKeyRepository::new(test_pool().await);
        let mut key = make_key("bot", "bb22", None);
        repo.create(&key).await.unwrap();

        let used = Utc.with_ymd_and_hms(2026, 2, 2, 9, 30, 0).unwrap();
        repo.touch_last_used(&key.id, used).await.unwrap();

        key.revoked = true;
        key.revoked_at = Some(used);
        key.last_used_at = Some(used);
        repo.update(&key).await.unwrap();

        let loaded = repo.get(&key.id).await.unwrap().unwrap();
        assert!(loaded.revoked);
        assert_eq!(loaded.last_used_at, Some(used));

        let ghost = make_key("ghost", "cc33", None);
        assert!(matches!(repo.update(&ghost).await, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn list_oldest_first_and_delete() {
        let repo = SqliteApiKeyRepository::new(test_pool().await);
        let mut first = make_key("first", "h1", None);
        first.created_at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let second = make_key("second", "h2", None);
        repo.create(&second).await.unwrap();
        repo.create(&first).await.unwrap();

        let names: Vec<String> = repo.list().await.unwrap().into_iter().map(|k| k.name).collect();
        assert_eq!(names, vec!["first", "second"]);

        repo.delete(&first.id).await.unwrap();
        assert_eq!(repo.list().await.unwrap().len(), 1);
        assert!(matches!(repo.delete(&first.id).await, Err(RepositoryError::NotFound)));
    }
}
