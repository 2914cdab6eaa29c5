//! SQLite per-bot key-value state.

use chrono::Utc;
use serde_json::Value;
use sqlx::Row;

use switchboard_core::repository::BotStateRepository;
use switchboard_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, query_err};

pub struct SqliteBotStateRepository {
    pool: DatabasePool,
}

impl SqliteBotStateRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl BotStateRepository for SqliteBotStateRepository {
    async fn get(&self, bot_id: &str, key: &str) -> Result<Option<Value>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM bot_state WHERE bot_id = ? AND key = ?")
            .bind(bot_id)
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let raw: String = row.try_get("value").map_err(query_err)?;
                serde_json::from_str(&raw)
                    .map(Some)
                    .map_err(|e| RepositoryError::Query(format!("invalid state JSON: {e}")))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, bot_id: &str, key: &str, value: &Value) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO bot_state (bot_id, key, value, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(bot_id, key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(bot_id)
        .bind(key)
        .bind(value.to_string())
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn delete(&self, bot_id: &str, key: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM bot_state WHERE bot_id = ? AND key = ?")
            .bind(bot_id)
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_keys(&self, bot_id: &str) -> Result<Vec<String>, RepositoryError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT key FROM bot_state WHERE bot_id = ? ORDER BY key")
                .bind(bot_id)
                .fetch_all(&self.pool.reader)
                .await
                .map_err(query_err)?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}
