//! SQLite scheduled message store.

use chrono::{DateTime, Utc};
use sqlx::Row;

use switchboard_core::repository::ScheduleRepository;
use switchboard_types::error::RepositoryError;
use switchboard_types::schedule::{ScheduleId, ScheduleStatus, ScheduledMessage};

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_opt_datetime, query_err};

pub struct SqliteScheduleRepository {
    pool: DatabasePool,
}

impl SqliteScheduleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct ScheduleRow {
    id: String,
    chat_id: i64,
    text: String,
    kind: String,
    send_at: String,
    anchor_at: String,
    recurrence: String,
    max_occurrences: Option<i64>,
    occurrences_sent: i64,
    status: String,
    created_by: Option<String>,
    created_at: String,
    updated_at: String,
    last_sent_at: Option<String>,
    last_error: Option<String>,
}

impl ScheduleRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            text: row.try_get("text")?,
            kind: row.try_get("kind")?,
            send_at: row.try_get("send_at")?,
            anchor_at: row.try_get("anchor_at")?,
            recurrence: row.try_get("recurrence")?,
            max_occurrences: row.try_get("max_occurrences")?,
            occurrences_sent: row.try_get("occurrences_sent")?,
            status: row.try_get("status")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_sent_at: row.try_get("last_sent_at")?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn into_message(self) -> Result<ScheduledMessage, RepositoryError> {
        Ok(ScheduledMessage {
            id: self
                .id
                .parse()
                .map_err(|e| RepositoryError::Query(format!("invalid schedule id: {e}")))?,
            chat_id: self.chat_id,
            text: self.text,
            kind: self.kind.parse().map_err(RepositoryError::Query)?,
            send_at: parse_datetime(&self.send_at)?,
            anchor_at: parse_datetime(&self.anchor_at)?,
            recurrence: self.recurrence.parse().map_err(RepositoryError::Query)?,
            max_occurrences: self.max_occurrences.map(|n| n.max(0) as u32),
            occurrences_sent: self.occurrences_sent.max(0) as u32,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            created_by: self
                .created_by
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| RepositoryError::Query(format!("invalid key id: {e}")))?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            last_sent_at: parse_opt_datetime(self.last_sent_at)?,
            last_error: self.last_error,
        })
    }
}

fn messages(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<ScheduledMessage>, RepositoryError> {
    rows.iter()
        .map(|r| ScheduleRow::from_row(r).map_err(query_err)?.into_message())
        .collect()
}

const ACTIVE: &str = "status IN ('pending', 'paused')";

impl ScheduleRepository for SqliteScheduleRepository {
    async fn insert(&self, message: &ScheduledMessage) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO scheduled_messages (id, chat_id, text, kind, send_at, anchor_at, recurrence, max_occurrences, occurrences_sent, status, created_by, created_at, updated_at, last_sent_at, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.id.to_string())
        .bind(message.chat_id)
        .bind(&message.text)
        .bind(message.kind.to_string())
        .bind(format_datetime(&message.send_at))
        .bind(format_datetime(&message.anchor_at))
        .bind(message.recurrence.to_string())
        .bind(message.max_occurrences.map(i64::from))
        .bind(i64::from(message.occurrences_sent))
        .bind(message.status.to_string())
        .bind(message.created_by.map(|k| k.to_string()))
        .bind(format_datetime(&message.created_at))
        .bind(format_datetime(&message.updated_at))
        .bind(message.last_sent_at.as_ref().map(format_datetime))
        .bind(message.last_error.as_deref())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get(&self, id: &ScheduleId) -> Result<Option<ScheduledMessage>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM scheduled_messages WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.map(|r| ScheduleRow::from_row(&r).map_err(query_err)?.into_message())
            .transpose()
    }

    async fn update(&self, message: &ScheduledMessage) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE scheduled_messages SET text = ?, send_at = ?, occurrences_sent = ?, status = ?, updated_at = ?, last_sent_at = ?, last_error = ?
             WHERE id = ?",
        )
        .bind(&message.text)
        .bind(format_datetime(&message.send_at))
        .bind(i64::from(message.occurrences_sent))
        .bind(message.status.to_string())
        .bind(format_datetime(&message.updated_at))
        .bind(message.last_sent_at.as_ref().map(format_datetime))
        .bind(message.last_error.as_deref())
        .bind(message.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list(
        &self,
        chat_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<ScheduledMessage>, RepositoryError> {
        let status_clause = if active_only { ACTIVE } else { "1 = 1" };
        let rows = match chat_id {
            Some(chat_id) => {
                let sql = format!(
                    "SELECT * FROM scheduled_messages WHERE chat_id = ? AND {status_clause} ORDER BY send_at ASC"
                );
                sqlx::query(&sql)
                    .bind(chat_id)
                    .fetch_all(&self.pool.reader)
                    .await
            }
            None => {
                let sql = format!(
                    "SELECT * FROM scheduled_messages WHERE {status_clause} ORDER BY send_at ASC"
                );
                sqlx::query(&sql).fetch_all(&self.pool.reader).await
            }
        }
        .map_err(query_err)?;
        messages(rows)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM scheduled_messages WHERE status = ? AND send_at <= ? ORDER BY send_at ASC",
        )
        .bind(ScheduleStatus::Pending.to_string())
        .bind(format_datetime(&now))
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;
        messages(rows)
    }
}
