//! SQLite audit trail.
//!
//! Append-only: rows are never updated, and only `purge_before` removes them.
//! Filtered queries and statistics are built with `QueryBuilder` so every
//! filter value is bound rather than interpolated.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Row, Sqlite};
use uuid::Uuid;

use switchboard_core::repository::AuditRepository;
use switchboard_types::audit::{AuditEvent, AuditFilter, AuditStatistics};
use switchboard_types::auth::ApiKeyId;
use switchboard_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_err};

pub struct SqliteAuditRepository {
    pool: DatabasePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

struct AuditRow {
    id: String,
    timestamp: String,
    kind: String,
    actor_key_id: Option<String>,
    tool_name: Option<String>,
    duration_ms: Option<i64>,
    status: String,
    correlation_id: Option<String>,
    detail: String,
}

impl AuditRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            timestamp: row.try_get("timestamp")?,
            kind: row.try_get("kind")?,
            actor_key_id: row.try_get("actor_key_id")?,
            tool_name: row.try_get("tool_name")?,
            duration_ms: row.try_get("duration_ms")?,
            status: row.try_get("status")?,
            correlation_id: row.try_get("correlation_id")?,
            detail: row.try_get("detail")?,
        })
    }

    fn into_event(self) -> Result<AuditEvent, RepositoryError> {
        let uuid = |s: &str| {
            Uuid::parse_str(s).map_err(|e| RepositoryError::Query(format!("invalid uuid: {e}")))
        };
        Ok(AuditEvent {
            id: uuid(&self.id)?,
            timestamp: parse_datetime(&self.timestamp)?,
            kind: self.kind.parse().map_err(RepositoryError::Query)?,
            actor_key_id: self
                .actor_key_id
                .as_deref()
                .map(|s| uuid(s).map(ApiKeyId::from_uuid))
                .transpose()?,
            tool_name: self.tool_name,
            duration_ms: self.duration_ms.map(|d| d.max(0) as u64),
            status: self.status.parse().map_err(RepositoryError::Query)?,
            correlation_id: self.correlation_id.as_deref().map(uuid).transpose()?,
            detail: serde_json::from_str(&self.detail)
                .map_err(|e| RepositoryError::Query(format!("invalid detail JSON: {e}")))?,
        })
    }
}

async fn insert_event<'e, E>(executor: E, event: &AuditEvent) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        "INSERT INTO audit_events (id, timestamp, kind, actor_key_id, tool_name, duration_ms, status, correlation_id, detail)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(format_datetime(&event.timestamp))
    .bind(event.kind.to_string())
    .bind(event.actor_key_id.map(|k| k.to_string()))
    .bind(event.tool_name.as_deref())
    .bind(event.duration_ms.map(|d| d as i64))
    .bind(event.status.to_string())
    .bind(event.correlation_id.map(|c| c.to_string()))
    .bind(event.detail.to_string())
    .execute(executor)
    .await
    .map_err(query_err)?;
    Ok(())
}

/// Start a statement with `select` and append a WHERE clause for `filter`.
fn filtered(select: &str, filter: &AuditFilter) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" WHERE 1 = 1");
    if let Some(kind) = filter.kind {
        qb.push(" AND kind = ").push_bind(kind.to_string());
    }
    if let Some(key_id) = filter.key_id {
        qb.push(" AND actor_key_id = ").push_bind(key_id.to_string());
    }
    if let Some(tool) = &filter.tool_name {
        qb.push(" AND tool_name = ").push_bind(tool.clone());
    }
    if let Some(since) = filter.since {
        qb.push(" AND timestamp >= ").push_bind(format_datetime(&since));
    }
    if let Some(until) = filter.until {
        qb.push(" AND timestamp <= ").push_bind(format_datetime(&until));
    }
    qb
}

impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        insert_event(&self.pool.writer, event).await
    }

    async fn append_batch(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        for event in events {
            insert_event(&mut *tx, event).await?;
        }
        tx.commit().await.map_err(query_err)?;
        tracing::trace!(count = events.len(), "audit batch committed");
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let mut qb = filtered("SELECT * FROM audit_events", filter);
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(limit as i64);

        let rows = qb
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;
        rows.iter()
            .map(|r| AuditRow::from_row(r).map_err(query_err)?.into_event())
            .collect()
    }

    async fn statistics(&self, filter: &AuditFilter) -> Result<AuditStatistics, RepositoryError> {
        let totals = filtered(
            "SELECT COUNT(*) AS total,
                    SUM(CASE WHEN status = 'failure' THEN 1 ELSE 0 END) AS failures,
                    SUM(CASE WHEN status = 'denied' THEN 1 ELSE 0 END) AS denials,
                    AVG(duration_ms) AS avg_duration
             FROM audit_events",
            filter,
        )
        .build()
        .fetch_one(&self.pool.reader)
        .await
        .map_err(query_err)?;

        let mut stats = AuditStatistics {
            total_events: totals.try_get::<i64, _>("total").map_err(query_err)? as u64,
            failures: totals
                .try_get::<Option<i64>, _>("failures")
                .map_err(query_err)?
                .unwrap_or(0) as u64,
            denials: totals
                .try_get::<Option<i64>, _>("denials")
                .map_err(query_err)?
                .unwrap_or(0) as u64,
            avg_duration_ms: totals.try_get("avg_duration").map_err(query_err)?,
            ..Default::default()
        };

        let mut by_kind = filtered("SELECT kind AS name, COUNT(*) AS n FROM audit_events", filter);
        by_kind.push(" GROUP BY kind");
        for row in by_kind
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?
        {
            let name: String = row.try_get("name").map_err(query_err)?;
            let n: i64 = row.try_get("n").map_err(query_err)?;
            stats.by_kind.insert(name, n as u64);
        }

        let mut by_tool = filtered(
            "SELECT tool_name AS name, COUNT(*) AS n FROM audit_events",
            filter,
        );
        by_tool.push(" AND tool_name IS NOT NULL GROUP BY tool_name");
        for row in by_tool
            .build()
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?
        {
            let name: String = row.try_get("name").map_err(query_err)?;
            let n: i64 = row.try_get("n").map_err(query_err)?;
            stats.by_tool.insert(name, n as u64);
        }

        Ok(stats)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM audit_events WHERE timestamp < ?")
            .bind(format_datetime(&cutoff))
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;
        Ok(result.rows_affected())
    }
}
