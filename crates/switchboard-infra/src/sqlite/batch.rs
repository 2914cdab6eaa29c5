//! SQLite batch job store.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;

use switchboard_core::repository::BatchJobRepository;
use switchboard_types::batch::{BatchJob, BatchJobId, BatchStatus};
use switchboard_types::error::RepositoryError;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, parse_opt_datetime, query_err};

pub struct SqliteBatchJobRepository {
    pool: DatabasePool,
}

impl SqliteBatchJobRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn from_json<T: DeserializeOwned>(column: &str, raw: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(raw).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<BatchJob, RepositoryError> {
    let text = |name: &str| row.try_get::<String, _>(name).map_err(query_err);
    let opt_text = |name: &str| row.try_get::<Option<String>, _>(name).map_err(query_err);

    Ok(BatchJob {
        id: text("id")?
            .parse()
            .map_err(|e| RepositoryError::Query(format!("invalid batch id: {e}")))?,
        operation: text("operation")?,
        params: from_json("params", &text("params")?)?,
        targets: from_json("targets", &text("targets")?)?,
        options: from_json("options", &text("options")?)?,
        status: text("status")?.parse().map_err(RepositoryError::Query)?,
        results: from_json("results", &text("results")?)?,
        error: opt_text("error")?,
        submitted_by: opt_text("submitted_by")?
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| RepositoryError::Query(format!("invalid key id: {e}")))?,
        created_at: parse_datetime(&text("created_at")?)?,
        started_at: parse_opt_datetime(opt_text("started_at")?)?,
        finished_at: parse_opt_datetime(opt_text("finished_at")?)?,
    })
}

impl BatchJobRepository for SqliteBatchJobRepository {
    async fn save(&self, job: &BatchJob) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO batch_jobs (id, operation, params, targets, options, status, results, error, submitted_by, created_at, started_at, finished_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                results = excluded.results,
                error = excluded.error,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at",
        )
        .bind(job.id.to_string())
        .bind(&job.operation)
        .bind(to_json(&job.params)?)
        .bind(to_json(&job.targets)?)
        .bind(to_json(&job.options)?)
        .bind(job.status.to_string())
        .bind(to_json(&job.results)?)
        .bind(job.error.as_deref())
        .bind(job.submitted_by.map(|k| k.to_string()))
        .bind(format_datetime(&job.created_at))
        .bind(job.started_at.as_ref().map(format_datetime))
        .bind(job.finished_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;
        Ok(())
    }

    async fn get(&self, id: &BatchJobId) -> Result<Option<BatchJob>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM batch_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn list(
        &self,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> Result<Vec<BatchJob>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM batch_jobs WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(status.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM batch_jobs ORDER BY created_at DESC, id DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(query_err)?;
        rows.iter().map(job_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;
    use chrono::{Duration, TimeZone, Utc};
    use switchboard_types::batch::{BatchOptions, BatchParams, TargetResult};

    fn job(minute: u32) -> BatchJob {
        BatchJob {
            id: BatchJobId::new(),
            operation: "pin_messages".into(),
            params: BatchParams {
                chat_id: Some(-100),
                ..Default::default()
            },
            targets: vec![1, 2, 3],
            options: BatchOptions::default(),
            status: BatchStatus::Pending,
            results: Vec::new(),
            error: None,
            submitted_by: None,
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap(),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn save_is_an_upsert() {
        let repo = SqliteBatchJobRepository::new(test_pool().await);
        let mut j = job(0);
        repo.save(&j).await.unwrap();

        j.status = BatchStatus::PartiallyFailed;
        j.started_at = Some(j.created_at);
        j.finished_at = Some(j.created_at + Duration::seconds(2));
        j.results = vec![
            TargetResult::success(1),
            TargetResult::failure(2, "message not found"),
            TargetResult::success(3),
        ];
        repo.save(&j).await.unwrap();

        let loaded = repo.get(&j.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::PartiallyFailed);
        assert_eq!(loaded.results, j.results);
        assert_eq!(loaded.params.chat_id, Some(-100));
        assert_eq!(loaded.finished_at, j.finished_at);
        assert_eq!(loaded.succeeded(), 2);
        assert!(repo.get(&BatchJobId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_newest_first_with_status_filter() {
        let repo = SqliteBatchJobRepository::new(test_pool().await);
        let older = job(1);
        let mut newer = job(2);
        newer.status = BatchStatus::Completed;
        repo.save(&older).await.unwrap();
        repo.save(&newer).await.unwrap();

        let all = repo.list(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer.id);

        let completed = repo.list(Some(BatchStatus::Completed), 10).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(repo.list(None, 1).await.unwrap().len(), 1);
    }
}
