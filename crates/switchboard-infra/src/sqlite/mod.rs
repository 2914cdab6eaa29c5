//! SQLite storage layer.
//!
//! Repository implementations backed by SQLite with WAL mode and split
//! read/write connection pools.

pub mod api_key;
pub mod audit;
pub mod batch;
pub mod bot_state;
pub mod pool;
pub mod schedule;

pub use api_key::SqliteApiKeyRepository;
pub use audit::SqliteAuditRepository;
pub use batch::SqliteBatchJobRepository;
pub use bot_state::SqliteBotStateRepository;
pub use pool::DatabasePool;
pub use schedule::SqliteScheduleRepository;

use chrono::{DateTime, SecondsFormat, Utc};
use switchboard_types::error::RepositoryError;

/// Timestamps are stored as fixed-width UTC strings so that text
/// comparison in SQL orders them chronologically.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn parse_opt_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    s.as_deref().map(parse_datetime).transpose()
}

pub(crate) fn query_err(e: sqlx::Error) -> RepositoryError {
    match &e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        _ => RepositoryError::Query(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn formatted_timestamps_sort_as_text() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let later = whole + chrono::Duration::milliseconds(5);
        assert!(format_datetime(&whole) < format_datetime(&later));
        assert_eq!(format_datetime(&whole), "2026-01-01T12:00:00.000000Z");
        assert_eq!(parse_datetime(&format_datetime(&later)).unwrap(), later);
    }
}
