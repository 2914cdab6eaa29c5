//! Bulk operation jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::ApiKeyId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchJobId(pub Uuid);

impl BatchJobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BatchJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchJobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Supported bulk operations. Targets are message ids within `chat_id`,
/// except for `SendMessage` where targets are chat ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    DeleteMessages,
    ForwardMessages,
    PinMessages,
    UnpinMessages,
    AddReaction,
    SendMessage,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::DeleteMessages => "delete_messages",
            OperationKind::ForwardMessages => "forward_messages",
            OperationKind::PinMessages => "pin_messages",
            OperationKind::UnpinMessages => "unpin_messages",
            OperationKind::AddReaction => "add_reaction",
            OperationKind::SendMessage => "send_message",
        };
        f.write_str(s)
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delete_messages" => Ok(OperationKind::DeleteMessages),
            "forward_messages" => Ok(OperationKind::ForwardMessages),
            "pin_messages" => Ok(OperationKind::PinMessages),
            "unpin_messages" => Ok(OperationKind::UnpinMessages),
            "add_reaction" => Ok(OperationKind::AddReaction),
            "send_message" => Ok(OperationKind::SendMessage),
            other => Err(format!("unknown operation kind: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    /// Held between windows until resumed or cancelled.
    Paused,
    PartiallyFailed,
    Completed,
    /// The job could not start (empty targets, unknown operation, missing parameters).
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::PartiallyFailed
                | BatchStatus::Completed
                | BatchStatus::Failed
                | BatchStatus::Cancelled
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Paused => "paused",
            BatchStatus::PartiallyFailed => "partially_failed",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "running" => Ok(BatchStatus::Running),
            "paused" => Ok(BatchStatus::Paused),
            "partially_failed" => Ok(BatchStatus::PartiallyFailed),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            "cancelled" => Ok(BatchStatus::Cancelled),
            other => Err(format!("invalid batch status: '{other}'")),
        }
    }
}

/// Operation-specific parameters shared by every target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchParams {
    pub chat_id: Option<i64>,
    pub to_chat_id: Option<i64>,
    pub text: Option<String>,
    pub emoji: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Maximum operations in flight at once.
    pub concurrency_limit: usize,
    /// Pause after each concurrency window.
    pub inter_batch_delay_ms: u64,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
            inter_batch_delay_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: i64,
    pub ok: bool,
    pub error: Option<String>,
}

impl TargetResult {
    pub fn success(target: i64) -> Self {
        Self {
            target,
            ok: true,
            error: None,
        }
    }

    pub fn failure(target: i64, error: impl Into<String>) -> Self {
        Self {
            target,
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// A submitted bulk operation and its per-target outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: BatchJobId,
    /// Operation name as submitted, kept even when unrecognized.
    pub operation: String,
    pub params: BatchParams,
    pub targets: Vec<i64>,
    pub options: BatchOptions,
    pub status: BatchStatus,
    /// Outcomes in target order; grows as targets complete.
    pub results: Vec<TargetResult>,
    /// Why the job could not start, for `Failed` jobs.
    pub error: Option<String>,
    pub submitted_by: Option<ApiKeyId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.ok).count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| !r.ok).count()
    }

    /// Fraction of targets attempted so far.
    pub fn progress(&self) -> f64 {
        if self.targets.is_empty() {
            1.0
        } else {
            self.results.len() as f64 / self.targets.len() as f64
        }
    }
}

/// Counts of jobs by status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub total_jobs: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub partially_failed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub targets_succeeded: usize,
    pub targets_failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_kind_parse() {
        assert_eq!(
            "delete_messages".parse::<OperationKind>().unwrap(),
            OperationKind::DeleteMessages
        );
        assert!("explode_messages".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Running.is_terminal());
        assert!(!BatchStatus::Paused.is_terminal());
        assert_eq!("paused".parse::<BatchStatus>().unwrap(), BatchStatus::Paused);
        assert!(BatchStatus::PartiallyFailed.is_terminal());
        assert!(BatchStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_default_options() {
        let opts = BatchOptions::default();
        assert_eq!(opts.concurrency_limit, 5);
        assert_eq!(opts.inter_batch_delay_ms, 0);
    }
}
