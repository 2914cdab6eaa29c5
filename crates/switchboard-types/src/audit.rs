//! Audit trail types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::ApiKeyId;

/// Category of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    ToolInvoked,
    ToolCompleted,
    AuthEvent,
    BackendOp,
    SystemEvent,
    Error,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditEventKind::ToolInvoked => "tool_invoked",
            AuditEventKind::ToolCompleted => "tool_completed",
            AuditEventKind::AuthEvent => "auth_event",
            AuditEventKind::BackendOp => "backend_op",
            AuditEventKind::SystemEvent => "system_event",
            AuditEventKind::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for AuditEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool_invoked" => Ok(AuditEventKind::ToolInvoked),
            "tool_completed" => Ok(AuditEventKind::ToolCompleted),
            "auth_event" => Ok(AuditEventKind::AuthEvent),
            "backend_op" => Ok(AuditEventKind::BackendOp),
            "system_event" => Ok(AuditEventKind::SystemEvent),
            "error" => Ok(AuditEventKind::Error),
            other => Err(format!("invalid audit event kind: '{other}'")),
        }
    }
}

/// Outcome recorded on an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Started,
    Success,
    Failure,
    Granted,
    Denied,
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditStatus::Started => "started",
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
            AuditStatus::Granted => "granted",
            AuditStatus::Denied => "denied",
        };
        f.write_str(s)
    }
}

impl FromStr for AuditStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(AuditStatus::Started),
            "success" => Ok(AuditStatus::Success),
            "failure" => Ok(AuditStatus::Failure),
            "granted" => Ok(AuditStatus::Granted),
            "denied" => Ok(AuditStatus::Denied),
            other => Err(format!("invalid audit status: '{other}'")),
        }
    }
}

/// An append-only audit record.
///
/// `correlation_id` ties a `ToolCompleted` record to the `ToolInvoked`
/// record written before the handler ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: AuditEventKind,
    pub actor_key_id: Option<ApiKeyId>,
    pub tool_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub status: AuditStatus,
    pub correlation_id: Option<Uuid>,
    pub detail: Value,
}

impl AuditEvent {
    pub fn new(kind: AuditEventKind, status: AuditStatus, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            timestamp,
            kind,
            actor_key_id: None,
            tool_name: None,
            duration_ms: None,
            status,
            correlation_id: None,
            detail: Value::Null,
        }
    }

    pub fn with_actor(mut self, key_id: Option<ApiKeyId>) -> Self {
        self.actor_key_id = key_id;
        self
    }

    pub fn with_tool(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = Some(tool_name.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Filter for audit queries. All fields are conjunctive; `None` matches anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub kind: Option<AuditEventKind>,
    pub key_id: Option<ApiKeyId>,
    pub tool_name: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.kind.is_none_or(|k| k == event.kind)
            && self.key_id.is_none_or(|k| Some(k) == event.actor_key_id)
            && self
                .tool_name
                .as_ref()
                .is_none_or(|t| event.tool_name.as_ref() == Some(t))
            && self.since.is_none_or(|s| event.timestamp >= s)
            && self.until.is_none_or(|u| event.timestamp <= u)
    }
}

/// File layout for an audit export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// One JSON array.
    Json,
    /// One event per line.
    #[default]
    Jsonl,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
        })
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            other => Err(format!("invalid export format: '{other}'")),
        }
    }
}

/// Aggregate counts over a window of the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_events: u64,
    pub by_kind: BTreeMap<String, u64>,
    pub by_tool: BTreeMap<String, u64>,
    pub failures: u64,
    pub denials: u64,
    pub avg_duration_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in [
            AuditEventKind::ToolInvoked,
            AuditEventKind::ToolCompleted,
            AuditEventKind::AuthEvent,
            AuditEventKind::BackendOp,
            AuditEventKind::SystemEvent,
            AuditEventKind::Error,
        ] {
            assert_eq!(kind.to_string().parse::<AuditEventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_export_format_parse() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("ndjson".parse::<ExportFormat>().unwrap(), ExportFormat::Jsonl);
        assert_eq!(ExportFormat::default().to_string(), "jsonl");
        assert!("csv".parse::<ExportFormat>().is_err());
    }

    #[test]
    fn test_filter_matches_conjunctively() {
        let key = ApiKeyId::new();
        let now = Utc::now();
        let event = AuditEvent::new(AuditEventKind::AuthEvent, AuditStatus::Denied, now)
            .with_actor(Some(key))
            .with_tool("send_message");

        assert!(AuditFilter::default().matches(&event));
        let filter = AuditFilter {
            kind: Some(AuditEventKind::AuthEvent),
            key_id: Some(key),
            tool_name: Some("send_message".into()),
            since: Some(now),
            until: Some(now),
        };
        assert!(filter.matches(&event));

        let other_tool = AuditFilter {
            tool_name: Some("edit_message".into()),
            ..Default::default()
        };
        assert!(!other_tool.matches(&event));

        let other_key = AuditFilter {
            key_id: Some(ApiKeyId::new()),
            ..Default::default()
        };
        assert!(!other_key.matches(&event));
    }
}
