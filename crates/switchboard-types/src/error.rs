use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;

use crate::auth::Permission;
use crate::tool::FieldError;

/// Errors from repository operations (used by trait definitions in switchboard-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Failures reported by the messaging backend.
///
/// Kept distinct from authorization failures so callers can tell
/// "you may not" from "the platform could not".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("chat {0} not found")]
    ChatNotFound(i64),

    #[error("message {message_id} not found in chat {chat_id}")]
    MessageNotFound { chat_id: i64, message_id: i64 },

    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Errors related to API keys and permission checks.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("invalid role: '{0}'")]
    InvalidRole(String),

    #[error("custom permission list must not be empty")]
    EmptyPermissions,

    #[error("api key not found")]
    KeyNotFound,

    #[error("new expiry must be in the future")]
    InvalidExpiry,

    /// Unknown, expired or revoked key.
    #[error("api key is invalid, expired or revoked")]
    Invalid,

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors related to the audit trail.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("audit export failed: {0}")]
    Export(String),
}

impl From<RepositoryError> for AuditError {
    fn from(err: RepositoryError) -> Self {
        AuditError::StoreUnavailable(err.to_string())
    }
}

/// Errors related to bot registration and lifecycle.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("bot '{0}' not found")]
    NotFound(String),

    #[error("bot '{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("bot '{bot_id}' failed to initialize: {reason}")]
    InitFailure { bot_id: String, reason: String },

    #[error("bot '{bot_id}' cannot {action} while {state}")]
    InvalidTransition {
        bot_id: String,
        action: &'static str,
        state: String,
    },

    #[error("bot '{0}' is not running")]
    NotRunning(String),

    #[error("bot identity lacks permission '{0}'")]
    PermissionDenied(Permission),

    #[error("bot command failed: {0}")]
    CommandFailed(String),

    #[error("bot '{0}' did not respond in time")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors related to scheduled messages.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("scheduled message not found")]
    NotFound,

    #[error("scheduled message was already sent")]
    AlreadySent,

    #[error("scheduled message is already {0}")]
    AlreadyTerminal(String),

    #[error("cannot {action} a {status} scheduled message")]
    InvalidTransition {
        action: &'static str,
        status: String,
    },

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Errors related to batch jobs.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch job not found")]
    NotFound,

    #[error("batch job is already {0}")]
    AlreadyTerminal(String),

    #[error("cannot {action} a {status} batch job")]
    InvalidTransition {
        action: &'static str,
        status: String,
    },

    #[error("batch has {count} targets, limit is {limit}")]
    TooManyTargets { count: usize, limit: usize },

    #[error("storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// Caller-facing error taxonomy for tool dispatch.
///
/// Every component error converts into this so handlers can use `?`.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool '{0}' not found")]
    ToolNotFound(String),

    #[error("invalid parameters")]
    InvalidParams(Vec<FieldError>),

    #[error("permission denied: missing '{0}'")]
    PermissionDenied(Permission),

    #[error("api key is invalid, expired or revoked")]
    AuthInvalid,

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("already sent")]
    AlreadySent,

    #[error("already in a terminal state: {0}")]
    AlreadyTerminal(String),

    #[error("tool '{0}' is already registered")]
    DuplicateTool(String),

    #[error("bot initialization failed: {0}")]
    BotInitFailure(String),

    #[error("rate limited")]
    RateLimited,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("persistent store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Wire error code for the outbound `{errorCode}` field.
    pub fn code(&self) -> &'static str {
        match self {
            ToolError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            ToolError::InvalidParams(_) => "INVALID_PARAMS",
            ToolError::PermissionDenied(_) => "PERMISSION_DENIED",
            ToolError::AuthInvalid => "AUTH_INVALID",
            ToolError::Backend(_) => "BACKEND_ERROR",
            ToolError::AlreadySent => "ALREADY_SENT",
            ToolError::AlreadyTerminal(_) => "ALREADY_TERMINAL",
            ToolError::DuplicateTool(_) => "DUPLICATE_TOOL",
            ToolError::BotInitFailure(_) => "BOT_INIT_FAILURE",
            ToolError::RateLimited => "RATE_LIMITED",
            ToolError::NotFound(_) => "NOT_FOUND",
            ToolError::InvalidRequest(_) => "INVALID_REQUEST",
            ToolError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            ToolError::Timeout(_) => "TIMEOUT",
            ToolError::Internal(_) => "INTERNAL",
        }
    }

    /// Structured detail for the outbound `{detail}` field, when there is any.
    pub fn detail(&self) -> Option<Value> {
        match self {
            ToolError::InvalidParams(fields) => Some(json!({ "fields": fields })),
            ToolError::PermissionDenied(permission) => {
                Some(json!({ "missingPermission": permission }))
            }
            _ => None,
        }
    }

    /// Shorthand for a single-field validation failure raised inside a handler.
    pub fn invalid_param(field: &str, message: impl Into<String>) -> Self {
        ToolError::InvalidParams(vec![FieldError::new(field, message)])
    }
}

impl From<RepositoryError> for ToolError {
    fn from(err: RepositoryError) -> Self {
        ToolError::StoreUnavailable(err.to_string())
    }
}

impl From<AuditError> for ToolError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::StoreUnavailable(msg) => ToolError::StoreUnavailable(msg),
            export @ AuditError::Export(_) => ToolError::InvalidRequest(export.to_string()),
        }
    }
}

impl From<AccessError> for ToolError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::InvalidRole(role) => {
                ToolError::invalid_param("role", format!("unknown role '{role}'"))
            }
            AccessError::EmptyPermissions => {
                ToolError::invalid_param("permissions", "must not be empty")
            }
            AccessError::KeyNotFound => ToolError::NotFound("api key".to_string()),
            AccessError::InvalidExpiry => {
                ToolError::invalid_param("expires_at", "must be in the future")
            }
            AccessError::Invalid => ToolError::AuthInvalid,
            AccessError::Storage(e) => e.into(),
        }
    }
}

impl From<BotError> for ToolError {
    fn from(err: BotError) -> Self {
        match err {
            BotError::NotFound(id) => ToolError::NotFound(format!("bot '{id}'")),
            failure @ BotError::InitFailure { .. } => ToolError::BotInitFailure(failure.to_string()),
            BotError::PermissionDenied(permission) => ToolError::PermissionDenied(permission),
            BotError::Storage(e) => e.into(),
            other => ToolError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<ScheduleError> for ToolError {
    fn from(err: ScheduleError) -> Self {
        match err {
            ScheduleError::NotFound => ToolError::NotFound("scheduled message".to_string()),
            ScheduleError::AlreadySent => ToolError::AlreadySent,
            ScheduleError::AlreadyTerminal(status) => ToolError::AlreadyTerminal(status),
            ScheduleError::InvalidSchedule(msg) => ToolError::invalid_param("schedule", msg),
            ScheduleError::Storage(e) => e.into(),
            other @ ScheduleError::InvalidTransition { .. } => {
                ToolError::InvalidRequest(other.to_string())
            }
        }
    }
}

impl From<BatchError> for ToolError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::NotFound => ToolError::NotFound("batch job".to_string()),
            BatchError::AlreadyTerminal(status) => ToolError::AlreadyTerminal(status),
            other @ BatchError::InvalidTransition { .. } => {
                ToolError::InvalidRequest(other.to_string())
            }
            too_many @ BatchError::TooManyTargets { .. } => {
                ToolError::invalid_param("targets", too_many.to_string())
            }
            BatchError::Storage(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_permission_denied_names_permission() {
        let err = ToolError::PermissionDenied(Permission::SEND_MESSAGES);
        assert_eq!(err.code(), "PERMISSION_DENIED");
        assert!(err.to_string().contains("send:messages"));
        assert_eq!(err.detail().unwrap()["missingPermission"], "send:messages");
    }

    #[test]
    fn test_backend_error_is_distinct_from_permission_error() {
        let err: ToolError = BackendError::ChatNotFound(9).into();
        assert_eq!(err.code(), "BACKEND_ERROR");
    }

    #[test]
    fn test_store_failures_map_to_store_unavailable() {
        let err: ToolError = AuditError::StoreUnavailable("disk full".into()).into();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        let err: ToolError = ScheduleError::Storage(RepositoryError::Connection).into();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_schedule_state_errors() {
        assert_eq!(ToolError::from(ScheduleError::AlreadySent).code(), "ALREADY_SENT");
        assert_eq!(
            ToolError::from(ScheduleError::AlreadyTerminal("cancelled".into())).code(),
            "ALREADY_TERMINAL"
        );
    }

    #[test]
    fn test_invalid_params_detail_lists_fields() {
        let err = ToolError::invalid_param("chat_id", "is required");
        let detail = err.detail().unwrap();
        assert_eq!(detail["fields"][0]["field"], "chat_id");
    }
}
