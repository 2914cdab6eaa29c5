use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use std::fmt;

use crate::auth::{ApiKeyId, Permission};

/// Static description a bot reports about itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotInfo {
    /// Unique, stable identifier ("keyword_responder").
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub description: String,
    /// Permissions the bot's identity key must hold before commands are routed to it.
    pub required_permissions: Vec<Permission>,
}

/// Bot lifecycle states, owned by the bot manager.
///
/// Created -> Registered -> Initializing -> Running -> Stopping -> Stopped -> Removed.
/// A failed initialization goes straight to Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotLifecycle {
    Created,
    Registered,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Removed,
}

impl BotLifecycle {
    /// Whether `start` is a valid transition from this state.
    pub fn can_start(&self) -> bool {
        matches!(self, BotLifecycle::Registered | BotLifecycle::Stopped)
    }
}

impl fmt::Display for BotLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BotLifecycle::Created => "created",
            BotLifecycle::Registered => "registered",
            BotLifecycle::Initializing => "initializing",
            BotLifecycle::Running => "running",
            BotLifecycle::Stopping => "stopping",
            BotLifecycle::Stopped => "stopped",
            BotLifecycle::Removed => "removed",
        };
        f.write_str(s)
    }
}

/// Per-bot counters maintained by the manager, never by the bot itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BotStats {
    pub messages_processed: u64,
    pub commands_executed: u64,
    pub errors_occurred: u64,
    pub total_execution_time_ms: u64,
    pub last_execution_time_ms: u64,
    pub last_active_at: Option<DateTime<Utc>>,
    pub registered_at: Option<DateTime<Utc>>,
}

impl BotStats {
    pub fn avg_execution_time_ms(&self) -> f64 {
        let runs = self.messages_processed + self.commands_executed;
        if runs == 0 {
            0.0
        } else {
            self.total_execution_time_ms as f64 / runs as f64
        }
    }

    /// Errors as a fraction of all deliveries and commands.
    pub fn error_rate(&self) -> f64 {
        let runs = self.messages_processed + self.commands_executed;
        if runs == 0 {
            0.0
        } else {
            self.errors_occurred as f64 / runs as f64
        }
    }
}

/// Point-in-time view of a managed bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSnapshot {
    pub info: BotInfo,
    pub lifecycle: BotLifecycle,
    pub enabled: bool,
    pub running: bool,
    pub identity_key_id: ApiKeyId,
    pub config: Map<String, Value>,
    pub subscriptions: Vec<String>,
    pub stats: BotStats,
}

/// Aggregate status across all bots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    pub total_bots: usize,
    pub running_bots: usize,
    pub enabled_bots: usize,
    pub total_messages_processed: u64,
    pub total_commands_executed: u64,
    pub total_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_rates() {
        let stats = BotStats {
            messages_processed: 3,
            commands_executed: 1,
            errors_occurred: 1,
            total_execution_time_ms: 40,
            ..Default::default()
        };
        assert_eq!(stats.avg_execution_time_ms(), 10.0);
        assert_eq!(stats.error_rate(), 0.25);
        assert_eq!(BotStats::default().error_rate(), 0.0);
    }

    #[test]
    fn test_lifecycle_start_transitions() {
        assert!(BotLifecycle::Registered.can_start());
        assert!(BotLifecycle::Stopped.can_start());
        assert!(!BotLifecycle::Running.can_start());
        assert!(!BotLifecycle::Removed.can_start());
    }
}
