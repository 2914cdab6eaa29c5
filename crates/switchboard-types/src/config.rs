//! Global configuration types for Switchboard.
//!
//! `GlobalConfig` represents the top-level `config.toml`. Every section and
//! field has a default so a partial (or empty) file is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration, loaded from `~/.switchboard/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub bots: BotsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7420
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a single tool handler run.
    #[serde(default = "default_handler_timeout_secs")]
    pub handler_timeout_secs: u64,
}

fn default_handler_timeout_secs() -> u64 {
    60
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            handler_timeout_secs: default_handler_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Upper bound on every messaging backend call.
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_backend_timeout_secs() -> u64 {
    30
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_backend_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
    /// Buffered records before a forced flush.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_flush_interval_secs() -> u64 {
    5
}

fn default_buffer_capacity() -> usize {
    256
}

fn default_retention_days() -> u32 {
    90
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
            buffer_capacity: default_buffer_capacity(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_concurrency")]
    pub default_concurrency: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub default_inter_batch_delay_ms: u64,
    #[serde(default = "default_max_targets")]
    pub max_targets: usize,
}

fn default_concurrency() -> usize {
    5
}

fn default_max_concurrency() -> usize {
    50
}

fn default_max_targets() -> usize {
    1000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            default_concurrency: default_concurrency(),
            max_concurrency: default_max_concurrency(),
            default_inter_batch_delay_ms: 0,
            max_targets: default_max_targets(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_max_concurrent_sends")]
    pub max_concurrent_sends: usize,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_sends() -> usize {
    8
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            max_concurrent_sends: default_max_concurrent_sends(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotsConfig {
    /// Upper bound on a single event delivery to a bot.
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    /// Start enabled bots as soon as they are registered.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

fn default_auto_start() -> bool {
    true
}

impl Default for BotsConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: default_delivery_timeout_secs(),
            auto_start: default_auto_start(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.server.port, 7420);
        assert_eq!(config.scheduler.tick_interval_secs, 60);
        assert_eq!(config.batch.default_concurrency, 5);
        assert_eq!(config.audit.retention_days, 90);
        assert!(config.bots.auto_start);
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.backend.timeout_secs, 30);
        assert_eq!(config.dispatch.handler_timeout_secs, 60);
    }

    #[test]
    fn test_global_config_partial_section() {
        let toml_str = r#"
[scheduler]
tick_interval_secs = 15

[batch]
max_targets = 20
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.scheduler.tick_interval_secs, 15);
        assert_eq!(config.scheduler.max_concurrent_sends, 8);
        assert_eq!(config.batch.max_targets, 20);
        assert_eq!(config.batch.max_concurrency, 50);
    }
}
