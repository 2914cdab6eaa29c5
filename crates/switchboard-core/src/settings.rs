//! Durations and limits the services need, derived from `GlobalConfig`.

use std::time::Duration;

use switchboard_types::config::GlobalConfig;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub handler_timeout: Duration,
    pub backend_timeout: Duration,
    pub audit_flush_interval: Duration,
    pub audit_buffer_capacity: usize,
    pub audit_retention: chrono::Duration,
    pub batch_default_concurrency: usize,
    pub batch_max_concurrency: usize,
    pub batch_default_delay: Duration,
    pub batch_max_targets: usize,
    pub scheduler_tick: Duration,
    pub scheduler_max_concurrent_sends: usize,
    pub bot_delivery_timeout: Duration,
    pub bot_auto_start: bool,
}

impl RuntimeSettings {
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            handler_timeout: Duration::from_secs(config.dispatch.handler_timeout_secs.max(1)),
            backend_timeout: Duration::from_secs(config.backend.timeout_secs.max(1)),
            audit_flush_interval: Duration::from_secs(config.audit.flush_interval_secs.max(1)),
            audit_buffer_capacity: config.audit.buffer_capacity.max(1),
            audit_retention: chrono::Duration::days(i64::from(config.audit.retention_days)),
            batch_default_concurrency: config.batch.default_concurrency.max(1),
            batch_max_concurrency: config.batch.max_concurrency.max(1),
            batch_default_delay: Duration::from_millis(config.batch.default_inter_batch_delay_ms),
            batch_max_targets: config.batch.max_targets.max(1),
            scheduler_tick: Duration::from_secs(config.scheduler.tick_interval_secs.max(1)),
            scheduler_max_concurrent_sends: config.scheduler.max_concurrent_sends.max(1),
            bot_delivery_timeout: Duration::from_secs(config.bots.delivery_timeout_secs.max(1)),
            bot_auto_start: config.bots.auto_start,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&GlobalConfig::default())
    }
}
