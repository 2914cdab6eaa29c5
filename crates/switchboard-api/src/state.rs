//! Application state wiring all services together.
//!
//! `AppState` pins the core services to the SQLite repositories and the
//! loopback backend. Both the CLI commands and the HTTP handlers use it.
//!
//! Construction order matters: the dispatcher exists before the bot
//! manager (which only holds a `Weak` to it), and the built-in tools are
//! registered last because their closures hold the other services.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use switchboard_core::audit::AuditLog;
use switchboard_core::auth::{AccessControl, CreateKeyRequest, CreatedKey};
use switchboard_core::backend::BoxMessagingBackend;
use switchboard_core::batch::BatchExecutor;
use switchboard_core::bot::{BotManager, BoxBot, KEYWORD_BOT_ID, KeywordResponderBot};
use switchboard_core::clock::{Clock, SystemClock};
use switchboard_core::event::EventBus;
use switchboard_core::repository::{
    BoxApiKeyRepository, BoxAuditRepository, BoxBatchJobRepository, BoxBotStateRepository,
    BoxScheduleRepository,
};
use switchboard_core::scheduler::Scheduler;
use switchboard_core::settings::RuntimeSettings;
use switchboard_core::tool::{Dispatcher, ToolRegistry};
use switchboard_core::tools::{ToolServices, register_builtin_tools};
use switchboard_infra::backend::LoopbackBackend;
use switchboard_infra::config::{load_global_config, resolve_data_dir};
use switchboard_infra::crypto::hash::Sha256SecretHasher;
use switchboard_infra::sqlite::{
    DatabasePool, SqliteApiKeyRepository, SqliteAuditRepository, SqliteBatchJobRepository,
    SqliteBotStateRepository, SqliteScheduleRepository,
};
use switchboard_types::auth::{ApiKeyId, Role};
use switchboard_types::config::GlobalConfig;

const BOOTSTRAP_KEY_NAME: &str = "bootstrap admin";
const RETENTION_SWEEP: std::time::Duration = std::time::Duration::from_secs(3600);

/// Shared application state holding all services.
#[derive(Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
    pub settings: RuntimeSettings,
    pub db_pool: DatabasePool,
    pub loopback: LoopbackBackend,
    pub backend: Arc<BoxMessagingBackend>,
    pub access: Arc<AccessControl>,
    pub audit: Arc<AuditLog>,
    pub dispatcher: Arc<Dispatcher>,
    pub bots: Arc<BotManager>,
    pub scheduler: Arc<Scheduler>,
    pub batch: Arc<BatchExecutor>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Resolve the data directory, load `config.toml`, open the database
    /// and wire every service.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;
        let config = load_global_config(&data_dir).await;
        let db_pool = DatabasePool::open(&data_dir).await?;
        Self::build(data_dir, config, db_pool).await
    }

    pub async fn build(
        data_dir: PathBuf,
        config: GlobalConfig,
        db_pool: DatabasePool,
    ) -> anyhow::Result<Self> {
        let settings = RuntimeSettings::from_config(&config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let loopback = LoopbackBackend::new();
        let backend = Arc::new(BoxMessagingBackend::new(
            loopback.clone(),
            settings.backend_timeout,
        ));

        let access = Arc::new(
            AccessControl::load(
                BoxApiKeyRepository::new(SqliteApiKeyRepository::new(db_pool.clone())),
                Arc::new(Sha256SecretHasher::new()),
                clock.clone(),
            )
            .await?,
        );
        let audit = Arc::new(AuditLog::new(
            BoxAuditRepository::new(SqliteAuditRepository::new(db_pool.clone())),
            clock.clone(),
            settings.audit_buffer_capacity,
        ));

        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            access.clone(),
            audit.clone(),
            settings.handler_timeout,
        ));
        let bots = Arc::new(BotManager::new(
            EventBus::new(audit.clone(), settings.bot_delivery_timeout),
            access.clone(),
            audit.clone(),
            Arc::new(BoxBotStateRepository::new(SqliteBotStateRepository::new(
                db_pool.clone(),
            ))),
            Arc::downgrade(&dispatcher),
            clock.clone(),
            &settings,
        ));
        let scheduler = Arc::new(Scheduler::new(
            BoxScheduleRepository::new(SqliteScheduleRepository::new(db_pool.clone())),
            backend.clone(),
            audit.clone(),
            clock.clone(),
            settings.scheduler_max_concurrent_sends,
        ));
        let batch = Arc::new(BatchExecutor::new(
            backend.clone(),
            BoxBatchJobRepository::new(SqliteBatchJobRepository::new(db_pool.clone())),
            audit.clone(),
            clock.clone(),
            &settings,
        ));

        let started_at = clock.now();
        let services = ToolServices {
            backend: backend.clone(),
            access: access.clone(),
            audit: audit.clone(),
            scheduler: scheduler.clone(),
            batch: batch.clone(),
            bots: bots.clone(),
            clock,
            started_at,
            export_dir: data_dir.join("exports"),
        };
        register_builtin_tools(&registry, &services)?;
        tracing::debug!(tools = registry.len(), data_dir = %data_dir.display(), "services wired");

        Ok(Self {
            data_dir,
            config,
            settings,
            db_pool,
            loopback,
            backend,
            access,
            audit,
            dispatcher,
            bots,
            scheduler,
            batch,
            started_at,
        })
    }

    /// Issue an admin key when the store has none at all. Returns the new
    /// key (with its one-time secret) when one was created.
    pub async fn ensure_admin_key(&self) -> anyhow::Result<Option<CreatedKey>> {
        if !self.access.list_keys(true).await.is_empty() {
            return Ok(None);
        }
        let created = self
            .access
            .create_key(CreateKeyRequest {
                name: BOOTSTRAP_KEY_NAME.to_string(),
                role: Role::Admin.to_string(),
                custom_permissions: None,
                expires_at: None,
            })
            .await?;
        self.audit
            .record_system("api_key_created", serde_json::json!({ "key_id": created.key.id, "bootstrap": true }))
            .await;
        tracing::info!(key_id = %created.key.id, "bootstrap admin key issued");
        Ok(Some(created))
    }

    /// Identity key for a bot: reuse the active bot-role key named after
    /// it, or issue one.
    async fn bot_identity(&self, bot_id: &str) -> anyhow::Result<ApiKeyId> {
        let name = format!("bot:{bot_id}");
        if let Some(existing) = self
            .access
            .list_keys(false)
            .await
            .into_iter()
            .find(|k| k.name == name && k.role == Role::Bot)
        {
            return Ok(existing.id);
        }
        let created = self
            .access
            .create_key(CreateKeyRequest {
                name,
                role: Role::Bot.to_string(),
                custom_permissions: None,
                expires_at: None,
            })
            .await?;
        Ok(created.key.id)
    }

    /// Register the bots that ship with the binary.
    pub async fn register_builtin_bots(&self) -> anyhow::Result<()> {
        let identity = self.bot_identity(KEYWORD_BOT_ID).await?;
        self.bots
            .register_bot(BoxBot::new(KeywordResponderBot::new()), identity, true)
            .await?;
        Ok(())
    }

    /// Start the audit flusher, the scheduler loop, the retention sweep and
    /// the pump feeding backend events to bots. All stop when `cancel` fires.
    pub fn spawn_background(&self, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let audit = self.audit.clone();
        let retention = self.settings.audit_retention;
        let sweep_cancel = cancel.clone();
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_SWEEP);
            loop {
                tokio::select! {
                    _ = sweep_cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match audit.purge_older_than(retention).await {
                            Ok(0) => {}
                            Ok(removed) => tracing::info!(removed, "audit retention sweep"),
                            Err(e) => tracing::error!(error = %e, "audit retention sweep failed"),
                        }
                    }
                }
            }
        });

        let mut handles = vec![
            self.audit
                .spawn_flusher(self.settings.audit_flush_interval, cancel.clone()),
            self.scheduler
                .spawn(self.settings.scheduler_tick, cancel.clone()),
            sweep,
        ];
        match self.backend.subscribe_events() {
            Some(events) => handles.push(self.bots.spawn_event_pump(events, cancel.clone())),
            None => tracing::warn!("backend has no event stream, bots receive no platform events"),
        }
        handles
    }

    /// Stop bots and batch jobs, then flush the audit buffer.
    pub async fn shutdown(&self) {
        self.bots.shutdown().await;
        self.batch.shutdown();
        if let Err(e) = self.audit.shutdown().await {
            tracing::error!(error = %e, "audit flush on shutdown failed");
        }
        self.db_pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use switchboard_types::audit::{AuditEventKind, AuditFilter};
    use switchboard_types::tool::{ToolCall, ToolResponse};

    /// A fully wired state over a fresh SQLite file.
    pub(crate) async fn test_state() -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open(dir.path()).await.unwrap();
        let state = AppState::build(dir.path().to_path_buf(), GlobalConfig::default(), pool)
            .await
            .unwrap();
        (state, dir)
    }

    #[tokio::test]
    async fn bootstrap_key_is_issued_once() {
        let (state, _dir) = test_state().await;
        let first = state.ensure_admin_key().await.unwrap().unwrap();
        assert!(first.secret.expose_secret().starts_with("sbk_"));
        assert_eq!(first.key.role, Role::Admin);
        assert!(state.ensure_admin_key().await.unwrap().is_none());

        let validated = state.access.validate(first.secret.expose_secret()).await.unwrap();
        assert_eq!(validated, first.key.id);
    }

    #[tokio::test]
    async fn tool_call_end_to_end_on_sqlite() {
        let (state, _dir) = test_state().await;
        let admin = state.ensure_admin_key().await.unwrap().unwrap().key.id;

        let response = state
            .dispatcher
            .handle(ToolCall {
                tool_name: "send_message".into(),
                params: json!({"chat_id": 12, "text": "hello"}),
                caller_key_id: admin,
            })
            .await;
        let ToolResponse::Ok { result } = response else {
            panic!("send failed: {response:?}");
        };
        let message_id = result["message_id"].as_i64().unwrap();

        let fetched = state
            .dispatcher
            .dispatch(&admin, "get_message", json!({"chat_id": 12, "message_id": message_id}))
            .await
            .unwrap();
        assert_eq!(fetched["text"], "hello");

        state.audit.flush().await.unwrap();
        let invocations = state
            .audit
            .query(
                &AuditFilter {
                    kind: Some(AuditEventKind::ToolInvoked),
                    ..Default::default()
                },
                10,
            )
            .await
            .unwrap();
        assert_eq!(invocations.len(), 2);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn keyword_bot_survives_restart_of_state() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DatabasePool::open(dir.path()).await.unwrap();
        let state = AppState::build(dir.path().to_path_buf(), GlobalConfig::default(), pool.clone())
            .await
            .unwrap();
        state.register_builtin_bots().await.unwrap();
        assert!(state.bots.is_running(KEYWORD_BOT_ID));
        let keys_before = state.access.list_keys(false).await.len();

        let again = AppState::build(dir.path().to_path_buf(), GlobalConfig::default(), pool)
            .await
            .unwrap();
        again.register_builtin_bots().await.unwrap();
        assert_eq!(again.access.list_keys(false).await.len(), keys_before);
    }

    #[tokio::test]
    async fn background_tasks_stop_on_cancel() {
        let (state, _dir) = test_state().await;
        let cancel = CancellationToken::new();
        let handles = state.spawn_background(&cancel);
        assert_eq!(handles.len(), 4);
        cancel.cancel();
        for handle in handles {
            tokio::time::timeout(std::time::Duration::from_secs(5), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn injected_message_reaches_keyword_bot() {
        let (state, _dir) = test_state().await;
        state.register_builtin_bots().await.unwrap();
        let cancel = CancellationToken::new();
        let handles = state.spawn_background(&cancel);

        state.loopback.inject(77, 5, "I need help");
        let mut replies = Vec::new();
        for _ in 0..100 {
            replies = state
                .backend
                .list_messages(77, 10)
                .await
                .unwrap()
                .into_iter()
                .filter(|m| m.sender_id.is_none())
                .collect();
            if !replies.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(replies.len(), 1);
        assert!(replies[0].text.contains("keyword"));
        assert_eq!(
            state.bots.bot_stats(KEYWORD_BOT_ID).unwrap().messages_processed,
            1
        );

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
        state.shutdown().await;
    }
}
