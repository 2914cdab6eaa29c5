//! Bot lifecycle, routing and manager-owned statistics.
//!
//! Each bot moves through Registered -> Initializing -> Running -> Stopping
//! -> Stopped -> Removed. Lifecycle operations on one bot serialize on that
//! bot's transition lock; event delivery only reads the current state.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use switchboard_types::auth::ApiKeyId;
use switchboard_types::bot::{BotInfo, BotLifecycle, BotSnapshot, BotStats, SystemStatus};
use switchboard_types::error::BotError;
use switchboard_types::event::{BackendEvent, Message};

use super::context::{BotContext, CONFIG_KEY, ENABLED_KEY};
use super::contract::BoxBot;
use crate::audit::AuditLog;
use crate::auth::AccessControl;
use crate::clock::Clock;
use crate::event::{DeliveryReport, EventBus, EventHandler, handler_fn};
use crate::repository::BoxBotStateRepository;
use crate::settings::RuntimeSettings;
use crate::tool::Dispatcher;

struct Runtime {
    lifecycle: BotLifecycle,
    enabled: bool,
    config: Map<String, Value>,
}

struct ManagedBot {
    id: String,
    info: BotInfo,
    identity: ApiKeyId,
    bot: BoxBot,
    runtime: Mutex<Runtime>,
    stats: Mutex<BotStats>,
    transition: tokio::sync::Mutex<()>,
}

#[derive(Clone, Copy)]
enum RunKind {
    Message,
    Command,
}

impl ManagedBot {
    fn runtime(&self) -> std::sync::MutexGuard<'_, Runtime> {
        self.runtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn stats(&self) -> std::sync::MutexGuard<'_, BotStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lifecycle(&self) -> BotLifecycle {
        self.runtime().lifecycle
    }

    fn set_lifecycle(&self, lifecycle: BotLifecycle) {
        self.runtime().lifecycle = lifecycle;
    }

    fn is_enabled(&self) -> bool {
        self.runtime().enabled
    }

    fn is_live(&self) -> bool {
        let rt = self.runtime();
        rt.lifecycle == BotLifecycle::Running && rt.enabled
    }

    fn record_run(&self, kind: RunKind, elapsed_ms: u64, failed: bool, now: DateTime<Utc>) {
        let mut stats = self.stats();
        match kind {
            RunKind::Message => stats.messages_processed += 1,
            RunKind::Command => stats.commands_executed += 1,
        }
        if failed {
            stats.errors_occurred += 1;
        }
        stats.total_execution_time_ms += elapsed_ms;
        stats.last_execution_time_ms = elapsed_ms;
        stats.last_active_at = Some(now);
    }

    fn record_error(&self) {
        self.stats().errors_occurred += 1;
    }

    fn transition_error(&self, action: &'static str, state: impl ToString) -> BotError {
        BotError::InvalidTransition {
            bot_id: self.id.clone(),
            action,
            state: state.to_string(),
        }
    }
}

pub struct BotManager {
    bots: DashMap<String, Arc<ManagedBot>>,
    bus: EventBus,
    access: Arc<AccessControl>,
    audit: Arc<AuditLog>,
    state: Arc<BoxBotStateRepository>,
    dispatcher: Weak<Dispatcher>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    auto_start: bool,
}

impl BotManager {
    pub fn new(
        bus: EventBus,
        access: Arc<AccessControl>,
        audit: Arc<AuditLog>,
        state: Arc<BoxBotStateRepository>,
        dispatcher: Weak<Dispatcher>,
        clock: Arc<dyn Clock>,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            bots: DashMap::new(),
            bus,
            access,
            audit,
            state,
            dispatcher,
            clock,
            call_timeout: settings.bot_delivery_timeout,
            auto_start: settings.bot_auto_start,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn entry(&self, bot_id: &str) -> Result<Arc<ManagedBot>, BotError> {
        self.bots
            .get(bot_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| BotError::NotFound(bot_id.to_string()))
    }

    /// Register a bot under its reported id, acting as `identity`.
    ///
    /// Persisted config and enabled flag from an earlier registration win
    /// over the bot's defaults. Enabled bots are started right away when
    /// auto-start is on; a failed start leaves the bot registered but stopped.
    pub async fn register_bot(
        &self,
        bot: BoxBot,
        identity: ApiKeyId,
        enabled: bool,
    ) -> Result<BotSnapshot, BotError> {
        let info = bot.info();
        let id = info.id.clone();
        if self.bots.contains_key(&id) {
            return Err(BotError::AlreadyRegistered(id));
        }

        let mut config = bot.default_config();
        if let Some(Value::Object(saved)) = self.state.get(&id, CONFIG_KEY).await? {
            config.extend(saved);
        }
        let enabled = match self.state.get(&id, ENABLED_KEY).await? {
            Some(Value::Bool(saved)) => saved,
            _ => enabled,
        };
        self.state
            .set(&id, CONFIG_KEY, &Value::Object(config.clone()))
            .await?;

        let now = self.clock.now();
        let entry = Arc::new(ManagedBot {
            id: id.clone(),
            info,
            identity,
            bot,
            runtime: Mutex::new(Runtime {
                lifecycle: BotLifecycle::Registered,
                enabled,
                config,
            }),
            stats: Mutex::new(BotStats {
                registered_at: Some(now),
                ..Default::default()
            }),
            transition: tokio::sync::Mutex::new(()),
        });
        match self.bots.entry(id.clone()) {
            Entry::Occupied(_) => return Err(BotError::AlreadyRegistered(id)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }

        tracing::info!(bot_id = %id, enabled, "registered bot");
        self.audit
            .record_system("bot_registered", json!({ "bot_id": id, "enabled": enabled }))
            .await;

        if enabled && self.auto_start {
            if let Err(e) = self.start_bot(&id).await {
                tracing::warn!(bot_id = %id, error = %e, "auto-start failed");
            }
        }
        self.get_bot(&id).ok_or(BotError::NotFound(id))
    }

    pub async fn start_bot(&self, bot_id: &str) -> Result<(), BotError> {
        let entry = self.entry(bot_id)?;
        let _guard = entry.transition.lock().await;
        self.start_locked(&entry).await
    }

    pub async fn stop_bot(&self, bot_id: &str) -> Result<(), BotError> {
        let entry = self.entry(bot_id)?;
        let _guard = entry.transition.lock().await;
        self.stop_locked(&entry).await
    }

    /// Stop (if running) and start again without leaving the registry.
    pub async fn restart_bot(&self, bot_id: &str) -> Result<(), BotError> {
        let entry = self.entry(bot_id)?;
        let _guard = entry.transition.lock().await;
        if entry.lifecycle() == BotLifecycle::Running {
            self.stop_locked(&entry).await?;
        }
        self.start_locked(&entry).await
    }

    pub async fn unregister_bot(&self, bot_id: &str) -> Result<(), BotError> {
        let entry = self.entry(bot_id)?;
        let _guard = entry.transition.lock().await;
        if entry.lifecycle() == BotLifecycle::Running {
            self.stop_locked(&entry).await?;
        }
        entry.set_lifecycle(BotLifecycle::Removed);
        self.bots.remove(bot_id);
        tracing::info!(bot_id, "unregistered bot");
        self.audit
            .record_system("bot_unregistered", json!({ "bot_id": bot_id }))
            .await;
        Ok(())
    }

    async fn start_locked(&self, entry: &Arc<ManagedBot>) -> Result<(), BotError> {
        let state = entry.lifecycle();
        if !state.can_start() {
            return Err(entry.transition_error("start", state));
        }
        if !entry.is_enabled() {
            return Err(entry.transition_error("start", "disabled"));
        }
        authorize(&self.access, &self.audit, entry).await?;

        entry.set_lifecycle(BotLifecycle::Initializing);
        let ctx = BotContext::new(
            entry.id.clone(),
            entry.identity,
            self.dispatcher.clone(),
            Arc::clone(&self.state),
            self.bus.clone(),
        );
        let init = AssertUnwindSafe(entry.bot.on_initialize(ctx)).catch_unwind();
        let failure = match tokio::time::timeout(self.call_timeout, init).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(reason))) => Some(reason),
            Ok(Err(_)) => Some("panicked during initialization".to_string()),
            Err(_) => Some(format!("initialization timed out after {:?}", self.call_timeout)),
        };

        if let Some(reason) = failure {
            self.bus.unsubscribe_all(&entry.id);
            entry.set_lifecycle(BotLifecycle::Stopped);
            entry.record_error();
            tracing::warn!(bot_id = %entry.id, reason, "bot failed to initialize");
            self.audit
                .record_error(&format!("initialize bot '{}'", entry.id), &reason)
                .await;
            return Err(BotError::InitFailure {
                bot_id: entry.id.clone(),
                reason,
            });
        }

        self.bus.attach(&entry.id, self.event_handler(Arc::clone(entry)));
        entry.set_lifecycle(BotLifecycle::Running);
        tracing::info!(bot_id = %entry.id, "started bot");
        self.audit
            .record_system("bot_started", json!({ "bot_id": entry.id }))
            .await;
        Ok(())
    }

    async fn stop_locked(&self, entry: &Arc<ManagedBot>) -> Result<(), BotError> {
        if entry.lifecycle() != BotLifecycle::Running {
            return Err(BotError::NotRunning(entry.id.clone()));
        }
        entry.set_lifecycle(BotLifecycle::Stopping);
        self.bus.detach(&entry.id);
        self.bus.unsubscribe_all(&entry.id);

        let shutdown = AssertUnwindSafe(entry.bot.on_shutdown()).catch_unwind();
        match tokio::time::timeout(self.call_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                entry.record_error();
                tracing::warn!(bot_id = %entry.id, "bot panicked during shutdown");
            }
            Err(_) => {
                entry.record_error();
                tracing::warn!(bot_id = %entry.id, "bot shutdown timed out");
            }
        }

        entry.set_lifecycle(BotLifecycle::Stopped);
        tracing::info!(bot_id = %entry.id, "stopped bot");
        self.audit
            .record_system("bot_stopped", json!({ "bot_id": entry.id }))
            .await;
        Ok(())
    }

    /// Delivery callback attached to the bus while the bot runs.
    fn event_handler(&self, entry: Arc<ManagedBot>) -> EventHandler {
        let access = Arc::clone(&self.access);
        let audit = Arc::clone(&self.audit);
        let clock = Arc::clone(&self.clock);
        handler_fn(move |event: BackendEvent| {
            let entry = Arc::clone(&entry);
            let access = Arc::clone(&access);
            let audit = Arc::clone(&audit);
            let clock = Arc::clone(&clock);
            async move {
                if !entry.is_live() {
                    return Ok(());
                }
                authorize(&access, &audit, &entry)
                    .await
                    .map_err(|e| e.to_string())?;

                let started = Instant::now();
                let result = match AssertUnwindSafe(entry.bot.on_event(&event))
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err("bot panicked".to_string()),
                };
                entry.record_run(
                    RunKind::Message,
                    elapsed_ms(started),
                    result.is_err(),
                    clock.now(),
                );
                result
            }
        })
    }

    /// Publish a received message to every subscribed, running bot.
    pub async fn dispatch_message(&self, message: Message) -> DeliveryReport {
        self.bus.publish(BackendEvent::MessageReceived(message)).await
    }

    pub async fn dispatch_event(&self, event: BackendEvent) -> DeliveryReport {
        self.bus.publish(event).await
    }

    /// Forward every event from a backend stream to subscribed bots until
    /// `cancel` fires or the stream closes. Events dropped because the pump
    /// fell behind are logged and skipped.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<BackendEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!("backend event pump started");
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    received = events.recv() => received,
                };
                match event {
                    Ok(event) => {
                        let kind = event.kind();
                        let report = manager.dispatch_event(event).await;
                        tracing::debug!(
                            %kind,
                            delivered = report.delivered,
                            failed = report.failed,
                            "backend event dispatched"
                        );
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "backend event pump lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::info!("backend event pump stopped");
        })
    }

    /// Run a command on a running bot after checking its identity's grants.
    pub async fn dispatch_command(
        &self,
        bot_id: &str,
        command: &str,
        args: Value,
    ) -> Result<Value, BotError> {
        let entry = self.entry(bot_id)?;
        if !entry.is_live() {
            return Err(BotError::NotRunning(bot_id.to_string()));
        }
        authorize(&self.access, &self.audit, &entry).await?;

        let started = Instant::now();
        let call = AssertUnwindSafe(entry.bot.on_command(command, &args)).catch_unwind();
        let result = match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(BotError::CommandFailed(message)),
            Ok(Err(_)) => Err(BotError::CommandFailed("bot panicked".to_string())),
            Err(_) => Err(BotError::Timeout(bot_id.to_string())),
        };
        entry.record_run(
            RunKind::Command,
            elapsed_ms(started),
            result.is_err(),
            self.clock.now(),
        );

        if let Err(e) = &result {
            tracing::warn!(bot_id, command, error = %e, "bot command failed");
            self.audit
                .record_error(&format!("command '{command}' on bot '{bot_id}'"), &e.to_string())
                .await;
        }
        result
    }

    pub fn get_bot(&self, bot_id: &str) -> Option<BotSnapshot> {
        let entry = self.entry(bot_id).ok()?;
        Some(self.snapshot(&entry))
    }

    /// All bots, sorted by id.
    pub fn list_bots(&self) -> Vec<BotSnapshot> {
        let entries: Vec<Arc<ManagedBot>> = self.bots.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out: Vec<BotSnapshot> = entries.iter().map(|e| self.snapshot(e)).collect();
        out.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        out
    }

    fn snapshot(&self, entry: &ManagedBot) -> BotSnapshot {
        let (lifecycle, enabled, config) = {
            let rt = entry.runtime();
            (rt.lifecycle, rt.enabled, rt.config.clone())
        };
        BotSnapshot {
            info: entry.info.clone(),
            lifecycle,
            enabled,
            running: lifecycle == BotLifecycle::Running,
            identity_key_id: entry.identity,
            config,
            subscriptions: self
                .bus
                .subscriptions_of(&entry.id)
                .into_iter()
                .map(|k| k.to_string())
                .collect(),
            stats: entry.stats().clone(),
        }
    }

    pub fn is_registered(&self, bot_id: &str) -> bool {
        self.bots.contains_key(bot_id)
    }

    pub fn is_running(&self, bot_id: &str) -> bool {
        self.entry(bot_id)
            .map(|e| e.lifecycle() == BotLifecycle::Running)
            .unwrap_or(false)
    }

    pub fn bot_stats(&self, bot_id: &str) -> Option<BotStats> {
        self.entry(bot_id).ok().map(|e| e.stats().clone())
    }

    /// Zero a bot's counters. The registration time is kept.
    pub fn reset_stats(&self, bot_id: &str) -> Result<(), BotError> {
        let entry = self.entry(bot_id)?;
        let mut stats = entry.stats();
        let registered_at = stats.registered_at;
        *stats = BotStats {
            registered_at,
            ..Default::default()
        };
        Ok(())
    }

    pub fn get_bot_config(&self, bot_id: &str) -> Result<Map<String, Value>, BotError> {
        Ok(self.entry(bot_id)?.runtime().config.clone())
    }

    /// Replace a bot's config and persist it.
    pub async fn save_bot_config(
        &self,
        bot_id: &str,
        config: Map<String, Value>,
    ) -> Result<(), BotError> {
        let entry = self.entry(bot_id)?;
        self.state
            .set(bot_id, CONFIG_KEY, &Value::Object(config.clone()))
            .await?;
        entry.runtime().config = config;
        tracing::debug!(bot_id, "saved bot config");
        Ok(())
    }

    /// Enable or disable a bot. A disabled bot keeps its state but receives
    /// no events or commands.
    pub async fn set_enabled(&self, bot_id: &str, enabled: bool) -> Result<(), BotError> {
        let entry = self.entry(bot_id)?;
        self.state
            .set(bot_id, ENABLED_KEY, &Value::Bool(enabled))
            .await?;
        entry.runtime().enabled = enabled;
        tracing::info!(bot_id, enabled, "bot enabled flag changed");
        Ok(())
    }

    /// Stop every running bot.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.bots.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if self.is_running(&id) {
                if let Err(e) = self.stop_bot(&id).await {
                    tracing::warn!(bot_id = %id, error = %e, "failed to stop bot");
                }
            }
        }
    }

    pub fn system_status(&self) -> SystemStatus {
        let mut status = SystemStatus::default();
        for entry in self.bots.iter() {
            let bot = entry.value();
            status.total_bots += 1;
            if bot.lifecycle() == BotLifecycle::Running {
                status.running_bots += 1;
            }
            if bot.is_enabled() {
                status.enabled_bots += 1;
            }
            let stats = bot.stats();
            status.total_messages_processed += stats.messages_processed;
            status.total_commands_executed += stats.commands_executed;
            status.total_errors += stats.errors_occurred;
        }
        status
    }
}

/// Every permission the bot declares must be granted to its identity.
async fn authorize(
    access: &AccessControl,
    audit: &AuditLog,
    entry: &ManagedBot,
) -> Result<(), BotError> {
    for permission in &entry.info.required_permissions {
        let granted = access
            .check_permission(&entry.identity, permission)
            .await
            .unwrap_or(false);
        audit
            .record_auth(Some(entry.identity), permission, granted, None)
            .await;
        if !granted {
            return Err(BotError::PermissionDenied(permission.clone()));
        }
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
