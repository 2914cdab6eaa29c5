//! In-memory fakes shared by the unit tests in this crate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use switchboard_types::audit::{AuditEvent, AuditFilter, AuditStatistics, AuditStatus};
use switchboard_types::auth::{ApiKey, ApiKeyId};
use switchboard_types::batch::{BatchJob, BatchJobId, BatchStatus};
use switchboard_types::error::{BackendError, RepositoryError};
use switchboard_types::event::Message;
use switchboard_types::schedule::{ScheduleId, ScheduledMessage};

use crate::backend::MessagingBackend;
use crate::hash::SecretHasher;
use crate::repository::{
    ApiKeyRepository, AuditRepository, BatchJobRepository, BotStateRepository,
    ScheduleRepository,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

/// Reversible "hash" that keeps test failures readable.
pub struct PlainHasher;

impl SecretHasher for PlainHasher {
    fn hash_secret(&self, secret: &str) -> String {
        secret.bytes().map(|b| format!("{b:02x}")).collect()
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MemoryApiKeys {
    keys: Arc<Mutex<HashMap<ApiKeyId, ApiKey>>>,
}

impl ApiKeyRepository for MemoryApiKeys {
    async fn create(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        lock(&self.keys).insert(key.id, key.clone());
        Ok(())
    }

    async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, RepositoryError> {
        Ok(lock(&self.keys).get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ApiKey>, RepositoryError> {
        let mut keys: Vec<ApiKey> = lock(&self.keys).values().cloned().collect();
        keys.sort_by_key(|k| k.created_at);
        Ok(keys)
    }

    async fn update(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        let mut keys = lock(&self.keys);
        match keys.get_mut(&key.id) {
            Some(existing) => {
                *existing = key.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn touch_last_used(&self, id: &ApiKeyId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        if let Some(k) = lock(&self.keys).get_mut(id) {
            k.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn delete(&self, id: &ApiKeyId) -> Result<(), RepositoryError> {
        lock(&self.keys)
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

#[derive(Clone, Default)]
pub struct MemoryAudit {
    events: Arc<Mutex<Vec<AuditEvent>>>,
    unavailable: Arc<AtomicBool>,
    appends: Arc<AtomicUsize>,
}

impl MemoryAudit {
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Everything persisted so far, in insertion order.
    pub fn stored(&self) -> Vec<AuditEvent> {
        lock(&self.events).clone()
    }

    /// Number of append/append_batch calls that reached the store.
    pub fn append_calls(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Connection)
        } else {
            Ok(())
        }
    }
}

impl AuditRepository for MemoryAudit {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        self.check()?;
        self.appends.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).push(event.clone());
        Ok(())
    }

    async fn append_batch(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        self.check()?;
        self.appends.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).extend_from_slice(events);
        Ok(())
    }

    async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        self.check()?;
        let mut matching: Vec<AuditEvent> = lock(&self.events)
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn statistics(&self, filter: &AuditFilter) -> Result<AuditStatistics, RepositoryError> {
        self.check()?;
        let events = lock(&self.events);
        let mut stats = AuditStatistics::default();
        let mut durations = Vec::new();
        for e in events.iter().filter(|e| filter.matches(e)) {
            stats.total_events += 1;
            *stats.by_kind.entry(e.kind.to_string()).or_default() += 1;
            if let Some(tool) = &e.tool_name {
                *stats.by_tool.entry(tool.clone()).or_default() += 1;
            }
            match e.status {
                AuditStatus::Failure => stats.failures += 1,
                AuditStatus::Denied => stats.denials += 1,
                _ => {}
            }
            if let Some(d) = e.duration_ms {
                durations.push(d as f64);
            }
        }
        if !durations.is_empty() {
            stats.avg_duration_ms = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        Ok(stats)
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.check()?;
        let mut events = lock(&self.events);
        let before = events.len();
        events.retain(|e| e.timestamp >= cutoff);
        Ok((before - events.len()) as u64)
    }
}

#[derive(Clone, Default)]
pub struct MemoryBotState {
    entries: Arc<Mutex<HashMap<(String, String), Value>>>,
}

impl BotStateRepository for MemoryBotState {
    async fn get(&self, bot_id: &str, key: &str) -> Result<Option<Value>, RepositoryError> {
        Ok(lock(&self.entries)
            .get(&(bot_id.to_string(), key.to_string()))
            .cloned())
    }

    async fn set(&self, bot_id: &str, key: &str, value: &Value) -> Result<(), RepositoryError> {
        lock(&self.entries).insert((bot_id.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    async fn delete(&self, bot_id: &str, key: &str) -> Result<bool, RepositoryError> {
        Ok(lock(&self.entries)
            .remove(&(bot_id.to_string(), key.to_string()))
            .is_some())
    }

    async fn list_keys(&self, bot_id: &str) -> Result<Vec<String>, RepositoryError> {
        let mut keys: Vec<String> = lock(&self.entries)
            .keys()
            .filter(|(b, _)| b == bot_id)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[derive(Clone, Default)]
pub struct MemorySchedules {
    entries: Arc<Mutex<HashMap<ScheduleId, ScheduledMessage>>>,
}

impl ScheduleRepository for MemorySchedules {
    async fn insert(&self, message: &ScheduledMessage) -> Result<(), RepositoryError> {
        lock(&self.entries).insert(message.id, message.clone());
        Ok(())
    }

    async fn get(&self, id: &ScheduleId) -> Result<Option<ScheduledMessage>, RepositoryError> {
        Ok(lock(&self.entries).get(id).cloned())
    }

    async fn update(&self, message: &ScheduledMessage) -> Result<(), RepositoryError> {
        let mut entries = lock(&self.entries);
        match entries.get_mut(&message.id) {
            Some(existing) => {
                *existing = message.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn list(
        &self,
        chat_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<ScheduledMessage>, RepositoryError> {
        let mut out: Vec<ScheduledMessage> = lock(&self.entries)
            .values()
            .filter(|m| chat_id.is_none_or(|c| m.chat_id == c))
            .filter(|m| !active_only || !m.status.is_terminal())
            .cloned()
            .collect();
        out.sort_by_key(|m| m.send_at);
        Ok(out)
    }

    async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, RepositoryError> {
        let mut out: Vec<ScheduledMessage> = lock(&self.entries)
            .values()
            .filter(|m| m.is_due(now))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.send_at);
        Ok(out)
    }
}

#[derive(Clone, Default)]
pub struct MemoryBatchJobs {
    jobs: Arc<Mutex<HashMap<BatchJobId, BatchJob>>>,
}

impl MemoryBatchJobs {
    pub fn saved(&self, id: &BatchJobId) -> Option<BatchJob> {
        lock(&self.jobs).get(id).cloned()
    }
}

impl BatchJobRepository for MemoryBatchJobs {
    async fn save(&self, job: &BatchJob) -> Result<(), RepositoryError> {
        lock(&self.jobs).insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: &BatchJobId) -> Result<Option<BatchJob>, RepositoryError> {
        Ok(lock(&self.jobs).get(id).cloned())
    }

    async fn list(
        &self,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> Result<Vec<BatchJob>, RepositoryError> {
        let mut out: Vec<BatchJob> = lock(&self.jobs)
            .values()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeBackendState {
    messages: HashMap<(i64, i64), Message>,
    next_id: i64,
    sent: Vec<(i64, String)>,
    ops: Vec<String>,
    failing: HashSet<i64>,
    latency: Duration,
    in_flight: usize,
    max_in_flight: usize,
}

/// Scriptable backend: records every call and fails for chosen ids.
///
/// A "failing" id makes any call fail whose chat id or message id equals it.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeBackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, id: i64) {
        lock(&self.state).failing.insert(id);
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failing.clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        lock(&self.state).latency = latency;
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        lock(&self.state).sent.clone()
    }

    pub fn ops(&self) -> Vec<String> {
        lock(&self.state).ops.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        lock(&self.state).max_in_flight
    }

    pub fn seed_message(&self, chat_id: i64, message_id: i64, text: &str) {
        lock(&self.state).messages.insert(
            (chat_id, message_id),
            Message {
                chat_id,
                message_id,
                sender_id: None,
                text: text.to_string(),
                timestamp: Utc::now(),
                pinned: false,
                reactions: Vec::new(),
            },
        );
    }

    async fn enter(&self, op: String, ids: &[i64]) -> Result<(), BackendError> {
        let latency = {
            let mut s = lock(&self.state);
            s.ops.push(op.clone());
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
            s.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let mut s = lock(&self.state);
        s.in_flight -= 1;
        if ids.iter().any(|id| s.failing.contains(id)) {
            return Err(BackendError::Rejected(format!("{op} failed")));
        }
        Ok(())
    }
}

impl MessagingBackend for FakeBackend {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, BackendError> {
        self.enter(format!("send:{chat_id}"), &[chat_id]).await?;
        let mut s = lock(&self.state);
        s.next_id += 1;
        let id = s.next_id;
        s.sent.push((chat_id, text.to_string()));
        s.messages.insert(
            (chat_id, id),
            Message {
                chat_id,
                message_id: id,
                sender_id: None,
                text: text.to_string(),
                timestamp: Utc::now(),
                pinned: false,
                reactions: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), BackendError> {
        self.enter(format!("edit:{chat_id}:{message_id}"), &[chat_id, message_id])
            .await?;
        let mut s = lock(&self.state);
        match s.messages.get_mut(&(chat_id, message_id)) {
            Some(m) => {
                m.text = text.to_string();
                Ok(())
            }
            None => Err(BackendError::MessageNotFound { chat_id, message_id }),
        }
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.enter(format!("delete:{chat_id}:{message_id}"), &[chat_id, message_id])
            .await?;
        lock(&self.state).messages.remove(&(chat_id, message_id));
        Ok(())
    }

    async fn forward_message(
        &self,
        from_chat_id: i64,
        to_chat_id: i64,
        message_id: i64,
    ) -> Result<(), BackendError> {
        self.enter(
            format!("forward:{from_chat_id}:{to_chat_id}:{message_id}"),
            &[from_chat_id, to_chat_id, message_id],
        )
        .await
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.enter(format!("pin:{chat_id}:{message_id}"), &[chat_id, message_id])
            .await
    }

    async fn unpin_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.enter(format!("unpin:{chat_id}:{message_id}"), &[chat_id, message_id])
            .await
    }

    async fn add_reaction(&self, chat_id: i64, message_id: i64, emoji: &str) -> Result<(), BackendError> {
        self.enter(
            format!("react:{chat_id}:{message_id}:{emoji}"),
            &[chat_id, message_id],
        )
        .await
    }

    async fn get_message(&self, chat_id: i64, message_id: i64) -> Result<Message, BackendError> {
        self.enter(format!("get:{chat_id}:{message_id}"), &[chat_id, message_id])
            .await?;
        lock(&self.state)
            .messages
            .get(&(chat_id, message_id))
            .cloned()
            .ok_or(BackendError::MessageNotFound { chat_id, message_id })
    }

    async fn list_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<Message>, BackendError> {
        self.enter(format!("list:{chat_id}"), &[chat_id]).await?;
        let s = lock(&self.state);
        let mut msgs: Vec<Message> = s
            .messages
            .values()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        msgs.sort_by(|a, b| b.message_id.cmp(&a.message_id));
        msgs.truncate(limit);
        Ok(msgs)
    }
}
