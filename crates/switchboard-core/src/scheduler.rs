//! Persistent one-shot, delayed and recurring message delivery.
//!
//! The repository is the source of truth; nothing is cached between ticks.
//! Every read-modify-write of an entry (claiming due entries, recording a
//! send, cancel/pause/resume/update) runs under `state_lock`. Backend sends
//! run outside the lock, bounded by a semaphore, and a claim set keeps two
//! overlapping ticks from sending the same entry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use switchboard_types::auth::ApiKeyId;
use switchboard_types::error::ScheduleError;
use switchboard_types::schedule::{
    Recurrence, ScheduleId, ScheduleKind, ScheduleStatus, ScheduledMessage, TickReport,
};

use crate::audit::AuditLog;
use crate::backend::BoxMessagingBackend;
use crate::clock::Clock;
use crate::repository::BoxScheduleRepository;

pub struct Scheduler {
    repo: BoxScheduleRepository,
    backend: Arc<BoxMessagingBackend>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    state_lock: tokio::sync::Mutex<()>,
    claimed: Mutex<HashSet<ScheduleId>>,
    sends: Semaphore,
}

/// Removes a claim when the delivery that owns it finishes, however it ends.
struct Claim<'a> {
    set: &'a Mutex<HashSet<ScheduleId>>,
    id: ScheduleId,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

enum Delivery {
    Sent,
    Failed,
    Skipped,
}

impl Scheduler {
    pub fn new(
        repo: BoxScheduleRepository,
        backend: Arc<BoxMessagingBackend>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        max_concurrent_sends: usize,
    ) -> Self {
        Self {
            repo,
            backend,
            audit,
            clock,
            state_lock: tokio::sync::Mutex::new(()),
            claimed: Mutex::new(HashSet::new()),
            sends: Semaphore::new(max_concurrent_sends.max(1)),
        }
    }

    pub async fn schedule_once(
        &self,
        chat_id: i64,
        text: &str,
        send_at: DateTime<Utc>,
        created_by: Option<ApiKeyId>,
    ) -> Result<ScheduledMessage, ScheduleError> {
        self.create(
            chat_id,
            text,
            ScheduleKind::Once,
            send_at,
            Recurrence::None,
            None,
            created_by,
        )
        .await
    }

    pub async fn schedule_recurring(
        &self,
        chat_id: i64,
        text: &str,
        start_at: DateTime<Utc>,
        recurrence: Recurrence,
        max_occurrences: Option<u32>,
        created_by: Option<ApiKeyId>,
    ) -> Result<ScheduledMessage, ScheduleError> {
        if recurrence == Recurrence::None {
            return Err(ScheduleError::InvalidSchedule(
                "recurring schedule needs a recurrence".to_string(),
            ));
        }
        if max_occurrences == Some(0) {
            return Err(ScheduleError::InvalidSchedule(
                "max_occurrences must be at least 1".to_string(),
            ));
        }
        self.create(
            chat_id,
            text,
            ScheduleKind::Recurring,
            start_at,
            recurrence,
            max_occurrences,
            created_by,
        )
        .await
    }

    pub async fn schedule_delayed(
        &self,
        chat_id: i64,
        text: &str,
        delay_seconds: i64,
        created_by: Option<ApiKeyId>,
    ) -> Result<ScheduledMessage, ScheduleError> {
        if delay_seconds <= 0 {
            return Err(ScheduleError::InvalidSchedule(
                "delay_seconds must be positive".to_string(),
            ));
        }
        let send_at = TimeDelta::try_seconds(delay_seconds)
            .and_then(|delay| self.clock.now().checked_add_signed(delay))
            .ok_or_else(|| {
                ScheduleError::InvalidSchedule("delay_seconds is out of range".to_string())
            })?;
        self.create(
            chat_id,
            text,
            ScheduleKind::Delayed,
            send_at,
            Recurrence::None,
            None,
            created_by,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn create(
        &self,
        chat_id: i64,
        text: &str,
        kind: ScheduleKind,
        send_at: DateTime<Utc>,
        recurrence: Recurrence,
        max_occurrences: Option<u32>,
        created_by: Option<ApiKeyId>,
    ) -> Result<ScheduledMessage, ScheduleError> {
        if text.trim().is_empty() {
            return Err(ScheduleError::InvalidSchedule("text is empty".to_string()));
        }
        let now = self.clock.now();
        let message = ScheduledMessage {
            id: ScheduleId::new(),
            chat_id,
            text: text.to_string(),
            kind,
            send_at,
            anchor_at: send_at,
            recurrence,
            max_occurrences,
            occurrences_sent: 0,
            status: ScheduleStatus::Pending,
            created_by,
            created_at: now,
            updated_at: now,
            last_sent_at: None,
            last_error: None,
        };
        self.repo.insert(&message).await?;
        tracing::info!(
            schedule_id = %message.id,
            chat_id,
            %kind,
            %recurrence,
            send_at = %message.send_at,
            "scheduled message"
        );
        Ok(message)
    }

    pub async fn get(&self, id: &ScheduleId) -> Result<ScheduledMessage, ScheduleError> {
        self.repo.get(id).await?.ok_or(ScheduleError::NotFound)
    }

    pub async fn list(
        &self,
        chat_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<ScheduledMessage>, ScheduleError> {
        Ok(self.repo.list(chat_id, active_only).await?)
    }

    /// Entries that can still be sent (pending or paused).
    pub async fn active_count(&self) -> Result<usize, ScheduleError> {
        Ok(self.repo.list(None, true).await?.len())
    }

    /// Apply `change` to an entry under the state lock and store it.
    async fn mutate(
        &self,
        id: &ScheduleId,
        change: impl FnOnce(&mut ScheduledMessage, DateTime<Utc>) -> Result<(), ScheduleError>,
    ) -> Result<ScheduledMessage, ScheduleError> {
        let _guard = self.state_lock.lock().await;
        let mut entry = self.repo.get(id).await?.ok_or(ScheduleError::NotFound)?;
        let now = self.clock.now();
        change(&mut entry, now)?;
        entry.updated_at = now;
        self.repo.update(&entry).await?;
        Ok(entry)
    }

    pub async fn cancel(&self, id: &ScheduleId) -> Result<ScheduledMessage, ScheduleError> {
        let entry = self
            .mutate(id, |entry, _| {
                ensure_not_terminal(entry)?;
                entry.status = ScheduleStatus::Cancelled;
                Ok(())
            })
            .await?;
        tracing::info!(schedule_id = %id, "cancelled scheduled message");
        Ok(entry)
    }

    pub async fn update(
        &self,
        id: &ScheduleId,
        new_text: &str,
    ) -> Result<ScheduledMessage, ScheduleError> {
        if new_text.trim().is_empty() {
            return Err(ScheduleError::InvalidSchedule("text is empty".to_string()));
        }
        self.mutate(id, |entry, _| {
            ensure_not_terminal(entry)?;
            entry.text = new_text.to_string();
            Ok(())
        })
        .await
    }

    pub async fn pause(&self, id: &ScheduleId) -> Result<ScheduledMessage, ScheduleError> {
        self.mutate(id, |entry, _| {
            if entry.status != ScheduleStatus::Pending {
                return Err(ScheduleError::InvalidTransition {
                    action: "pause",
                    status: entry.status.to_string(),
                });
            }
            entry.status = ScheduleStatus::Paused;
            Ok(())
        })
        .await
    }

    /// Resume a paused entry. A recurring entry whose time passed while
    /// paused moves to its next future occurrence.
    pub async fn resume(&self, id: &ScheduleId) -> Result<ScheduledMessage, ScheduleError> {
        self.mutate(id, |entry, now| {
            if entry.status != ScheduleStatus::Paused {
                return Err(ScheduleError::InvalidTransition {
                    action: "resume",
                    status: entry.status.to_string(),
                });
            }
            if entry.recurrence != Recurrence::None && entry.send_at <= now {
                match entry.recurrence.next_after(entry.anchor_at, now) {
                    Some(next) => entry.send_at = next,
                    None => {
                        entry.status = ScheduleStatus::Sent;
                        return Ok(());
                    }
                }
            }
            entry.status = ScheduleStatus::Pending;
            Ok(())
        })
        .await
    }

    /// Send every due entry once.
    pub async fn tick(&self) -> Result<TickReport, ScheduleError> {
        let now = self.clock.now();
        let mut report = TickReport::default();

        let claimed: Vec<ScheduledMessage> = {
            let _guard = self.state_lock.lock().await;
            let due = self.repo.due(now).await?;
            report.due = due.len();
            let mut set = self.claimed.lock().unwrap_or_else(|e| e.into_inner());
            due.into_iter()
                .filter(|entry| {
                    let fresh = set.insert(entry.id);
                    if !fresh {
                        report.skipped += 1;
                    }
                    fresh
                })
                .collect()
        };

        if claimed.is_empty() {
            return Ok(report);
        }
        tracing::debug!(count = claimed.len(), "scheduler tick sending");

        let outcomes = join_all(claimed.into_iter().map(|entry| self.deliver(entry, now))).await;
        for outcome in outcomes {
            match outcome {
                Delivery::Sent => report.sent += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    async fn deliver(&self, entry: ScheduledMessage, tick_time: DateTime<Utc>) -> Delivery {
        let _claim = Claim {
            set: &self.claimed,
            id: entry.id,
        };

        let result = {
            let _permit = self.sends.acquire().await;
            // The entry may have been cancelled, paused or edited while
            // this delivery waited for a slot.
            let entry = {
                let _guard = self.state_lock.lock().await;
                match self.repo.get(&entry.id).await {
                    Ok(Some(fresh)) if fresh.is_due(tick_time) => fresh,
                    Ok(_) => {
                        tracing::debug!(schedule_id = %entry.id, "scheduled entry no longer due, skipping");
                        return Delivery::Skipped;
                    }
                    Err(e) => {
                        tracing::error!(schedule_id = %entry.id, error = %e, "failed to re-read scheduled entry");
                        return Delivery::Skipped;
                    }
                }
            };
            self.backend.send_message(entry.chat_id, &entry.text).await
        };

        let (message_id, error) = match &result {
            Ok(id) => (Some(*id), None),
            Err(e) => (None, Some(e.to_string())),
        };
        self.audit
            .record_backend_op(
                "scheduled_send",
                entry.chat_id,
                message_id,
                error.is_none(),
                error.as_deref(),
            )
            .await;

        if let Err(e) = self.record_outcome(&entry, tick_time, error.as_deref()).await {
            tracing::error!(schedule_id = %entry.id, error = %e, "failed to record scheduled send");
        }

        match error {
            None => Delivery::Sent,
            Some(reason) => {
                tracing::warn!(schedule_id = %entry.id, chat_id = entry.chat_id, reason = %reason, "scheduled send failed");
                self.audit
                    .record_error(&format!("scheduled message {}", entry.id), &reason)
                    .await;
                Delivery::Failed
            }
        }
    }

    /// Fold a send result into the stored entry. The entry is re-read, so
    /// a cancel, pause or text update made during the send is kept.
    async fn record_outcome(
        &self,
        sent: &ScheduledMessage,
        tick_time: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<(), ScheduleError> {
        let _guard = self.state_lock.lock().await;
        let Some(mut entry) = self.repo.get(&sent.id).await? else {
            return Ok(());
        };
        let now = self.clock.now();
        let still_active = !entry.status.is_terminal();

        match error {
            None => {
                let finished = entry.is_final_occurrence();
                entry.occurrences_sent += 1;
                entry.last_sent_at = Some(now);
                entry.last_error = None;
                if finished {
                    if still_active {
                        entry.status = ScheduleStatus::Sent;
                    }
                } else {
                    match entry
                        .recurrence
                        .next_after(entry.anchor_at, tick_time.max(entry.send_at))
                    {
                        Some(next) => entry.send_at = next,
                        None if still_active => entry.status = ScheduleStatus::Sent,
                        None => {}
                    }
                }
            }
            Some(reason) => {
                entry.last_error = Some(reason.to_string());
                if still_active {
                    entry.status = ScheduleStatus::Failed;
                }
            }
        }
        entry.updated_at = now;
        self.repo.update(&entry).await?;
        Ok(())
    }

    /// Run `tick` every `interval` until `cancel` fires.
    pub fn spawn(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(interval_secs = interval.as_secs(), "scheduler started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match scheduler.tick().await {
                            Ok(report) if report.due > 0 => {
                                tracing::debug!(
                                    due = report.due,
                                    sent = report.sent,
                                    failed = report.failed,
                                    skipped = report.skipped,
                                    "scheduler tick"
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!(error = %e, "scheduler tick failed"),
                        }
                    }
                }
            }
            tracing::info!("scheduler stopped");
        })
    }
}

fn ensure_not_terminal(entry: &ScheduledMessage) -> Result<(), ScheduleError> {
    match entry.status {
        ScheduleStatus::Sent => Err(ScheduleError::AlreadySent),
        status if status.is_terminal() => Err(ScheduleError::AlreadyTerminal(status.to_string())),
        _ => Ok(()),
    }
}
