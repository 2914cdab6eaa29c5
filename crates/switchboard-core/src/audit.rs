//! AuditLog -- durable, queryable record of authorization decisions and tool runs.
//!
//! `record_invocation` is written through to the store before it returns, so
//! a crash mid-tool still leaves a record of the attempt. Every other record
//! is buffered and flushed when the buffer fills, on a bounded timer
//! (`spawn_flusher`), before any read, and on shutdown.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use switchboard_types::audit::{
    AuditEvent, AuditEventKind, AuditFilter, AuditStatistics, AuditStatus, ExportFormat,
};
use switchboard_types::auth::{ApiKeyId, Permission};
use switchboard_types::error::AuditError;

use crate::clock::Clock;
use crate::repository::BoxAuditRepository;

/// Buffered records are dropped (oldest first) past this many multiples of
/// the buffer capacity while the store keeps failing.
const BACKLOG_FACTOR: usize = 8;

/// Upper bound on events written by one export.
const EXPORT_MAX_EVENTS: usize = 1_000_000;

pub struct AuditLog {
    repo: BoxAuditRepository,
    clock: Arc<dyn Clock>,
    buffer: Mutex<Vec<AuditEvent>>,
    capacity: usize,
    flush_lock: tokio::sync::Mutex<()>,
}

impl AuditLog {
    pub fn new(repo: BoxAuditRepository, clock: Arc<dyn Clock>, capacity: usize) -> Self {
        Self {
            repo,
            clock,
            buffer: Mutex::new(Vec::new()),
            capacity: capacity.max(1),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Write a `ToolInvoked` record synchronously. Returns the correlation id
    /// the matching completion must carry.
    ///
    /// A store failure is returned to the caller, which must not run the tool.
    pub async fn record_invocation(
        &self,
        key_id: Option<ApiKeyId>,
        tool_name: &str,
        params: &Value,
    ) -> Result<Uuid, AuditError> {
        let correlation_id = Uuid::now_v7();
        let event = AuditEvent::new(
            AuditEventKind::ToolInvoked,
            AuditStatus::Started,
            self.clock.now(),
        )
        .with_actor(key_id)
        .with_tool(tool_name)
        .with_correlation(correlation_id)
        .with_detail(json!({ "params": params }));

        self.repo.append(&event).await?;
        Ok(correlation_id)
    }

    pub async fn record_completion(
        &self,
        correlation_id: Uuid,
        key_id: Option<ApiKeyId>,
        tool_name: &str,
        status: AuditStatus,
        duration_ms: u64,
        detail: Option<Value>,
    ) {
        let event = AuditEvent::new(AuditEventKind::ToolCompleted, status, self.clock.now())
            .with_actor(key_id)
            .with_tool(tool_name)
            .with_duration(duration_ms)
            .with_correlation(correlation_id)
            .with_detail(detail.unwrap_or(Value::Null));
        self.push(event).await;
    }

    pub async fn record_auth(
        &self,
        key_id: Option<ApiKeyId>,
        permission: &Permission,
        granted: bool,
        tool_name: Option<&str>,
    ) {
        let status = if granted {
            AuditStatus::Granted
        } else {
            AuditStatus::Denied
        };
        let mut event = AuditEvent::new(AuditEventKind::AuthEvent, status, self.clock.now())
            .with_actor(key_id)
            .with_detail(json!({ "permission": permission, "granted": granted }));
        if let Some(tool) = tool_name {
            event = event.with_tool(tool);
        }
        self.push(event).await;
    }

    /// A call presented by an unknown, revoked or expired key.
    pub async fn record_rejected_key(&self, key_id: Option<ApiKeyId>, tool_name: &str) {
        let event = AuditEvent::new(AuditEventKind::AuthEvent, AuditStatus::Denied, self.clock.now())
            .with_actor(key_id)
            .with_tool(tool_name)
            .with_detail(json!({ "reason": "invalid_key", "granted": false }));
        self.push(event).await;
    }

    pub async fn record_backend_op(
        &self,
        op_kind: &str,
        chat_id: i64,
        message_id: Option<i64>,
        success: bool,
        error: Option<&str>,
    ) {
        let status = if success {
            AuditStatus::Success
        } else {
            AuditStatus::Failure
        };
        let event = AuditEvent::new(AuditEventKind::BackendOp, status, self.clock.now())
            .with_detail(json!({
                "op": op_kind,
                "chat_id": chat_id,
                "message_id": message_id,
                "error": error,
            }));
        self.push(event).await;
    }

    pub async fn record_system(&self, event_name: &str, detail: Value) {
        let event = AuditEvent::new(
            AuditEventKind::SystemEvent,
            AuditStatus::Success,
            self.clock.now(),
        )
        .with_detail(json!({ "event": event_name, "detail": detail }));
        self.push(event).await;
    }

    pub async fn record_error(&self, context: &str, message: &str) {
        let event = AuditEvent::new(AuditEventKind::Error, AuditStatus::Failure, self.clock.now())
            .with_detail(json!({ "context": context, "message": message }));
        self.push(event).await;
    }

    async fn push(&self, event: AuditEvent) {
        let full = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            buffer.push(event);
            let limit = self.capacity * BACKLOG_FACTOR;
            if buffer.len() > limit {
                let excess = buffer.len() - limit;
                buffer.drain(..excess);
                tracing::error!(dropped = excess, "audit backlog overflow, dropped oldest records");
            }
            buffer.len() >= self.capacity
        };
        if full {
            if let Err(e) = self.flush().await {
                tracing::error!(error = %e, "audit flush failed, records kept in buffer");
            }
        }
    }

    /// Write all buffered records. On failure the records stay buffered, in order.
    pub async fn flush(&self) -> Result<usize, AuditError> {
        let _guard = self.flush_lock.lock().await;
        let batch = {
            let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return Ok(0);
        }

        match self.repo.append_batch(&batch).await {
            Ok(()) => {
                tracing::debug!(count = batch.len(), "flushed audit records");
                Ok(batch.len())
            }
            Err(e) => {
                let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
                let newer = std::mem::replace(&mut *buffer, batch);
                buffer.extend(newer);
                Err(e.into())
            }
        }
    }

    /// Number of records waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Matching records, newest first.
    pub async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AuditError> {
        self.flush().await?;
        Ok(self.repo.query(filter, limit).await?)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>, AuditError> {
        self.query(&AuditFilter::default(), limit).await
    }

    pub async fn statistics(&self, filter: &AuditFilter) -> Result<AuditStatistics, AuditError> {
        self.flush().await?;
        Ok(self.repo.statistics(filter).await?)
    }

    /// Delete records older than `retention`. The only destructive operation.
    pub async fn purge_older_than(&self, retention: chrono::Duration) -> Result<u64, AuditError> {
        self.flush().await?;
        let cutoff = self.clock.now() - retention;
        let removed = self.repo.purge_before(cutoff).await?;
        tracing::info!(removed, %cutoff, "purged audit records");
        self.record_system(
            "audit_purged",
            json!({ "removed": removed, "cutoff": cutoff }),
        )
        .await;
        Ok(removed)
    }

    /// Write every event matching `filter` to `path`, oldest first, and
    /// return how many were written. Missing parent directories are created
    /// and an existing file is replaced.
    pub async fn export(
        &self,
        filter: &AuditFilter,
        path: &Path,
        format: ExportFormat,
    ) -> Result<usize, AuditError> {
        self.flush().await?;
        let mut events = self.repo.query(filter, EXPORT_MAX_EVENTS).await?;
        events.reverse();

        let body = match format {
            ExportFormat::Json => serde_json::to_vec_pretty(&events),
            ExportFormat::Jsonl => events
                .iter()
                .try_fold(Vec::new(), |mut out, event| -> serde_json::Result<Vec<u8>> {
                    serde_json::to_writer(&mut out, event)?;
                    out.push(b'\n');
                    Ok(out)
                }),
        }
        .map_err(|e| AuditError::Export(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AuditError::Export(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, body)
            .await
            .map_err(|e| AuditError::Export(format!("{}: {e}", path.display())))?;

        tracing::info!(count = events.len(), path = %path.display(), %format, "exported audit log");
        self.record_system(
            "audit_exported",
            json!({ "count": events.len(), "path": path.display().to_string(), "format": format }),
        )
        .await;
        Ok(events.len())
    }

    /// Flush on a fixed interval until `cancel` fires, then flush once more.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let log = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = log.flush().await {
                            tracing::error!(error = %e, "periodic audit flush failed");
                        }
                    }
                }
            }
            if let Err(e) = log.shutdown().await {
                tracing::error!(error = %e, "final audit flush failed");
            }
        })
    }

    /// Flush everything still buffered.
    pub async fn shutdown(&self) -> Result<(), AuditError> {
        self.flush().await.map(|_| ())
    }
}
