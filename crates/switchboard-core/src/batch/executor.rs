//! Batch job execution.
//!
//! Targets run in windows of at most `concurrency_limit` operations. The
//! executor waits for a whole window, records every outcome in target
//! order, persists the job, then pauses `inter_batch_delay_ms` before the
//! next window. Pause and cancellation are checked before each window; a
//! paused job holds there until resumed. Targets that never started on a
//! cancelled job are recorded as failed with `"cancelled"`.
//!
//! Only unfinished jobs stay in memory. A finished job is folded into the
//! startup counters and served from the repository afterwards.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use switchboard_types::auth::ApiKeyId;
use switchboard_types::batch::{
    BatchJob, BatchJobId, BatchOptions, BatchParams, BatchStatistics, BatchStatus, TargetResult,
};
use switchboard_types::error::BatchError;

use super::operation::PreparedOp;
use crate::audit::AuditLog;
use crate::backend::BoxMessagingBackend;
use crate::clock::Clock;
use crate::repository::BoxBatchJobRepository;
use crate::settings::RuntimeSettings;

const CANCELLED: &str = "cancelled";

/// A bulk operation as submitted.
#[derive(Debug, Clone, Default)]
pub struct BatchRequest {
    pub operation: String,
    pub params: BatchParams,
    pub targets: Vec<i64>,
    /// Falls back to the configured defaults.
    pub options: Option<BatchOptions>,
    pub submitted_by: Option<ApiKeyId>,
}

struct JobHandle {
    job: Mutex<BatchJob>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    done: watch::Sender<bool>,
}

impl JobHandle {
    fn new(job: BatchJob) -> Self {
        let (done, _) = watch::channel(false);
        let (paused, _) = watch::channel(false);
        Self {
            job: Mutex::new(job),
            cancel: CancellationToken::new(),
            paused,
            done,
        }
    }

    fn job(&self) -> std::sync::MutexGuard<'_, BatchJob> {
        self.job.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> BatchJob {
        self.job().clone()
    }
}

fn tally(stats: &mut BatchStatistics, job: &BatchJob) {
    stats.total_jobs += 1;
    match job.status {
        BatchStatus::Pending | BatchStatus::Running => stats.running += 1,
        BatchStatus::Paused => stats.paused += 1,
        BatchStatus::Completed => stats.completed += 1,
        BatchStatus::PartiallyFailed => stats.partially_failed += 1,
        BatchStatus::Failed => stats.failed += 1,
        BatchStatus::Cancelled => stats.cancelled += 1,
    }
    stats.targets_succeeded += job.succeeded();
    stats.targets_failed += job.failed();
}

pub struct BatchExecutor {
    /// Unfinished jobs only.
    jobs: DashMap<BatchJobId, Arc<JobHandle>>,
    /// Jobs finished since startup.
    finished: Mutex<BatchStatistics>,
    backend: Arc<BoxMessagingBackend>,
    repo: BoxBatchJobRepository,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    defaults: BatchOptions,
    max_concurrency: usize,
    max_targets: usize,
}

impl BatchExecutor {
    pub fn new(
        backend: Arc<BoxMessagingBackend>,
        repo: BoxBatchJobRepository,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        settings: &RuntimeSettings,
    ) -> Self {
        Self {
            jobs: DashMap::new(),
            finished: Mutex::new(BatchStatistics::default()),
            backend,
            repo,
            audit,
            clock,
            defaults: BatchOptions {
                concurrency_limit: settings.batch_default_concurrency,
                inter_batch_delay_ms: settings.batch_default_delay.as_millis() as u64,
            },
            max_concurrency: settings.batch_max_concurrency,
            max_targets: settings.batch_max_targets,
        }
    }

    /// Create a job and start it in the background.
    ///
    /// A job that cannot start (unknown operation, missing parameters, no
    /// targets) is still recorded, with status `Failed` and the reason.
    pub async fn submit(self: &Arc<Self>, request: BatchRequest) -> Result<BatchJob, BatchError> {
        if request.targets.len() > self.max_targets {
            return Err(BatchError::TooManyTargets {
                count: request.targets.len(),
                limit: self.max_targets,
            });
        }
        let mut options = request.options.unwrap_or(self.defaults);
        options.concurrency_limit = options.concurrency_limit.clamp(1, self.max_concurrency);

        let now = self.clock.now();
        let mut job = BatchJob {
            id: BatchJobId::new(),
            operation: request.operation,
            params: request.params,
            targets: request.targets,
            options,
            status: BatchStatus::Pending,
            results: Vec::new(),
            error: None,
            submitted_by: request.submitted_by,
            created_at: now,
            started_at: None,
            finished_at: None,
        };

        let prepared = if job.targets.is_empty() {
            Err("no targets".to_string())
        } else {
            PreparedOp::prepare(&job.operation, &job.params)
        };
        let op = match prepared {
            Ok(op) => op,
            Err(reason) => {
                job.status = BatchStatus::Failed;
                job.error = Some(reason.clone());
                job.finished_at = Some(now);
                self.repo.save(&job).await?;
                tally(&mut self.finished_stats(), &job);
                tracing::warn!(job_id = %job.id, operation = %job.operation, reason, "batch job could not start");
                return Ok(job);
            }
        };

        self.repo.save(&job).await?;
        let handle = Arc::new(JobHandle::new(job.clone()));
        self.jobs.insert(job.id, Arc::clone(&handle));
        tracing::info!(
            job_id = %job.id,
            operation = %job.operation,
            targets = job.targets.len(),
            concurrency = options.concurrency_limit,
            "batch job submitted"
        );

        let executor = Arc::clone(self);
        tokio::spawn(async move { executor.run(handle, op).await });
        Ok(job)
    }

    async fn run(&self, handle: Arc<JobHandle>, op: PreparedOp) {
        let (targets, options, job_id) = {
            let mut job = handle.job();
            if job.status == BatchStatus::Pending {
                job.status = BatchStatus::Running;
            }
            job.started_at = Some(self.clock.now());
            (job.targets.clone(), job.options, job.id)
        };
        self.persist(&handle).await;

        let windows: Vec<&[i64]> = targets.chunks(options.concurrency_limit).collect();
        let delay = Duration::from_millis(options.inter_batch_delay_ms);
        let mut attempted = 0;

        for (index, window) in windows.iter().enumerate() {
            self.hold_while_paused(&handle).await;
            if handle.cancel.is_cancelled() {
                break;
            }

            let mut set = JoinSet::new();
            for (pos, &target) in window.iter().enumerate() {
                let backend = Arc::clone(&self.backend);
                let op = op.clone();
                set.spawn(async move { (pos, target, op.apply(&backend, target).await) });
            }

            let mut outcomes: Vec<Option<TargetResult>> = vec![None; window.len()];
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((pos, target, result)) => {
                        let (chat_id, message_id) = op.coordinates(target);
                        let error = result.as_ref().err().map(|e| e.to_string());
                        self.audit
                            .record_backend_op(
                                op.op_name(),
                                chat_id,
                                message_id,
                                error.is_none(),
                                error.as_deref(),
                            )
                            .await;
                        outcomes[pos] = Some(match error {
                            None => TargetResult::success(target),
                            Some(e) => TargetResult::failure(target, e),
                        });
                    }
                    Err(e) => tracing::error!(job_id = %job_id, error = %e, "batch target task failed"),
                }
            }
            let results: Vec<TargetResult> = outcomes
                .into_iter()
                .zip(window.iter())
                .map(|(outcome, &target)| {
                    outcome.unwrap_or_else(|| TargetResult::failure(target, "task aborted"))
                })
                .collect();
            attempted += window.len();
            handle.job().results.extend(results);
            self.persist(&handle).await;

            if !delay.is_zero() && index + 1 < windows.len() {
                tracing::debug!(job_id = %job_id, delay_ms = options.inter_batch_delay_ms, "pacing batch");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = handle.cancel.cancelled() => {}
                }
            }
        }

        let (status, succeeded, failed) = {
            let mut job = handle.job();
            let cancelled = attempted < targets.len();
            for &target in &targets[attempted..] {
                job.results.push(TargetResult::failure(target, CANCELLED));
            }
            job.status = if cancelled {
                BatchStatus::Cancelled
            } else if job.failed() > 0 {
                BatchStatus::PartiallyFailed
            } else {
                BatchStatus::Completed
            };
            job.finished_at = Some(self.clock.now());
            (job.status, job.succeeded(), job.failed())
        };
        self.persist(&handle).await;
        {
            let mut finished = self.finished_stats();
            tally(&mut finished, &handle.job());
            self.jobs.remove(&job_id);
        }
        handle.done.send_replace(true);

        tracing::info!(job_id = %job_id, %status, succeeded, failed, "batch job finished");
        self.audit
            .record_system(
                "batch_finished",
                serde_json::json!({
                    "job_id": job_id,
                    "status": status,
                    "succeeded": succeeded,
                    "failed": failed,
                }),
            )
            .await;
    }

    fn finished_stats(&self) -> std::sync::MutexGuard<'_, BatchStatistics> {
        self.finished.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block between windows while the job is paused. Returns when resumed
    /// or cancelled.
    async fn hold_while_paused(&self, handle: &JobHandle) {
        let mut paused = handle.paused.subscribe();
        if !*paused.borrow_and_update() {
            return;
        }
        self.persist(handle).await;
        let job_id = handle.job().id;
        tracing::info!(job_id = %job_id, "batch job holding while paused");
        tokio::select! {
            _ = paused.wait_for(|p| !*p) => {}
            _ = handle.cancel.cancelled() => {}
        }
        tracing::info!(job_id = %job_id, "batch job continuing");
    }

    fn live(&self, job_id: &BatchJobId) -> Option<Arc<JobHandle>> {
        self.jobs.get(job_id).map(|h| Arc::clone(h.value()))
    }

    /// The live handle of an unfinished job, or the reason there is none.
    async fn unfinished(&self, job_id: &BatchJobId) -> Result<Arc<JobHandle>, BatchError> {
        match self.live(job_id) {
            Some(handle) => Ok(handle),
            None => {
                let job = self.repo.get(job_id).await?.ok_or(BatchError::NotFound)?;
                Err(BatchError::AlreadyTerminal(job.status.to_string()))
            }
        }
    }

    async fn persist(&self, handle: &JobHandle) {
        let snapshot = handle.snapshot();
        if let Err(e) = self.repo.save(&snapshot).await {
            tracing::error!(job_id = %snapshot.id, error = %e, "failed to persist batch job");
        }
    }

    pub async fn get(&self, job_id: &BatchJobId) -> Result<BatchJob, BatchError> {
        if let Some(handle) = self.live(job_id) {
            return Ok(handle.snapshot());
        }
        self.repo.get(job_id).await?.ok_or(BatchError::NotFound)
    }

    /// Stop a job before its next window. Targets already in flight finish.
    pub async fn cancel(&self, job_id: &BatchJobId) -> Result<BatchJob, BatchError> {
        let handle = self.unfinished(job_id).await?;
        let status = handle.job().status;
        if status.is_terminal() {
            return Err(BatchError::AlreadyTerminal(status.to_string()));
        }
        handle.cancel.cancel();
        tracing::info!(job_id = %job_id, "batch job cancellation requested");
        Ok(handle.snapshot())
    }

    /// Hold a job before its next window. Targets already in flight finish.
    pub async fn pause(&self, job_id: &BatchJobId) -> Result<BatchJob, BatchError> {
        let handle = self.unfinished(job_id).await?;
        {
            let mut job = handle.job();
            let status = job.status;
            match status {
                BatchStatus::Pending | BatchStatus::Running => job.status = BatchStatus::Paused,
                status if status.is_terminal() => {
                    return Err(BatchError::AlreadyTerminal(status.to_string()));
                }
                status => {
                    return Err(BatchError::InvalidTransition {
                        action: "pause",
                        status: status.to_string(),
                    });
                }
            }
        }
        handle.paused.send_replace(true);
        self.persist(&handle).await;
        tracing::info!(job_id = %job_id, "batch job paused");
        Ok(handle.snapshot())
    }

    pub async fn resume(&self, job_id: &BatchJobId) -> Result<BatchJob, BatchError> {
        let handle = self.unfinished(job_id).await?;
        {
            let mut job = handle.job();
            if job.status != BatchStatus::Paused {
                return Err(BatchError::InvalidTransition {
                    action: "resume",
                    status: job.status.to_string(),
                });
            }
            job.status = BatchStatus::Running;
        }
        handle.paused.send_replace(false);
        self.persist(&handle).await;
        tracing::info!(job_id = %job_id, "batch job resumed");
        Ok(handle.snapshot())
    }

    /// Resolve once the job reaches a terminal status.
    pub async fn wait(&self, job_id: &BatchJobId) -> Result<BatchJob, BatchError> {
        let Some(handle) = self.live(job_id) else {
            return self.repo.get(job_id).await?.ok_or(BatchError::NotFound);
        };
        let mut rx = handle.done.subscribe();
        // The sender lives in `handle`, so this only ends when the job does.
        let _ = rx.wait_for(|done| *done).await;
        Ok(handle.snapshot())
    }

    /// Recent jobs newest first, live state preferred over stored records.
    pub async fn list_jobs(
        &self,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> Result<Vec<BatchJob>, BatchError> {
        let mut jobs = self.repo.list(None, limit.saturating_add(self.jobs.len())).await?;
        for job in jobs.iter_mut() {
            if let Some(handle) = self.live(&job.id) {
                *job = handle.snapshot();
            }
        }
        for entry in self.jobs.iter() {
            if !jobs.iter().any(|j| j.id == *entry.key()) {
                jobs.push(entry.value().snapshot());
            }
        }
        jobs.retain(|j| status.is_none_or(|s| j.status == s));
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        jobs.truncate(limit);
        Ok(jobs)
    }

    /// Counts over jobs submitted since startup.
    pub fn statistics(&self) -> BatchStatistics {
        let finished = self.finished_stats();
        let mut stats = finished.clone();
        for entry in self.jobs.iter() {
            tally(&mut stats, &entry.value().job());
        }
        stats
    }

    /// Cancel every unfinished job.
    pub fn shutdown(&self) {
        for entry in self.jobs.iter() {
            if !entry.value().job().status.is_terminal() {
                entry.value().cancel.cancel();
            }
        }
    }
}
