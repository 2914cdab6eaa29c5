//! Audit event repository trait definition.

use std::future::Future;

use chrono::{DateTime, Utc};
use switchboard_types::audit::{AuditEvent, AuditFilter, AuditStatistics};
use switchboard_types::error::RepositoryError;

use super::RepoFuture;

/// Repository trait for the append-only audit trail.
///
/// There is deliberately no update method: the only destructive operation
/// is `purge_before`.
pub trait AuditRepository: Send + Sync {
    fn append(&self, event: &AuditEvent) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Append several events atomically.
    fn append_batch(
        &self,
        events: &[AuditEvent],
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Matching events, newest first, at most `limit`.
    fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AuditEvent>, RepositoryError>> + Send;

    /// Aggregate counts over the events matching `filter`.
    fn statistics(
        &self,
        filter: &AuditFilter,
    ) -> impl Future<Output = Result<AuditStatistics, RepositoryError>> + Send;

    /// Delete events strictly older than `cutoff`. Returns the number removed.
    fn purge_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, RepositoryError>> + Send;
}

/// Object-safe version of [`AuditRepository`] with boxed futures.
pub trait AuditRepositoryDyn: Send + Sync {
    fn append_boxed<'a>(&'a self, event: &'a AuditEvent) -> RepoFuture<'a, ()>;
    fn append_batch_boxed<'a>(&'a self, events: &'a [AuditEvent]) -> RepoFuture<'a, ()>;
    fn query_boxed<'a>(
        &'a self,
        filter: &'a AuditFilter,
        limit: usize,
    ) -> RepoFuture<'a, Vec<AuditEvent>>;
    fn statistics_boxed<'a>(&'a self, filter: &'a AuditFilter) -> RepoFuture<'a, AuditStatistics>;
    fn purge_before_boxed(&self, cutoff: DateTime<Utc>) -> RepoFuture<'_, u64>;
}

impl<T: AuditRepository> AuditRepositoryDyn for T {
    fn append_boxed<'a>(&'a self, event: &'a AuditEvent) -> RepoFuture<'a, ()> {
        Box::pin(self.append(event))
    }

    fn append_batch_boxed<'a>(&'a self, events: &'a [AuditEvent]) -> RepoFuture<'a, ()> {
        Box::pin(self.append_batch(events))
    }

    fn query_boxed<'a>(
        &'a self,
        filter: &'a AuditFilter,
        limit: usize,
    ) -> RepoFuture<'a, Vec<AuditEvent>> {
        Box::pin(self.query(filter, limit))
    }

    fn statistics_boxed<'a>(&'a self, filter: &'a AuditFilter) -> RepoFuture<'a, AuditStatistics> {
        Box::pin(self.statistics(filter))
    }

    fn purge_before_boxed(&self, cutoff: DateTime<Utc>) -> RepoFuture<'_, u64> {
        Box::pin(self.purge_before(cutoff))
    }
}

/// Type-erased audit store.
pub struct BoxAuditRepository {
    inner: Box<dyn AuditRepositoryDyn>,
}

impl BoxAuditRepository {
    pub fn new<T: AuditRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }

    pub async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        self.inner.append_boxed(event).await
    }

    pub async fn append_batch(&self, events: &[AuditEvent]) -> Result<(), RepositoryError> {
        self.inner.append_batch_boxed(events).await
    }

    pub async fn query(
        &self,
        filter: &AuditFilter,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        self.inner.query_boxed(filter, limit).await
    }

    pub async fn statistics(&self, filter: &AuditFilter) -> Result<AuditStatistics, RepositoryError> {
        self.inner.statistics_boxed(filter).await
    }

    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.inner.purge_before_boxed(cutoff).await
    }
}
