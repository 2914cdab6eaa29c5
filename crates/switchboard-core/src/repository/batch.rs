//! Batch job repository trait definition.

use std::future::Future;

use switchboard_types::batch::{BatchJob, BatchJobId, BatchStatus};
use switchboard_types::error::RepositoryError;

use super::RepoFuture;

pub trait BatchJobRepository: Send + Sync {
    /// Insert or replace the job record.
    fn save(&self, job: &BatchJob) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &BatchJobId,
    ) -> impl Future<Output = Result<Option<BatchJob>, RepositoryError>> + Send;

    /// Jobs newest first, optionally filtered by status.
    fn list(
        &self,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<BatchJob>, RepositoryError>> + Send;
}

/// Object-safe version of [`BatchJobRepository`] with boxed futures.
pub trait BatchJobRepositoryDyn: Send + Sync {
    fn save_boxed<'a>(&'a self, job: &'a BatchJob) -> RepoFuture<'a, ()>;
    fn get_boxed<'a>(&'a self, id: &'a BatchJobId) -> RepoFuture<'a, Option<BatchJob>>;
    fn list_boxed(&self, status: Option<BatchStatus>, limit: usize) -> RepoFuture<'_, Vec<BatchJob>>;
}

impl<T: BatchJobRepository> BatchJobRepositoryDyn for T {
    fn save_boxed<'a>(&'a self, job: &'a BatchJob) -> RepoFuture<'a, ()> {
        Box::pin(self.save(job))
    }

    fn get_boxed<'a>(&'a self, id: &'a BatchJobId) -> RepoFuture<'a, Option<BatchJob>> {
        Box::pin(self.get(id))
    }

    fn list_boxed(&self, status: Option<BatchStatus>, limit: usize) -> RepoFuture<'_, Vec<BatchJob>> {
        Box::pin(self.list(status, limit))
    }
}

/// Type-erased batch job store.
pub struct BoxBatchJobRepository {
    inner: Box<dyn BatchJobRepositoryDyn>,
}

impl BoxBatchJobRepository {
    pub fn new<T: BatchJobRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }

    pub async fn save(&self, job: &BatchJob) -> Result<(), RepositoryError> {
        self.inner.save_boxed(job).await
    }

    pub async fn get(&self, id: &BatchJobId) -> Result<Option<BatchJob>, RepositoryError> {
        self.inner.get_boxed(id).await
    }

    pub async fn list(
        &self,
        status: Option<BatchStatus>,
        limit: usize,
    ) -> Result<Vec<BatchJob>, RepositoryError> {
        self.inner.list_boxed(status, limit).await
    }
}
