//! Scheduled message repository trait definition.

use std::future::Future;

use chrono::{DateTime, Utc};
use switchboard_types::error::RepositoryError;
use switchboard_types::schedule::{ScheduleId, ScheduledMessage};

use super::RepoFuture;

/// Repository trait for scheduled messages. The store is the source of
/// truth; the scheduler keeps no copy between ticks.
pub trait ScheduleRepository: Send + Sync {
    fn insert(
        &self,
        message: &ScheduledMessage,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &ScheduleId,
    ) -> impl Future<Output = Result<Option<ScheduledMessage>, RepositoryError>> + Send;

    /// Overwrite an existing entry. Returns `NotFound` if absent.
    fn update(
        &self,
        message: &ScheduledMessage,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Entries ordered by `send_at`, optionally limited to one chat and to
    /// non-terminal entries.
    fn list(
        &self,
        chat_id: Option<i64>,
        active_only: bool,
    ) -> impl Future<Output = Result<Vec<ScheduledMessage>, RepositoryError>> + Send;

    /// Pending entries with `send_at <= now`, oldest first.
    fn due(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<ScheduledMessage>, RepositoryError>> + Send;
}

/// Object-safe version of [`ScheduleRepository`] with boxed futures.
pub trait ScheduleRepositoryDyn: Send + Sync {
    fn insert_boxed<'a>(&'a self, message: &'a ScheduledMessage) -> RepoFuture<'a, ()>;
    fn get_boxed<'a>(&'a self, id: &'a ScheduleId) -> RepoFuture<'a, Option<ScheduledMessage>>;
    fn update_boxed<'a>(&'a self, message: &'a ScheduledMessage) -> RepoFuture<'a, ()>;
    fn list_boxed(
        &self,
        chat_id: Option<i64>,
        active_only: bool,
    ) -> RepoFuture<'_, Vec<ScheduledMessage>>;
    fn due_boxed(&self, now: DateTime<Utc>) -> RepoFuture<'_, Vec<ScheduledMessage>>;
}

impl<T: ScheduleRepository> ScheduleRepositoryDyn for T {
    fn insert_boxed<'a>(&'a self, message: &'a ScheduledMessage) -> RepoFuture<'a, ()> {
        Box::pin(self.insert(message))
    }

    fn get_boxed<'a>(&'a self, id: &'a ScheduleId) -> RepoFuture<'a, Option<ScheduledMessage>> {
        Box::pin(self.get(id))
    }

    fn update_boxed<'a>(&'a self, message: &'a ScheduledMessage) -> RepoFuture<'a, ()> {
        Box::pin(self.update(message))
    }

    fn list_boxed(
        &self,
        chat_id: Option<i64>,
        active_only: bool,
    ) -> RepoFuture<'_, Vec<ScheduledMessage>> {
        Box::pin(self.list(chat_id, active_only))
    }

    fn due_boxed(&self, now: DateTime<Utc>) -> RepoFuture<'_, Vec<ScheduledMessage>> {
        Box::pin(self.due(now))
    }
}

/// Type-erased schedule store.
pub struct BoxScheduleRepository {
    inner: Box<dyn ScheduleRepositoryDyn>,
}

impl BoxScheduleRepository {
    pub fn new<T: ScheduleRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }

    pub async fn insert(&self, message: &ScheduledMessage) -> Result<(), RepositoryError> {
        self.inner.insert_boxed(message).await
    }

    pub async fn get(&self, id: &ScheduleId) -> Result<Option<ScheduledMessage>, RepositoryError> {
        self.inner.get_boxed(id).await
    }

    pub async fn update(&self, message: &ScheduledMessage) -> Result<(), RepositoryError> {
        self.inner.update_boxed(message).await
    }

    pub async fn list(
        &self,
        chat_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<ScheduledMessage>, RepositoryError> {
        self.inner.list_boxed(chat_id, active_only).await
    }

    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>, RepositoryError> {
        self.inner.due_boxed(now).await
    }
}
