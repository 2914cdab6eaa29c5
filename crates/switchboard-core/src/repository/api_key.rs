//! API key repository trait definition.

use std::future::Future;

use chrono::{DateTime, Utc};
use switchboard_types::auth::{ApiKey, ApiKeyId};
use switchboard_types::error::RepositoryError;

use super::RepoFuture;

/// Repository trait for API key persistence.
///
/// Implementations live in switchboard-infra (e.g., SqliteApiKeyRepository).
pub trait ApiKeyRepository: Send + Sync {
    /// Insert a new key record.
    fn create(&self, key: &ApiKey) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        id: &ApiKeyId,
    ) -> impl Future<Output = Result<Option<ApiKey>, RepositoryError>> + Send;

    /// All keys, revoked ones included, oldest first.
    fn list(&self) -> impl Future<Output = Result<Vec<ApiKey>, RepositoryError>> + Send;

    /// Overwrite the mutable fields (expiry, revocation, last use) of an existing key.
    fn update(&self, key: &ApiKey) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn touch_last_used(
        &self,
        id: &ApiKeyId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Permanently delete a key. Returns `NotFound` if absent.
    fn delete(&self, id: &ApiKeyId) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// Object-safe version of [`ApiKeyRepository`] with boxed futures.
pub trait ApiKeyRepositoryDyn: Send + Sync {
    fn create_boxed<'a>(&'a self, key: &'a ApiKey) -> RepoFuture<'a, ()>;
    fn get_boxed<'a>(&'a self, id: &'a ApiKeyId) -> RepoFuture<'a, Option<ApiKey>>;
    fn list_boxed(&self) -> RepoFuture<'_, Vec<ApiKey>>;
    fn update_boxed<'a>(&'a self, key: &'a ApiKey) -> RepoFuture<'a, ()>;
    fn touch_last_used_boxed<'a>(&'a self, id: &'a ApiKeyId, at: DateTime<Utc>)
    -> RepoFuture<'a, ()>;
    fn delete_boxed<'a>(&'a self, id: &'a ApiKeyId) -> RepoFuture<'a, ()>;
}

impl<T: ApiKeyRepository> ApiKeyRepositoryDyn for T {
    fn create_boxed<'a>(&'a self, key: &'a ApiKey) -> RepoFuture<'a, ()> {
        Box::pin(self.create(key))
    }

    fn get_boxed<'a>(&'a self, id: &'a ApiKeyId) -> RepoFuture<'a, Option<ApiKey>> {
        Box::pin(self.get(id))
    }

    fn list_boxed(&self) -> RepoFuture<'_, Vec<ApiKey>> {
        Box::pin(self.list())
    }

    fn update_boxed<'a>(&'a self, key: &'a ApiKey) -> RepoFuture<'a, ()> {
        Box::pin(self.update(key))
    }

    fn touch_last_used_boxed<'a>(
        &'a self,
        id: &'a ApiKeyId,
        at: DateTime<Utc>,
    ) -> RepoFuture<'a, ()> {
        Box::pin(self.touch_last_used(id, at))
    }

    fn delete_boxed<'a>(&'a self, id: &'a ApiKeyId) -> RepoFuture<'a, ()> {
        Box::pin(self.delete(id))
    }
}

/// Type-erased API key store.
pub struct BoxApiKeyRepository {
    inner: Box<dyn ApiKeyRepositoryDyn>,
}

impl BoxApiKeyRepository {
    pub fn new<T: ApiKeyRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }

    pub async fn create(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        self.inner.create_boxed(key).await
    }

    pub async fn get(&self, id: &ApiKeyId) -> Result<Option<ApiKey>, RepositoryError> {
        self.inner.get_boxed(id).await
    }

    pub async fn list(&self) -> Result<Vec<ApiKey>, RepositoryError> {
        self.inner.list_boxed().await
    }

    pub async fn update(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        self.inner.update_boxed(key).await
    }

    pub async fn touch_last_used(
        &self,
        id: &ApiKeyId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.inner.touch_last_used_boxed(id, at).await
    }

    pub async fn delete(&self, id: &ApiKeyId) -> Result<(), RepositoryError> {
        self.inner.delete_boxed(id).await
    }
}
