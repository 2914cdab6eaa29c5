//! Bot-scoped key-value state trait.
//!
//! Stores arbitrary JSON values keyed by bot id and string key. Used both
//! for a bot's private state and for the manager's persisted bot config.

use std::future::Future;

use serde_json::Value;
use switchboard_types::error::RepositoryError;

use super::RepoFuture;

pub trait BotStateRepository: Send + Sync {
    /// Get a value by key. Returns None if the key does not exist.
    fn get(
        &self,
        bot_id: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Value>, RepositoryError>> + Send;

    /// Set a value for a key (upsert).
    fn set(
        &self,
        bot_id: &str,
        key: &str,
        value: &Value,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a key. Returns whether it existed.
    fn delete(
        &self,
        bot_id: &str,
        key: &str,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    fn list_keys(
        &self,
        bot_id: &str,
    ) -> impl Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}

/// Object-safe version of [`BotStateRepository`] with boxed futures.
pub trait BotStateRepositoryDyn: Send + Sync {
    fn get_boxed<'a>(&'a self, bot_id: &'a str, key: &'a str) -> RepoFuture<'a, Option<Value>>;
    fn set_boxed<'a>(&'a self, bot_id: &'a str, key: &'a str, value: &'a Value)
    -> RepoFuture<'a, ()>;
    fn delete_boxed<'a>(&'a self, bot_id: &'a str, key: &'a str) -> RepoFuture<'a, bool>;
    fn list_keys_boxed<'a>(&'a self, bot_id: &'a str) -> RepoFuture<'a, Vec<String>>;
}

impl<T: BotStateRepository> BotStateRepositoryDyn for T {
    fn get_boxed<'a>(&'a self, bot_id: &'a str, key: &'a str) -> RepoFuture<'a, Option<Value>> {
        Box::pin(self.get(bot_id, key))
    }

    fn set_boxed<'a>(
        &'a self,
        bot_id: &'a str,
        key: &'a str,
        value: &'a Value,
    ) -> RepoFuture<'a, ()> {
        Box::pin(self.set(bot_id, key, value))
    }

    fn delete_boxed<'a>(&'a self, bot_id: &'a str, key: &'a str) -> RepoFuture<'a, bool> {
        Box::pin(self.delete(bot_id, key))
    }

    fn list_keys_boxed<'a>(&'a self, bot_id: &'a str) -> RepoFuture<'a, Vec<String>> {
        Box::pin(self.list_keys(bot_id))
    }
}

/// Type-erased bot state store.
pub struct BoxBotStateRepository {
    inner: Box<dyn BotStateRepositoryDyn>,
}

impl BoxBotStateRepository {
    pub fn new<T: BotStateRepository + 'static>(repo: T) -> Self {
        Self {
            inner: Box::new(repo),
        }
    }

    pub async fn get(&self, bot_id: &str, key: &str) -> Result<Option<Value>, RepositoryError> {
        self.inner.get_boxed(bot_id, key).await
    }

    pub async fn set(&self, bot_id: &str, key: &str, value: &Value) -> Result<(), RepositoryError> {
        self.inner.set_boxed(bot_id, key, value).await
    }

    pub async fn delete(&self, bot_id: &str, key: &str) -> Result<bool, RepositoryError> {
        self.inner.delete_boxed(bot_id, key).await
    }

    pub async fn list_keys(&self, bot_id: &str) -> Result<Vec<String>, RepositoryError> {
        self.inner.list_keys_boxed(bot_id).await
    }
}
