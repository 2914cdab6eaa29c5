//! MessagingBackend -- the messaging platform capability this runtime drives.
//!
//! Follows the same blanket-impl pattern as the repositories:
//! 1. `MessagingBackend` uses RPITIT for implementors
//! 2. `MessagingBackendDyn` is the object-safe twin with boxed futures
//! 3. `BoxMessagingBackend` wraps it and bounds every call with a timeout

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::broadcast;

use switchboard_types::error::BackendError;
use switchboard_types::event::{BackendEvent, Message};

type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, BackendError>> + Send + 'a>>;

/// Operations the runtime needs from a messaging platform.
pub trait MessagingBackend: Send + Sync {
    /// Send a text message. Returns the new message id.
    fn send_message(
        &self,
        chat_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<i64, BackendError>> + Send;

    fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn delete_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn forward_message(
        &self,
        from_chat_id: i64,
        to_chat_id: i64,
        message_id: i64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn pin_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn unpin_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn add_reaction(
        &self,
        chat_id: i64,
        message_id: i64,
        emoji: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn get_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> impl Future<Output = Result<Message, BackendError>> + Send;

    /// Most recent messages in a chat, newest first.
    fn list_messages(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, BackendError>> + Send;

    /// Inbound platform events (received, edited, deleted messages, chat
    /// membership). Backends without a push channel return `None`.
    fn subscribe_events(&self) -> Option<broadcast::Receiver<BackendEvent>> {
        None
    }
}

/// Object-safe version of [`MessagingBackend`] with boxed futures.
pub trait MessagingBackendDyn: Send + Sync {
    fn send_message_boxed<'a>(&'a self, chat_id: i64, text: &'a str) -> BackendFuture<'a, i64>;
    fn edit_message_boxed<'a>(
        &'a self,
        chat_id: i64,
        message_id: i64,
        text: &'a str,
    ) -> BackendFuture<'a, ()>;
    fn delete_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, ()>;
    fn forward_message_boxed(
        &self,
        from_chat_id: i64,
        to_chat_id: i64,
        message_id: i64,
    ) -> BackendFuture<'_, ()>;
    fn pin_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, ()>;
    fn unpin_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, ()>;
    fn add_reaction_boxed<'a>(
        &'a self,
        chat_id: i64,
        message_id: i64,
        emoji: &'a str,
    ) -> BackendFuture<'a, ()>;
    fn get_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, Message>;
    fn list_messages_boxed(&self, chat_id: i64, limit: usize) -> BackendFuture<'_, Vec<Message>>;
    fn subscribe_events_dyn(&self) -> Option<broadcast::Receiver<BackendEvent>>;
}

impl<T: MessagingBackend> MessagingBackendDyn for T {
    fn send_message_boxed<'a>(&'a self, chat_id: i64, text: &'a str) -> BackendFuture<'a, i64> {
        Box::pin(self.send_message(chat_id, text))
    }

    fn edit_message_boxed<'a>(
        &'a self,
        chat_id: i64,
        message_id: i64,
        text: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(self.edit_message(chat_id, message_id, text))
    }

    fn delete_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, ()> {
        Box::pin(self.delete_message(chat_id, message_id))
    }

    fn forward_message_boxed(
        &self,
        from_chat_id: i64,
        to_chat_id: i64,
        message_id: i64,
    ) -> BackendFuture<'_, ()> {
        Box::pin(self.forward_message(from_chat_id, to_chat_id, message_id))
    }

    fn pin_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, ()> {
        Box::pin(self.pin_message(chat_id, message_id))
    }

    fn unpin_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, ()> {
        Box::pin(self.unpin_message(chat_id, message_id))
    }

    fn add_reaction_boxed<'a>(
        &'a self,
        chat_id: i64,
        message_id: i64,
        emoji: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(self.add_reaction(chat_id, message_id, emoji))
    }

    fn get_message_boxed(&self, chat_id: i64, message_id: i64) -> BackendFuture<'_, Message> {
        Box::pin(self.get_message(chat_id, message_id))
    }

    fn list_messages_boxed(&self, chat_id: i64, limit: usize) -> BackendFuture<'_, Vec<Message>> {
        Box::pin(self.list_messages(chat_id, limit))
    }

    fn subscribe_events_dyn(&self) -> Option<broadcast::Receiver<BackendEvent>> {
        self.subscribe_events()
    }
}

/// Type-erased messaging backend with a bounded timeout on every call.
///
/// A call that exceeds the timeout resolves to `BackendError::Timeout`,
/// so no caller can block on the platform indefinitely.
pub struct BoxMessagingBackend {
    inner: Box<dyn MessagingBackendDyn>,
    timeout: Duration,
}

impl BoxMessagingBackend {
    pub fn new<T: MessagingBackend + 'static>(backend: T, timeout: Duration) -> Self {
        Self {
            inner: Box::new(backend),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(&self, fut: BackendFuture<'_, T>) -> Result<T, BackendError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, BackendError> {
        self.bounded(self.inner.send_message_boxed(chat_id, text)).await
    }

    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), BackendError> {
        self.bounded(self.inner.edit_message_boxed(chat_id, message_id, text))
            .await
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.bounded(self.inner.delete_message_boxed(chat_id, message_id))
            .await
    }

    pub async fn forward_message(
        &self,
        from_chat_id: i64,
        to_chat_id: i64,
        message_id: i64,
    ) -> Result<(), BackendError> {
        self.bounded(
            self.inner
                .forward_message_boxed(from_chat_id, to_chat_id, message_id),
        )
        .await
    }

    pub async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.bounded(self.inner.pin_message_boxed(chat_id, message_id))
            .await
    }

    pub async fn unpin_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.bounded(self.inner.unpin_message_boxed(chat_id, message_id))
            .await
    }

    pub async fn add_reaction(
        &self,
        chat_id: i64,
        message_id: i64,
        emoji: &str,
    ) -> Result<(), BackendError> {
        self.bounded(self.inner.add_reaction_boxed(chat_id, message_id, emoji))
            .await
    }

    pub async fn get_message(&self, chat_id: i64, message_id: i64) -> Result<Message, BackendError> {
        self.bounded(self.inner.get_message_boxed(chat_id, message_id))
            .await
    }

    pub async fn list_messages(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<Message>, BackendError> {
        self.bounded(self.inner.list_messages_boxed(chat_id, limit))
            .await
    }

    pub fn subscribe_events(&self) -> Option<broadcast::Receiver<BackendEvent>> {
        self.inner.subscribe_events_dyn()
    }
}
