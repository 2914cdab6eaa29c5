//! In-process messaging backend.
//!
//! Keeps chats in memory and assigns increasing message ids. Used by
//! `sbd serve` when no platform adapter is configured, and by end-to-end
//! tests. Inbound traffic is simulated with [`LoopbackBackend::inject`];
//! injected messages, edits and deletions are pushed on the event stream.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;

use switchboard_core::backend::MessagingBackend;
use switchboard_types::error::BackendError;
use switchboard_types::event::{BackendEvent, Message};

const EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct LoopbackBackend {
    chats: Arc<DashMap<i64, BTreeMap<i64, Message>>>,
    next_id: Arc<AtomicI64>,
    events: broadcast::Sender<BackendEvent>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            chats: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicI64::new(0)),
            events,
        }
    }

    fn publish(&self, event: BackendEvent) {
        // No subscriber yet is not an error.
        let _ = self.events.send(event);
    }

    fn store(&self, chat_id: i64, sender_id: Option<i64>, text: &str) -> Message {
        let message = Message {
            chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
            sender_id,
            text: text.to_string(),
            timestamp: Utc::now(),
            pinned: false,
            reactions: Vec::new(),
        };
        self.chats
            .entry(chat_id)
            .or_default()
            .insert(message.message_id, message.clone());
        message
    }

    /// Record a message as if a user had sent it and publish the received
    /// event for it.
    pub fn inject(&self, chat_id: i64, sender_id: i64, text: &str) -> Message {
        let message = self.store(chat_id, Some(sender_id), text);
        tracing::debug!(chat_id, message_id = message.message_id, "loopback message injected");
        self.publish(BackendEvent::MessageReceived(message.clone()));
        message
    }

    fn with_message<T>(
        &self,
        chat_id: i64,
        message_id: i64,
        f: impl FnOnce(&mut Message) -> T,
    ) -> Result<T, BackendError> {
        let mut chat = self
            .chats
            .get_mut(&chat_id)
            .ok_or(BackendError::ChatNotFound(chat_id))?;
        chat.get_mut(&message_id)
            .map(f)
            .ok_or(BackendError::MessageNotFound { chat_id, message_id })
    }
}

impl MessagingBackend for LoopbackBackend {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, BackendError> {
        Ok(self.store(chat_id, None, text).message_id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<(), BackendError> {
        let edited = self.with_message(chat_id, message_id, |m| {
            m.text = text.to_string();
            m.clone()
        })?;
        self.publish(BackendEvent::MessageEdited(edited));
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        let mut chat = self
            .chats
            .get_mut(&chat_id)
            .ok_or(BackendError::ChatNotFound(chat_id))?;
        chat.remove(&message_id)
            .ok_or(BackendError::MessageNotFound { chat_id, message_id })?;
        drop(chat);
        self.publish(BackendEvent::MessageDeleted {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn forward_message(
        &self,
        from_chat_id: i64,
        to_chat_id: i64,
        message_id: i64,
    ) -> Result<(), BackendError> {
        let text = self.with_message(from_chat_id, message_id, |m| m.text.clone())?;
        self.store(to_chat_id, None, &text);
        Ok(())
    }

    async fn pin_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.with_message(chat_id, message_id, |m| m.pinned = true)
    }

    async fn unpin_message(&self, chat_id: i64, message_id: i64) -> Result<(), BackendError> {
        self.with_message(chat_id, message_id, |m| m.pinned = false)
    }

    async fn add_reaction(&self, chat_id: i64, message_id: i64, emoji: &str) -> Result<(), BackendError> {
        if emoji.trim().is_empty() {
            return Err(BackendError::Rejected("empty reaction".into()));
        }
        self.with_message(chat_id, message_id, |m| {
            if !m.reactions.iter().any(|r| r == emoji) {
                m.reactions.push(emoji.to_string());
            }
        })
    }

    async fn get_message(&self, chat_id: i64, message_id: i64) -> Result<Message, BackendError> {
        self.with_message(chat_id, message_id, |m| m.clone())
    }

    async fn list_messages(&self, chat_id: i64, limit: usize) -> Result<Vec<Message>, BackendError> {
        let chat = self
            .chats
            .get(&chat_id)
            .ok_or(BackendError::ChatNotFound(chat_id))?;
        Ok(chat.values().rev().take(limit).cloned().collect())
    }

    fn subscribe_events(&self) -> Option<broadcast::Receiver<BackendEvent>> {
        Some(self.events.subscribe())
    }
}
