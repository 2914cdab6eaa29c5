//! The capability handle a bot receives at initialization.
//!
//! A `BotContext` never owns the manager or the dispatcher. Outbound
//! message operations re-enter the dispatcher under the bot's identity key,
//! so they pass the same authorization and audit path as any client call.

use std::sync::{Arc, Weak};

use serde_json::{Map, Value, json};

use switchboard_types::auth::ApiKeyId;
use switchboard_types::error::{BotError, ToolError};
use switchboard_types::event::EventKind;

use crate::event::EventBus;
use crate::repository::BoxBotStateRepository;
use crate::tool::Dispatcher;

/// State keys with this prefix belong to the manager.
pub(crate) const RESERVED_PREFIX: &str = "__";
pub(crate) const CONFIG_KEY: &str = "__config";
pub(crate) const ENABLED_KEY: &str = "__enabled";

#[derive(Clone)]
pub struct BotContext {
    bot_id: String,
    identity: ApiKeyId,
    dispatcher: Weak<Dispatcher>,
    state: Arc<BoxBotStateRepository>,
    bus: EventBus,
}

impl BotContext {
    pub(crate) fn new(
        bot_id: String,
        identity: ApiKeyId,
        dispatcher: Weak<Dispatcher>,
        state: Arc<BoxBotStateRepository>,
        bus: EventBus,
    ) -> Self {
        Self {
            bot_id,
            identity,
            dispatcher,
            state,
            bus,
        }
    }

    pub fn bot_id(&self) -> &str {
        &self.bot_id
    }

    pub fn identity(&self) -> ApiKeyId {
        self.identity
    }

    async fn call(&self, tool: &str, params: Value) -> Result<Value, ToolError> {
        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| ToolError::Internal("dispatcher is shut down".to_string()))?;
        dispatcher.dispatch(&self.identity, tool, params).await
    }

    /// Send a message as this bot. Returns the new message id.
    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64, ToolError> {
        let result = self
            .call("send_message", json!({ "chat_id": chat_id, "text": text }))
            .await?;
        result["message_id"]
            .as_i64()
            .ok_or_else(|| ToolError::Internal("send_message returned no message_id".to_string()))
    }

    pub async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
    ) -> Result<(), ToolError> {
        self.call(
            "edit_message",
            json!({ "chat_id": chat_id, "message_id": message_id, "text": text }),
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<(), ToolError> {
        self.call(
            "delete_message",
            json!({ "chat_id": chat_id, "message_id": message_id }),
        )
        .await
        .map(|_| ())
    }

    /// The bot's current configuration as last saved by the manager.
    pub async fn config(&self) -> Result<Map<String, Value>, BotError> {
        match self.state.get(&self.bot_id, CONFIG_KEY).await? {
            Some(Value::Object(map)) => Ok(map),
            _ => Ok(Map::new()),
        }
    }

    pub async fn get_state(&self, key: &str) -> Result<Option<Value>, BotError> {
        check_key(key)?;
        Ok(self.state.get(&self.bot_id, key).await?)
    }

    pub async fn set_state(&self, key: &str, value: &Value) -> Result<(), BotError> {
        check_key(key)?;
        Ok(self.state.set(&self.bot_id, key, value).await?)
    }

    pub async fn delete_state(&self, key: &str) -> Result<bool, BotError> {
        check_key(key)?;
        Ok(self.state.delete(&self.bot_id, key).await?)
    }

    pub fn subscribe(&self, kind: EventKind) {
        self.bus.subscribe(&self.bot_id, kind);
    }

    pub fn unsubscribe(&self, kind: EventKind) {
        self.bus.unsubscribe(&self.bot_id, kind);
    }

    pub fn log_info(&self, message: &str) {
        tracing::info!(bot_id = %self.bot_id, "{message}");
    }

    pub fn log_warn(&self, message: &str) {
        tracing::warn!(bot_id = %self.bot_id, "{message}");
    }

    pub fn log_error(&self, message: &str) {
        tracing::error!(bot_id = %self.bot_id, "{message}");
    }
}

fn check_key(key: &str) -> Result<(), BotError> {
    if key.starts_with(RESERVED_PREFIX) {
        return Err(BotError::CommandFailed(format!("state key '{key}' is reserved")));
    }
    Ok(())
}
