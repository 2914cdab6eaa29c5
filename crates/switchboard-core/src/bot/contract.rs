//! The Bot contract.
//!
//! Same pattern as the repositories and the backend: `Bot` uses RPITIT for
//! implementors, `BotDyn` is the object-safe twin, `BoxBot` is what the
//! manager stores.

use std::future::Future;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use switchboard_types::bot::BotInfo;
use switchboard_types::event::{BackendEvent, Message};

use super::context::BotContext;

/// A long-lived plugin driven by backend events and explicit commands.
///
/// Errors are plain strings: the manager records them, counts them and
/// never lets them escape into other bots.
pub trait Bot: Send + Sync {
    fn info(&self) -> BotInfo;

    /// Called on start. Subscribe to events through `ctx` here. Returning
    /// an error leaves the bot stopped.
    fn on_initialize(&self, ctx: BotContext) -> impl Future<Output = Result<(), String>> + Send;

    fn on_shutdown(&self) -> impl Future<Output = ()> + Send;

    fn on_message(&self, message: &Message) -> impl Future<Output = Result<(), String>> + Send;

    fn on_command(
        &self,
        command: &str,
        args: &Value,
    ) -> impl Future<Output = Result<Value, String>> + Send;

    fn on_message_edited(
        &self,
        _message: &Message,
    ) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }

    fn on_message_deleted(
        &self,
        _chat_id: i64,
        _message_id: i64,
    ) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }

    fn on_chat_joined(&self, _chat_id: i64) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }

    fn on_chat_left(&self, _chat_id: i64) -> impl Future<Output = Result<(), String>> + Send {
        async { Ok(()) }
    }

    /// Config a freshly registered bot starts with. Persisted values win.
    fn default_config(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Object-safe version of [`Bot`] with boxed futures.
pub trait BotDyn: Send + Sync {
    fn info_dyn(&self) -> BotInfo;
    fn on_initialize_boxed(&self, ctx: BotContext) -> BoxFuture<'_, Result<(), String>>;
    fn on_shutdown_boxed(&self) -> BoxFuture<'_, ()>;
    fn on_event_boxed<'a>(&'a self, event: &'a BackendEvent) -> BoxFuture<'a, Result<(), String>>;
    fn on_command_boxed<'a>(
        &'a self,
        command: &'a str,
        args: &'a Value,
    ) -> BoxFuture<'a, Result<Value, String>>;
    fn default_config_dyn(&self) -> Map<String, Value>;
}

impl<T: Bot> BotDyn for T {
    fn info_dyn(&self) -> BotInfo {
        self.info()
    }

    fn on_initialize_boxed(&self, ctx: BotContext) -> BoxFuture<'_, Result<(), String>> {
        self.on_initialize(ctx).boxed()
    }

    fn on_shutdown_boxed(&self) -> BoxFuture<'_, ()> {
        self.on_shutdown().boxed()
    }

    fn on_event_boxed<'a>(&'a self, event: &'a BackendEvent) -> BoxFuture<'a, Result<(), String>> {
        match event {
            BackendEvent::MessageReceived(m) => self.on_message(m).boxed(),
            BackendEvent::MessageEdited(m) => self.on_message_edited(m).boxed(),
            BackendEvent::MessageDeleted {
                chat_id,
                message_id,
            } => self.on_message_deleted(*chat_id, *message_id).boxed(),
            BackendEvent::ChatJoined { chat_id } => self.on_chat_joined(*chat_id).boxed(),
            BackendEvent::ChatLeft { chat_id } => self.on_chat_left(*chat_id).boxed(),
        }
    }

    fn on_command_boxed<'a>(
        &'a self,
        command: &'a str,
        args: &'a Value,
    ) -> BoxFuture<'a, Result<Value, String>> {
        self.on_command(command, args).boxed()
    }

    fn default_config_dyn(&self) -> Map<String, Value> {
        self.default_config()
    }
}

/// Type-erased bot.
pub struct BoxBot {
    inner: Box<dyn BotDyn>,
}

impl BoxBot {
    pub fn new<T: Bot + 'static>(bot: T) -> Self {
        Self {
            inner: Box::new(bot),
        }
    }

    pub fn info(&self) -> BotInfo {
        self.inner.info_dyn()
    }

    pub async fn on_initialize(&self, ctx: BotContext) -> Result<(), String> {
        self.inner.on_initialize_boxed(ctx).await
    }

    pub async fn on_shutdown(&self) {
        self.inner.on_shutdown_boxed().await
    }

    /// Route a backend event to the matching handler.
    pub async fn on_event(&self, event: &BackendEvent) -> Result<(), String> {
        self.inner.on_event_boxed(event).await
    }

    pub async fn on_command(&self, command: &str, args: &Value) -> Result<Value, String> {
        self.inner.on_command_boxed(command, args).await
    }

    pub fn default_config(&self) -> Map<String, Value> {
        self.inner.default_config_dyn()
    }
}
