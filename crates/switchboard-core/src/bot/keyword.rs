//! Built-in bot that answers configured keywords.
//!
//! Config shape: `{"keywords": {"help": "reply text", ...}}`. Matching is
//! case-insensitive substring matching; the first keyword in sorted order
//! wins. Replies go out through the dispatcher under the bot's identity.

use std::sync::Mutex;

use serde_json::{Map, Value, json};

use switchboard_types::auth::Permission;
use switchboard_types::bot::BotInfo;
use switchboard_types::event::{EventKind, Message};

use super::context::BotContext;
use super::contract::Bot;

pub const KEYWORD_BOT_ID: &str = "keyword_responder";

const REPLIES_KEY: &str = "replies_sent";

#[derive(Default)]
pub struct KeywordResponderBot {
    ctx: Mutex<Option<BotContext>>,
}

impl KeywordResponderBot {
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&self) -> Result<BotContext, String> {
        self.ctx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| "bot is not initialized".to_string())
    }

    async fn keywords(ctx: &BotContext) -> Result<Map<String, Value>, String> {
        let config = ctx.config().await.map_err(|e| e.to_string())?;
        match config.get("keywords") {
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Ok(Map::new()),
        }
    }
}

/// The reply for the first keyword found in `text`, if any.
fn match_reply(keywords: &Map<String, Value>, text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let mut names: Vec<&String> = keywords.keys().collect();
    names.sort();
    names.into_iter().find_map(|keyword| {
        if keyword.is_empty() || !lowered.contains(&keyword.to_lowercase()) {
            return None;
        }
        keywords[keyword].as_str().map(str::to_string)
    })
}

impl Bot for KeywordResponderBot {
    fn info(&self) -> BotInfo {
        BotInfo {
            id: KEYWORD_BOT_ID.to_string(),
            display_name: "Keyword Responder".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Replies to messages containing configured keywords".to_string(),
            required_permissions: vec![Permission::READ_MESSAGES, Permission::SEND_MESSAGES],
        }
    }

    async fn on_initialize(&self, ctx: BotContext) -> Result<(), String> {
        ctx.subscribe(EventKind::MessageReceived);
        ctx.log_info("keyword responder ready");
        *self.ctx.lock().unwrap_or_else(|e| e.into_inner()) = Some(ctx);
        Ok(())
    }

    async fn on_shutdown(&self) {
        self.ctx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    async fn on_message(&self, message: &Message) -> Result<(), String> {
        let ctx = self.context()?;
        let keywords = Self::keywords(&ctx).await?;

        // Our own replies come back as received messages.
        if keywords
            .values()
            .any(|reply| reply.as_str() == Some(message.text.as_str()))
        {
            return Ok(());
        }
        let Some(reply) = match_reply(&keywords, &message.text) else {
            return Ok(());
        };

        ctx.send_message(message.chat_id, &reply)
            .await
            .map_err(|e| e.to_string())?;

        let sent = ctx
            .get_state(REPLIES_KEY)
            .await
            .map_err(|e| e.to_string())?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        ctx.set_state(REPLIES_KEY, &json!(sent + 1))
            .await
            .map_err(|e| e.to_string())
    }

    async fn on_command(&self, command: &str, args: &Value) -> Result<Value, String> {
        let ctx = self.context()?;
        match command {
            "list_keywords" => Ok(Value::Object(Self::keywords(&ctx).await?)),
            "test" => {
                let text = args["text"].as_str().ok_or("missing 'text'")?;
                let keywords = Self::keywords(&ctx).await?;
                Ok(json!({ "reply": match_reply(&keywords, text) }))
            }
            "stats" => {
                let sent = ctx
                    .get_state(REPLIES_KEY)
                    .await
                    .map_err(|e| e.to_string())?
                    .unwrap_or(json!(0));
                Ok(json!({ "replies_sent": sent }))
            }
            other => Err(format!("unknown command '{other}'")),
        }
    }

    fn default_config(&self) -> Map<String, Value> {
        let mut keywords = Map::new();
        keywords.insert(
            "help".to_string(),
            json!("Send a message containing a keyword to get an answer."),
        );
        let mut config = Map::new();
        config.insert("keywords".to_string(), Value::Object(keywords));
        config
    }
}
