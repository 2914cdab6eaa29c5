//! Bot management tools.

use serde_json::{Map, Value, json};

use switchboard_types::error::{BotError, ToolError};
use switchboard_types::tool::{ParamKind, ParamSpec};

use super::{ToolServices, add, opt_bool, opt_text, text};
use crate::tool::ToolRegistry;

fn by_bot() -> ParamSpec {
    ParamSpec::new().required("bot_id", ParamKind::String, "Registered bot id")
}

fn snapshot_json(s: &ToolServices, bot_id: &str) -> Result<Value, ToolError> {
    let snapshot = s
        .bots
        .get_bot(bot_id)
        .ok_or_else(|| BotError::NotFound(bot_id.to_string()))?;
    Ok(serde_json::to_value(snapshot).unwrap_or(Value::Null))
}

pub(super) fn register(registry: &ToolRegistry, services: &ToolServices) -> Result<(), ToolError> {
    add(
        registry,
        services,
        "list_bots",
        "List registered bots with their state",
        ParamSpec::new(),
        |s, _ctx, _params| async move {
            let bots = s.bots.list_bots();
            Ok(json!({ "count": bots.len(), "bots": bots, "system": s.bots.system_status() }))
        },
    )?;

    add(
        registry,
        services,
        "get_bot_stats",
        "Execution statistics for one bot, or totals across all bots",
        ParamSpec::new()
            .optional("bot_id", ParamKind::String, "Registered bot id")
            .optional("reset", ParamKind::Boolean, "Zero the counters after reading them"),
        |s, _ctx, params| async move {
            let Some(bot_id) = opt_text(&params, "bot_id") else {
                return Ok(serde_json::to_value(s.bots.system_status()).unwrap_or(Value::Null));
            };
            let stats = s
                .bots
                .bot_stats(bot_id)
                .ok_or_else(|| BotError::NotFound(bot_id.to_string()))?;
            if opt_bool(&params, "reset").unwrap_or(false) {
                s.bots.reset_stats(bot_id)?;
            }
            Ok(json!({
                "bot_id": bot_id,
                "stats": stats,
                "avg_execution_time_ms": stats.avg_execution_time_ms(),
                "error_rate": stats.error_rate(),
            }))
        },
    )?;

    add(
        registry,
        services,
        "start_bot",
        "Start a registered bot",
        by_bot(),
        |s, _ctx, params| async move {
            let bot_id = text(&params, "bot_id")?;
            s.bots.start_bot(bot_id).await?;
            snapshot_json(&s, bot_id)
        },
    )?;

    add(
        registry,
        services,
        "stop_bot",
        "Stop a running bot",
        by_bot(),
        |s, _ctx, params| async move {
            let bot_id = text(&params, "bot_id")?;
            s.bots.stop_bot(bot_id).await?;
            snapshot_json(&s, bot_id)
        },
    )?;

    add(
        registry,
        services,
        "restart_bot",
        "Stop a bot if it is running, then start it",
        by_bot(),
        |s, _ctx, params| async move {
            let bot_id = text(&params, "bot_id")?;
            s.bots.restart_bot(bot_id).await?;
            snapshot_json(&s, bot_id)
        },
    )?;

    add(
        registry,
        services,
        "configure_bot",
        "Update a bot's config or enabled flag",
        by_bot()
            .optional("config", ParamKind::Object, "Config keys to set")
            .optional("replace", ParamKind::Boolean, "Replace the whole config instead of merging")
            .optional("enabled", ParamKind::Boolean, "Enable or disable the bot"),
        |s, _ctx, params| async move {
            let bot_id = text(&params, "bot_id")?;
            if let Some(Value::Object(update)) = params.get("config") {
                let config: Map<String, Value> = if opt_bool(&params, "replace").unwrap_or(false) {
                    update.clone()
                } else {
                    let mut merged = s.bots.get_bot_config(bot_id)?;
                    merged.extend(update.clone());
                    merged
                };
                s.bots.save_bot_config(bot_id, config).await?;
            }
            if let Some(enabled) = opt_bool(&params, "enabled") {
                s.bots.set_enabled(bot_id, enabled).await?;
            }
            snapshot_json(&s, bot_id)
        },
    )?;

    add(
        registry,
        services,
        "send_bot_command",
        "Run a command on a running bot",
        by_bot()
            .required("command", ParamKind::String, "Command name")
            .optional("args", ParamKind::Object, "Command arguments"),
        |s, _ctx, params| async move {
            let bot_id = text(&params, "bot_id")?;
            let command = text(&params, "command")?;
            let args = params.get("args").cloned().unwrap_or_else(|| json!({}));
            let result = s.bots.dispatch_command(bot_id, command, args).await?;
            Ok(json!({ "bot_id": bot_id, "command": command, "result": result }))
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use switchboard_types::event::Message;

    use crate::bot::{BoxBot, KEYWORD_BOT_ID, KeywordResponderBot};
    use crate::tools::harness::{Harness, harness};

    async fn with_keyword_bot() -> Harness {
        let h = harness().await;
        let identity = h.key("bot").await;
        h.services
            .bots
            .register_bot(BoxBot::new(KeywordResponderBot::new()), identity, true)
            .await
            .unwrap();
        h
    }

    #[tokio::test]
    async fn lifecycle_through_tools() {
        let h = with_keyword_bot().await;
        let admin = h.key("admin").await;

        let listed = h.call(&admin, "list_bots", json!({})).await.unwrap();
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["bots"][0]["running"], true);

        let stopped = h
            .call(&admin, "stop_bot", json!({"bot_id": KEYWORD_BOT_ID}))
            .await
            .unwrap();
        assert_eq!(stopped["lifecycle"], "stopped");

        let err = h
            .call(&admin, "stop_bot", json!({"bot_id": KEYWORD_BOT_ID}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let restarted = h
            .call(&admin, "restart_bot", json!({"bot_id": KEYWORD_BOT_ID}))
            .await
            .unwrap();
        assert_eq!(restarted["running"], true);

        let err = h
            .call(&admin, "start_bot", json!({"bot_id": "ghost"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn configured_keyword_is_answered() {
        let h = with_keyword_bot().await;
        let admin = h.key("admin").await;

        h.call(
            &admin,
            "configure_bot",
            json!({"bot_id": KEYWORD_BOT_ID, "config": {"keywords": {"price": "Five coins."}}}),
        )
        .await
        .unwrap();

        let test = h
            .call(
                &admin,
                "send_bot_command",
                json!({"bot_id": KEYWORD_BOT_ID, "command": "test", "args": {"text": "what PRICE?"}}),
            )
            .await
            .unwrap();
        assert_eq!(test["result"]["reply"], "Five coins.");

        h.services
            .bots
            .dispatch_message(Message {
                chat_id: 77,
                message_id: 5,
                sender_id: Some(1),
                text: "price please".into(),
                timestamp: Utc::now(),
                pinned: false,
                reactions: Vec::new(),
            })
            .await;
        assert_eq!(h.fake.sent(), vec![(77, "Five coins.".to_string())]);

        let stats = h
            .call(&admin, "get_bot_stats", json!({"bot_id": KEYWORD_BOT_ID}))
            .await
            .unwrap();
        assert_eq!(stats["stats"]["messages_processed"], 1);
        assert_eq!(stats["stats"]["commands_executed"], 1);
    }

    #[tokio::test]
    async fn read_only_sees_but_cannot_control() {
        let h = with_keyword_bot().await;
        let viewer = h.key("read_only").await;

        assert!(h.call(&viewer, "list_bots", json!({})).await.is_ok());
        let err = h
            .call(&viewer, "stop_bot", json!({"bot_id": KEYWORD_BOT_ID}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
        assert!(h.services.bots.is_running(KEYWORD_BOT_ID));
    }
}
