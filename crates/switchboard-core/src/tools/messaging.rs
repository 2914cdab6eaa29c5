//! Direct message operations against the backend.

use serde_json::{Value, json};

use switchboard_types::error::{BackendError, ToolError};
use switchboard_types::tool::{ParamKind, ParamSpec};

use super::{ToolServices, add, int, limit, text};
use crate::tool::ToolRegistry;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 500;

fn chat_and_message() -> ParamSpec {
    ParamSpec::new()
        .required("chat_id", ParamKind::Integer, "Chat id")
        .required("message_id", ParamKind::Integer, "Message id within the chat")
}

/// Record the backend call in the audit trail and pass its result through.
async fn audited<T>(
    services: &ToolServices,
    op: &str,
    chat_id: i64,
    message_id: Option<i64>,
    result: Result<T, BackendError>,
) -> Result<T, ToolError> {
    let error = result.as_ref().err().map(ToString::to_string);
    services
        .audit
        .record_backend_op(op, chat_id, message_id, error.is_none(), error.as_deref())
        .await;
    Ok(result?)
}

pub(super) fn register(registry: &ToolRegistry, services: &ToolServices) -> Result<(), ToolError> {
    add(
        registry,
        services,
        "send_message",
        "Send a text message to a chat",
        ParamSpec::new()
            .required("chat_id", ParamKind::Integer, "Target chat id")
            .required("text", ParamKind::String, "Message text"),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let body = text(&params, "text")?;
            if body.is_empty() {
                return Err(ToolError::invalid_param("text", "must not be empty"));
            }
            let sent = s.backend.send_message(chat_id, body).await;
            let message_id = sent.as_ref().ok().copied();
            let message_id = audited(&s, "send_message", chat_id, message_id, sent).await?;
            Ok(json!({ "chat_id": chat_id, "message_id": message_id }))
        },
    )?;

    add(
        registry,
        services,
        "edit_message",
        "Replace the text of an existing message",
        chat_and_message().required("text", ParamKind::String, "New message text"),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let message_id = int(&params, "message_id")?;
            let body = text(&params, "text")?;
            let result = s.backend.edit_message(chat_id, message_id, body).await;
            audited(&s, "edit_message", chat_id, Some(message_id), result).await?;
            Ok(json!({ "edited": true, "chat_id": chat_id, "message_id": message_id }))
        },
    )?;

    add(
        registry,
        services,
        "delete_message",
        "Delete a message",
        chat_and_message(),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let message_id = int(&params, "message_id")?;
            let result = s.backend.delete_message(chat_id, message_id).await;
            audited(&s, "delete_message", chat_id, Some(message_id), result).await?;
            Ok(json!({ "deleted": true, "chat_id": chat_id, "message_id": message_id }))
        },
    )?;

    add(
        registry,
        services,
        "forward_message",
        "Forward a message to another chat",
        ParamSpec::new()
            .required("from_chat_id", ParamKind::Integer, "Source chat id")
            .required("to_chat_id", ParamKind::Integer, "Destination chat id")
            .required("message_id", ParamKind::Integer, "Message id in the source chat"),
        |s, _ctx, params| async move {
            let from = int(&params, "from_chat_id")?;
            let to = int(&params, "to_chat_id")?;
            let message_id = int(&params, "message_id")?;
            let result = s.backend.forward_message(from, to, message_id).await;
            audited(&s, "forward_message", from, Some(message_id), result).await?;
            Ok(json!({ "forwarded": true, "from_chat_id": from, "to_chat_id": to }))
        },
    )?;

    add(
        registry,
        services,
        "pin_message",
        "Pin a message in its chat",
        chat_and_message(),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let message_id = int(&params, "message_id")?;
            let result = s.backend.pin_message(chat_id, message_id).await;
            audited(&s, "pin_message", chat_id, Some(message_id), result).await?;
            Ok(json!({ "pinned": true }))
        },
    )?;

    add(
        registry,
        services,
        "unpin_message",
        "Unpin a message",
        chat_and_message(),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let message_id = int(&params, "message_id")?;
            let result = s.backend.unpin_message(chat_id, message_id).await;
            audited(&s, "unpin_message", chat_id, Some(message_id), result).await?;
            Ok(json!({ "pinned": false }))
        },
    )?;

    add(
        registry,
        services,
        "add_reaction",
        "React to a message with an emoji",
        chat_and_message().required("emoji", ParamKind::String, "Reaction emoji"),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let message_id = int(&params, "message_id")?;
            let emoji = text(&params, "emoji")?;
            let result = s.backend.add_reaction(chat_id, message_id, emoji).await;
            audited(&s, "add_reaction", chat_id, Some(message_id), result).await?;
            Ok(json!({ "reacted": true, "emoji": emoji }))
        },
    )?;

    add(
        registry,
        services,
        "get_message",
        "Fetch a single message",
        chat_and_message(),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let message_id = int(&params, "message_id")?;
            let message = s.backend.get_message(chat_id, message_id).await?;
            Ok(serde_json::to_value(message).unwrap_or(Value::Null))
        },
    )?;

    add(
        registry,
        services,
        "list_messages",
        "List recent messages in a chat, newest first",
        ParamSpec::new()
            .required("chat_id", ParamKind::Integer, "Chat id")
            .optional("limit", ParamKind::Integer, "Maximum messages to return"),
        |s, _ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let messages = s
                .backend
                .list_messages(chat_id, limit(&params, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT))
                .await?;
            Ok(json!({ "chat_id": chat_id, "count": messages.len(), "messages": messages }))
        },
    )?;

    Ok(())
}
