//! Scheduled message tools.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use switchboard_types::error::ToolError;
use switchboard_types::schedule::{Recurrence, ScheduleId, ScheduleKind, ScheduledMessage};
use switchboard_types::tool::{ParamKind, ParamSpec};

use super::{ToolServices, add, decode, int, opt_bool, opt_int, parsed, text};
use crate::tool::ToolRegistry;

fn schedule_id(params: &Value) -> Result<ScheduleId, ToolError> {
    text(params, "schedule_id")?
        .parse()
        .map_err(|_| ToolError::invalid_param("schedule_id", "is not a valid id"))
}

fn by_id() -> ParamSpec {
    ParamSpec::new().required("schedule_id", ParamKind::String, "Scheduled message id")
}

fn to_json(entry: &ScheduledMessage) -> Value {
    serde_json::to_value(entry).unwrap_or(Value::Null)
}

pub(super) fn register(registry: &ToolRegistry, services: &ToolServices) -> Result<(), ToolError> {
    add(
        registry,
        services,
        "schedule_message",
        "Schedule a message once, after a delay, or on a recurring pattern",
        ParamSpec::new()
            .required("chat_id", ParamKind::Integer, "Target chat id")
            .required("text", ParamKind::String, "Message text")
            .optional(
                "schedule_type",
                ParamKind::String,
                "once, delayed or recurring; inferred from the other fields when omitted",
            )
            .optional("send_at", ParamKind::Timestamp, "First delivery time (RFC 3339)")
            .optional("delay_seconds", ParamKind::Integer, "Delay before delivery")
            .optional("pattern", ParamKind::String, "hourly, daily, weekly or monthly")
            .optional("max_occurrences", ParamKind::Integer, "Stop after this many sends"),
        |s, ctx, params| async move {
            let chat_id = int(&params, "chat_id")?;
            let body = text(&params, "text")?;
            let send_at: Option<DateTime<Utc>> = decode(&params, "send_at")?;
            let pattern: Option<Recurrence> = parsed(&params, "pattern")?;
            let kind = match parsed::<ScheduleKind>(&params, "schedule_type")? {
                Some(kind) => kind,
                None if pattern.is_some_and(|p| p != Recurrence::None) => ScheduleKind::Recurring,
                None if opt_int(&params, "delay_seconds").is_some() => ScheduleKind::Delayed,
                None => ScheduleKind::Once,
            };
            let caller = Some(ctx.caller);

            let entry = match kind {
                ScheduleKind::Once => {
                    let at = send_at
                        .ok_or_else(|| ToolError::invalid_param("send_at", "is required"))?;
                    s.scheduler.schedule_once(chat_id, body, at, caller).await?
                }
                ScheduleKind::Delayed => {
                    let delay = opt_int(&params, "delay_seconds")
                        .ok_or_else(|| ToolError::invalid_param("delay_seconds", "is required"))?;
                    s.scheduler
                        .schedule_delayed(chat_id, body, delay, caller)
                        .await?
                }
                ScheduleKind::Recurring => {
                    let pattern = pattern
                        .ok_or_else(|| ToolError::invalid_param("pattern", "is required"))?;
                    let max = match opt_int(&params, "max_occurrences") {
                        Some(n) if n < 0 => {
                            return Err(ToolError::invalid_param(
                                "max_occurrences",
                                "must not be negative",
                            ));
                        }
                        Some(n) => Some(u32::try_from(n).unwrap_or(u32::MAX)),
                        None => None,
                    };
                    let start = send_at.unwrap_or_else(|| s.clock.now());
                    s.scheduler
                        .schedule_recurring(chat_id, body, start, pattern, max, caller)
                        .await?
                }
            };
            Ok(to_json(&entry))
        },
    )?;

    add(
        registry,
        services,
        "cancel_scheduled",
        "Cancel a pending or paused scheduled message",
        by_id(),
        |s, _ctx, params| async move {
            let entry = s.scheduler.cancel(&schedule_id(&params)?).await?;
            Ok(to_json(&entry))
        },
    )?;

    add(
        registry,
        services,
        "pause_scheduled",
        "Pause a pending scheduled message",
        by_id(),
        |s, _ctx, params| async move {
            let entry = s.scheduler.pause(&schedule_id(&params)?).await?;
            Ok(to_json(&entry))
        },
    )?;

    add(
        registry,
        services,
        "resume_scheduled",
        "Resume a paused scheduled message",
        by_id(),
        |s, _ctx, params| async move {
            let entry = s.scheduler.resume(&schedule_id(&params)?).await?;
            Ok(to_json(&entry))
        },
    )?;

    add(
        registry,
        services,
        "update_scheduled",
        "Change the text of a scheduled message",
        by_id().required("text", ParamKind::String, "New message text"),
        |s, _ctx, params| async move {
            let id = schedule_id(&params)?;
            let entry = s.scheduler.update(&id, text(&params, "text")?).await?;
            Ok(to_json(&entry))
        },
    )?;

    add(
        registry,
        services,
        "list_scheduled",
        "List scheduled messages",
        ParamSpec::new()
            .optional("chat_id", ParamKind::Integer, "Only entries for this chat")
            .optional("active_only", ParamKind::Boolean, "Only pending or paused entries (default true)"),
        |s, _ctx, params| async move {
            let entries = s
                .scheduler
                .list(
                    opt_int(&params, "chat_id"),
                    opt_bool(&params, "active_only").unwrap_or(true),
                )
                .await?;
            Ok(json!({ "count": entries.len(), "scheduled": entries }))
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use crate::clock::Clock;
    use crate::tools::harness::harness;

    #[tokio::test]
    async fn schedule_and_cancel_round() {
        let h = harness().await;
        let key = h.key("developer").await;
        let at = h.clock.now() + Duration::minutes(10);

        let entry = h
            .call(
                &key,
                "schedule_message",
                json!({"chat_id": 8, "text": "reminder", "send_at": at.to_rfc3339()}),
            )
            .await
            .unwrap();
        assert_eq!(entry["kind"], "once");
        let id = entry["id"].as_str().unwrap().to_string();

        let cancelled = h
            .call(&key, "cancel_scheduled", json!({"schedule_id": id}))
            .await
            .unwrap();
        assert_eq!(cancelled["status"], "cancelled");

        let err = h
            .call(&key, "cancel_scheduled", json!({"schedule_id": id}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "ALREADY_TERMINAL");

        let listed = h.call(&key, "list_scheduled", json!({})).await.unwrap();
        assert_eq!(listed["count"], 0);
        let all = h
            .call(&key, "list_scheduled", json!({"active_only": false}))
            .await
            .unwrap();
        assert_eq!(all["count"], 1);
    }

    #[tokio::test]
    async fn kind_is_inferred() {
        let h = harness().await;
        let key = h.key("admin").await;

        let delayed = h
            .call(
                &key,
                "schedule_message",
                json!({"chat_id": 1, "text": "soon", "delay_seconds": 30}),
            )
            .await
            .unwrap();
        assert_eq!(delayed["kind"], "delayed");

        let recurring = h
            .call(
                &key,
                "schedule_message",
                json!({"chat_id": 1, "text": "standup", "pattern": "daily", "max_occurrences": 5}),
            )
            .await
            .unwrap();
        assert_eq!(recurring["kind"], "recurring");
        assert_eq!(recurring["recurrence"], "daily");
        assert_eq!(recurring["max_occurrences"], 5);
    }

    #[tokio::test]
    async fn once_without_time_is_rejected() {
        let h = harness().await;
        let key = h.key("admin").await;
        let err = h
            .call(
                &key,
                "schedule_message",
                json!({"chat_id": 1, "text": "when?", "schedule_type": "once"}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");

        let err = h
            .call(&key, "pause_scheduled", json!({"schedule_id": "not-a-uuid"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn out_of_range_delay_is_rejected() {
        let h = harness().await;
        let key = h.key("admin").await;
        let err = h
            .call(
                &key,
                "schedule_message",
                json!({"chat_id": 1, "text": "far away", "delay_seconds": i64::MAX}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn read_only_cannot_schedule() {
        let h = harness().await;
        let key = h.key("read_only").await;
        let err = h
            .call(&key, "list_scheduled", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");
    }
}
