//! Audit, key management and health tools.

use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use switchboard_types::audit::{AuditEventKind, AuditFilter, ExportFormat};
use switchboard_types::auth::{ApiKeyId, Permission};
use switchboard_types::error::ToolError;
use switchboard_types::tool::{ParamKind, ParamSpec};

use super::{ToolServices, add, decode, limit, opt_bool, opt_text, parsed, text};
use crate::auth::CreateKeyRequest;
use crate::tool::ToolRegistry;

fn key_id(params: &Value) -> Result<ApiKeyId, ToolError> {
    text(params, "key_id")?
        .parse()
        .map_err(|_| ToolError::invalid_param("key_id", "is not a valid id"))
}

/// A bare file name inside the export directory; no separators or dot names.
fn export_file_name(params: &Value) -> Result<&str, ToolError> {
    let name = text(params, "file_name")?;
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(ToolError::invalid_param(
            "file_name",
            "must be a plain file name",
        ));
    }
    Ok(name)
}

fn window(params: &Value) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>), ToolError> {
    Ok((decode(params, "since")?, decode(params, "until")?))
}

pub(super) fn register(registry: &ToolRegistry, services: &ToolServices) -> Result<(), ToolError> {
    add(
        registry,
        services,
        "get_audit_log",
        "Query the audit trail, newest first",
        ParamSpec::new()
            .optional("kind", ParamKind::String, "Event kind, e.g. tool_invoked or auth_event")
            .optional("key_id", ParamKind::String, "Only events by this API key")
            .optional("tool_name", ParamKind::String, "Only events for this tool")
            .optional("since", ParamKind::Timestamp, "Inclusive lower bound")
            .optional("until", ParamKind::Timestamp, "Inclusive upper bound")
            .optional("limit", ParamKind::Integer, "Maximum events to return"),
        |s, _ctx, params| async move {
            let (since, until) = window(&params)?;
            let filter = AuditFilter {
                kind: parsed::<AuditEventKind>(&params, "kind")?,
                key_id: match opt_text(&params, "key_id") {
                    Some(_) => Some(key_id(&params)?),
                    None => None,
                },
                tool_name: opt_text(&params, "tool_name").map(str::to_string),
                since,
                until,
            };
            let events = s.audit.query(&filter, limit(&params, 100, 1000)).await?;
            Ok(json!({ "count": events.len(), "events": events }))
        },
    )?;

    add(
        registry,
        services,
        "get_audit_stats",
        "Aggregate counts over the audit trail",
        ParamSpec::new()
            .optional("since", ParamKind::Timestamp, "Inclusive lower bound")
            .optional("until", ParamKind::Timestamp, "Inclusive upper bound"),
        |s, _ctx, params| async move {
            let (since, until) = window(&params)?;
            let stats = s
                .audit
                .statistics(&AuditFilter {
                    since,
                    until,
                    ..Default::default()
                })
                .await?;
            Ok(serde_json::to_value(stats).unwrap_or(Value::Null))
        },
    )?;

    add(
        registry,
        services,
        "export_audit_log",
        "Write matching audit events, oldest first, to a file in the export directory",
        ParamSpec::new()
            .required("file_name", ParamKind::String, "File name inside the export directory")
            .optional("format", ParamKind::String, "json (one array) or jsonl (one event per line)")
            .optional("kind", ParamKind::String, "Event kind, e.g. tool_invoked or auth_event")
            .optional("since", ParamKind::Timestamp, "Inclusive lower bound")
            .optional("until", ParamKind::Timestamp, "Inclusive upper bound"),
        |s, _ctx, params| async move {
            let path = s.export_dir.join(export_file_name(&params)?);
            let format: ExportFormat = parsed(&params, "format")?.unwrap_or_default();
            let (since, until) = window(&params)?;
            let filter = AuditFilter {
                kind: parsed::<AuditEventKind>(&params, "kind")?,
                since,
                until,
                ..Default::default()
            };
            let count = s.audit.export(&filter, &path, format).await?;
            Ok(json!({
                "path": path.display().to_string(),
                "format": format,
                "count": count,
            }))
        },
    )?;

    add(
        registry,
        services,
        "create_api_key",
        "Issue a new API key. The secret is returned once and never stored",
        ParamSpec::new()
            .required("name", ParamKind::String, "Label for the key")
            .required("role", ParamKind::String, "admin, developer, bot or read_only")
            .optional("permissions", ParamKind::Array, "Custom permissions replacing the role's set")
            .optional("expires_at", ParamKind::Timestamp, "Expiry time"),
        |s, ctx, params| async move {
            let request = CreateKeyRequest {
                name: text(&params, "name")?.to_string(),
                role: text(&params, "role")?.to_string(),
                custom_permissions: decode::<Vec<String>>(&params, "permissions")?
                    .map(|list| list.into_iter().map(Permission::new).collect()),
                expires_at: decode(&params, "expires_at")?,
            };
            let created = s.access.create_key(request).await?;
            s.audit
                .record_system(
                    "api_key_created",
                    json!({ "key_id": created.key.id, "role": created.key.role, "by": ctx.caller }),
                )
                .await;
            Ok(json!({
                "key": created.key,
                "secret": created.secret.expose_secret(),
            }))
        },
    )?;

    add(
        registry,
        services,
        "revoke_api_key",
        "Revoke an API key immediately",
        ParamSpec::new().required("key_id", ParamKind::String, "Key id"),
        |s, ctx, params| async move {
            let id = key_id(&params)?;
            s.access.revoke(&id).await?;
            s.audit
                .record_system("api_key_revoked", json!({ "key_id": id, "by": ctx.caller }))
                .await;
            Ok(json!({ "key_id": id, "revoked": true }))
        },
    )?;

    add(
        registry,
        services,
        "list_api_keys",
        "List API keys without their secrets",
        ParamSpec::new().optional("include_revoked", ParamKind::Boolean, "Include revoked keys"),
        |s, _ctx, params| async move {
            let keys = s
                .access
                .list_keys(opt_bool(&params, "include_revoked").unwrap_or(false))
                .await;
            Ok(json!({ "count": keys.len(), "keys": keys }))
        },
    )?;

    add(
        registry,
        services,
        "health_check",
        "Liveness and component summary",
        ParamSpec::new(),
        |s, _ctx, _params| async move {
            let now = s.clock.now();
            let active_schedules = match s.scheduler.active_count().await {
                Ok(n) => json!(n),
                Err(e) => json!({ "error": e.to_string() }),
            };
            Ok(json!({
                "status": "ok",
                "version": env!("CARGO_PKG_VERSION"),
                "uptime_seconds": (now - s.started_at).num_seconds().max(0),
                "bots": s.bots.system_status(),
                "active_keys": s.access.active_key_count().await,
                "active_schedules": active_schedules,
                "batch": s.batch.statistics(),
                "audit_pending": s.audit.pending(),
            }))
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use switchboard_types::auth::ApiKeyId;

    use crate::tools::harness::harness;

    #[tokio::test]
    async fn key_lifecycle_through_tools() {
        let h = harness().await;
        let admin = h.key("admin").await;

        let created = h
            .call(
                &admin,
                "create_api_key",
                json!({"name": "ci", "role": "developer", "permissions": ["read:messages"]}),
            )
            .await
            .unwrap();
        assert!(created["secret"].as_str().unwrap().len() > 16);
        assert_eq!(created["key"]["permissions"], json!(["read:messages"]));
        let new_key: ApiKeyId = created["key"]["id"].as_str().unwrap().parse().unwrap();

        // The custom list replaced the developer bundle.
        let err = h
            .call(&new_key, "send_message", json!({"chat_id": 1, "text": "x"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");

        h.call(&admin, "revoke_api_key", json!({"key_id": new_key.to_string()}))
            .await
            .unwrap();
        let err = h.call(&new_key, "health_check", json!({})).await.unwrap_err();
        assert_eq!(err.code(), "AUTH_INVALID");

        let active = h.call(&admin, "list_api_keys", json!({})).await.unwrap();
        assert_eq!(active["count"], 1);
        let all = h
            .call(&admin, "list_api_keys", json!({"include_revoked": true}))
            .await
            .unwrap();
        assert_eq!(all["count"], 2);
        assert!(all["keys"][0].get("secret_hash").is_none());
    }

    #[tokio::test]
    async fn unknown_role_is_invalid_params() {
        let h = harness().await;
        let admin = h.key("admin").await;
        let err = h
            .call(&admin, "create_api_key", json!({"name": "x", "role": "overlord"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_PARAMS");
    }

    #[tokio::test]
    async fn audit_log_shows_denials() {
        let h = harness().await;
        let admin = h.key("admin").await;
        let viewer = h.key("read_only").await;
        let _ = h
            .call(&viewer, "send_message", json!({"chat_id": 1, "text": "x"}))
            .await;

        let log = h
            .call(
                &admin,
                "get_audit_log",
                json!({"kind": "auth_event", "key_id": viewer.to_string()}),
            )
            .await
            .unwrap();
        assert_eq!(log["count"], 1);
        assert_eq!(log["events"][0]["status"], "denied");

        let stats = h.call(&admin, "get_audit_stats", json!({})).await.unwrap();
        assert!(stats["denials"].as_u64().unwrap() >= 1);
    }

    #[tokio::test]
    async fn export_writes_into_export_dir() {
        let h = harness().await;
        let admin = h.key("admin").await;
        let viewer = h.key("read_only").await;
        let _ = h
            .call(&viewer, "send_message", json!({"chat_id": 1, "text": "x"}))
            .await;

        let result = h
            .call(
                &admin,
                "export_audit_log",
                json!({"file_name": "denials.json", "format": "json", "kind": "auth_event"}),
            )
            .await
            .unwrap();
        let path = h.services.export_dir.join("denials.json");
        assert_eq!(result["path"], path.display().to_string());
        assert!(result["count"].as_u64().unwrap() >= 1);
        let events: Vec<serde_json::Value> =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        assert!(events.iter().all(|e| e["kind"] == "auth_event"));
        assert!(events.iter().any(|e| e["status"] == "denied"));

        for bad in ["../escape.json", "nested/file.jsonl", ".."] {
            let err = h
                .call(&admin, "export_audit_log", json!({"file_name": bad}))
                .await
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_PARAMS");
        }
        let err = h
            .call(&viewer, "export_audit_log", json!({"file_name": "mine.jsonl"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PERMISSION_DENIED");

        let _ = tokio::fs::remove_dir_all(&h.services.export_dir).await;
    }

    #[tokio::test]
    async fn health_needs_no_permission() {
        let h = harness().await;
        let viewer = h.key("read_only").await;
        let health = h.call(&viewer, "health_check", json!({})).await.unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["active_keys"], 1);
    }
}
