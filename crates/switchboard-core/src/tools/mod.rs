//! Built-in tools exposed through the dispatcher.
//!
//! Each submodule registers one family of tools. Handlers capture a clone
//! of [`ToolServices`]; required permissions come from the static table in
//! [`crate::auth::tool_permissions`].

mod admin;
mod batch;
mod bots;
mod messaging;
mod scheduling;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;

use switchboard_types::error::ToolError;
use switchboard_types::tool::{ParamSpec, ToolDefinition};

use crate::audit::AuditLog;
use crate::auth::{AccessControl, tool_permissions};
use crate::backend::BoxMessagingBackend;
use crate::batch::BatchExecutor;
use crate::bot::BotManager;
use crate::clock::Clock;
use crate::scheduler::Scheduler;
use crate::tool::{ToolContext, ToolRegistry, tool_fn};

/// Services the built-in tools operate on.
#[derive(Clone)]
pub struct ToolServices {
    pub backend: Arc<BoxMessagingBackend>,
    pub access: Arc<AccessControl>,
    pub audit: Arc<AuditLog>,
    pub scheduler: Arc<Scheduler>,
    pub batch: Arc<BatchExecutor>,
    pub bots: Arc<BotManager>,
    pub clock: Arc<dyn Clock>,
    pub started_at: DateTime<Utc>,
    /// Where `export_audit_log` writes its files.
    pub export_dir: PathBuf,
}

/// Register every built-in tool. Fails on the first name collision.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    services: &ToolServices,
) -> Result<(), ToolError> {
    messaging::register(registry, services)?;
    scheduling::register(registry, services)?;
    batch::register(registry, services)?;
    bots::register(registry, services)?;
    admin::register(registry, services)?;
    tracing::info!(tools = registry.len(), "registered built-in tools");
    Ok(())
}

/// Register one tool whose handler receives the shared services.
pub(crate) fn add<F, Fut>(
    registry: &ToolRegistry,
    services: &ToolServices,
    name: &str,
    description: &str,
    params: ParamSpec,
    handler: F,
) -> Result<(), ToolError>
where
    F: Fn(ToolServices, ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    let services = services.clone();
    registry.register(
        ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            required_permissions: tool_permissions(name),
            params,
        },
        tool_fn(move |ctx, params| handler(services.clone(), ctx, params)),
    )
}

// Parameter accessors. Types are already checked by `ParamSpec::validate`;
// these only turn a missing or malformed value into a field error.

pub(crate) fn int(params: &Value, field: &str) -> Result<i64, ToolError> {
    params[field]
        .as_i64()
        .ok_or_else(|| ToolError::invalid_param(field, "is required"))
}

pub(crate) fn opt_int(params: &Value, field: &str) -> Option<i64> {
    params.get(field).and_then(Value::as_i64)
}

pub(crate) fn text<'a>(params: &'a Value, field: &str) -> Result<&'a str, ToolError> {
    params[field]
        .as_str()
        .ok_or_else(|| ToolError::invalid_param(field, "is required"))
}

pub(crate) fn opt_text<'a>(params: &'a Value, field: &str) -> Option<&'a str> {
    params.get(field).and_then(Value::as_str)
}

pub(crate) fn opt_bool(params: &Value, field: &str) -> Option<bool> {
    params.get(field).and_then(Value::as_bool)
}

/// Deserialize an optional field into `T`.
pub(crate) fn decode<T: DeserializeOwned>(params: &Value, field: &str) -> Result<Option<T>, ToolError> {
    match params.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|e| ToolError::invalid_param(field, e.to_string())),
    }
}

/// Parse a string field with `FromStr`.
pub(crate) fn parsed<T>(params: &Value, field: &str) -> Result<Option<T>, ToolError>
where
    T: std::str::FromStr<Err = String>,
{
    opt_text(params, field)
        .map(|s| s.parse::<T>().map_err(|e| ToolError::invalid_param(field, e)))
        .transpose()
}

pub(crate) fn limit(params: &Value, default: usize, max: usize) -> usize {
    opt_int(params, "limit")
        .map(|l| l.clamp(1, max as i64) as usize)
        .unwrap_or(default)
}

#[cfg(test)]
pub(crate) mod harness {
    //! A fully wired tool surface over in-memory fakes.

    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::Value;

    use switchboard_types::auth::ApiKeyId;
    use switchboard_types::error::ToolError;

    use super::{ToolServices, register_builtin_tools};
    use crate::audit::AuditLog;
    use crate::auth::{AccessControl, CreateKeyRequest};
    use crate::backend::BoxMessagingBackend;
    use crate::batch::BatchExecutor;
    use crate::bot::BotManager;
    use crate::clock::{Clock, ManualClock};
    use crate::event::EventBus;
    use crate::repository::{
        BoxApiKeyRepository, BoxAuditRepository, BoxBatchJobRepository, BoxBotStateRepository,
        BoxScheduleRepository,
    };
    use crate::scheduler::Scheduler;
    use crate::settings::RuntimeSettings;
    use crate::testing::{
        FakeBackend, MemoryApiKeys, MemoryAudit, MemoryBatchJobs, MemoryBotState,
        MemorySchedules, PlainHasher,
    };
    use crate::tool::{Dispatcher, ToolRegistry};

    pub struct Harness {
        pub dispatcher: Arc<Dispatcher>,
        pub services: ToolServices,
        pub fake: FakeBackend,
        pub clock: Arc<ManualClock>,
    }

    impl Harness {
        pub async fn key(&self, role: &str) -> ApiKeyId {
            self.services
                .access
                .create_key(CreateKeyRequest {
                    name: format!("{role} key"),
                    role: role.to_string(),
                    custom_permissions: None,
                    expires_at: None,
                })
                .await
                .unwrap()
                .key
                .id
        }

        pub async fn call(&self, key: &ApiKeyId, tool: &str, params: Value) -> Result<Value, ToolError> {
            self.dispatcher.dispatch(key, tool, params).await
        }
    }

    pub async fn harness() -> Harness {
        let settings = RuntimeSettings::default();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let fake = FakeBackend::new();
        let backend = Arc::new(BoxMessagingBackend::new(fake.clone(), Duration::from_secs(1)));
        let access = Arc::new(
            AccessControl::load(
                BoxApiKeyRepository::new(MemoryApiKeys::default()),
                Arc::new(PlainHasher),
                clock.clone(),
            )
            .await
            .unwrap(),
        );
        let audit = Arc::new(AuditLog::new(
            BoxAuditRepository::new(MemoryAudit::default()),
            clock.clone(),
            64,
        ));
        let registry = Arc::new(ToolRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            access.clone(),
            audit.clone(),
            Duration::from_secs(2),
        ));
        let bots = Arc::new(BotManager::new(
            EventBus::new(audit.clone(), Duration::from_secs(1)),
            access.clone(),
            audit.clone(),
            Arc::new(BoxBotStateRepository::new(MemoryBotState::default())),
            Arc::downgrade(&dispatcher),
            clock.clone(),
            &settings,
        ));
        let scheduler = Arc::new(Scheduler::new(
            BoxScheduleRepository::new(MemorySchedules::default()),
            backend.clone(),
            audit.clone(),
            clock.clone(),
            4,
        ));
        let batch = Arc::new(BatchExecutor::new(
            backend.clone(),
            BoxBatchJobRepository::new(MemoryBatchJobs::default()),
            audit.clone(),
            clock.clone(),
            &settings,
        ));
        let services = ToolServices {
            backend,
            access,
            audit,
            scheduler,
            batch,
            bots,
            clock: clock.clone(),
            started_at: clock.now(),
            export_dir: std::env::temp_dir()
                .join(format!("switchboard-exports-{}", uuid::Uuid::new_v4())),
        };
        register_builtin_tools(&registry, &services).unwrap();
        Harness {
            dispatcher,
            services,
            fake,
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors_report_field_names() {
        let params = json!({"chat_id": 4, "text": "hi", "limit": 500});
        assert_eq!(int(&params, "chat_id").unwrap(), 4);
        assert_eq!(text(&params, "text").unwrap(), "hi");
        assert_eq!(limit(&params, 50, 200), 200);
        match int(&params, "message_id") {
            Err(ToolError::InvalidParams(fields)) => assert_eq!(fields[0].field, "message_id"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn every_listed_tool_has_its_permission() {
        let h = harness::harness().await;
        let definitions = h.dispatcher.list_definitions();
        assert!(definitions.len() >= 30);
        for def in &definitions {
            assert_eq!(def.required_permissions, tool_permissions(&def.name), "{}", def.name);
        }
        let health = definitions.iter().find(|d| d.name == "health_check").unwrap();
        assert!(health.required_permissions.is_empty());
    }
}
