//! Permission-gated tool dispatch.
//!
//! Every call runs the same pipeline: lookup, key check, one authorization
//! decision per required permission, parameter validation, a write-through
//! invocation record, the handler under a timeout, and a completion record.
//! Nothing with a side effect runs before authorization and validation pass.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use serde_json::{Value, json};

use switchboard_types::audit::AuditStatus;
use switchboard_types::auth::ApiKeyId;
use switchboard_types::error::{AccessError, ToolError};
use switchboard_types::tool::{ToolCall, ToolDefinition, ToolResponse};

use super::registry::{ToolContext, ToolRegistry};
use crate::audit::AuditLog;
use crate::auth::AccessControl;

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    access: Arc<AccessControl>,
    audit: Arc<AuditLog>,
    handler_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        access: Arc<AccessControl>,
        audit: Arc<AuditLog>,
        handler_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            access,
            audit,
            handler_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn list_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    /// Frame a [`ToolCall`] envelope into a [`ToolResponse`].
    pub async fn handle(&self, call: ToolCall) -> ToolResponse {
        ToolResponse::from_result(
            self.dispatch(&call.caller_key_id, &call.tool_name, call.params)
                .await,
        )
    }

    pub async fn dispatch(
        &self,
        key_id: &ApiKeyId,
        tool_name: &str,
        params: Value,
    ) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ToolError::ToolNotFound(tool_name.to_string()))?;

        if self.access.ensure_active(key_id).await.is_err() {
            self.audit.record_rejected_key(Some(*key_id), tool_name).await;
            return Err(ToolError::AuthInvalid);
        }

        for permission in &tool.definition.required_permissions {
            match self.access.check_permission(key_id, permission).await {
                Ok(granted) => {
                    self.audit
                        .record_auth(Some(*key_id), permission, granted, Some(tool_name))
                        .await;
                    if !granted {
                        tracing::debug!(
                            key_id = %key_id,
                            tool = tool_name,
                            permission = %permission,
                            "permission denied"
                        );
                        return Err(ToolError::PermissionDenied(permission.clone()));
                    }
                }
                // Revoked or expired between the active check and this one.
                Err(AccessError::Invalid) => {
                    self.audit.record_rejected_key(Some(*key_id), tool_name).await;
                    return Err(ToolError::AuthInvalid);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let params = if params.is_null() { json!({}) } else { params };
        tool.definition
            .params
            .validate(&params)
            .map_err(ToolError::InvalidParams)?;

        let correlation_id = match self
            .audit
            .record_invocation(Some(*key_id), tool_name, &params)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(tool = tool_name, error = %e, "audit store unavailable, rejecting call");
                return Err(e.into());
            }
        };

        let ctx = ToolContext {
            caller: *key_id,
            tool_name: tool_name.to_string(),
            correlation_id,
        };
        let started = Instant::now();
        let call = AssertUnwindSafe((tool.handler)(ctx, params)).catch_unwind();
        let result = match tokio::time::timeout(self.handler_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ToolError::Internal(format!("tool '{tool_name}' panicked"))),
            Err(_) => Err(ToolError::Timeout(self.handler_timeout)),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, detail) = match &result {
            Ok(_) => (AuditStatus::Success, None),
            Err(e) => (
                AuditStatus::Failure,
                Some(json!({ "errorCode": e.code(), "errorMessage": e.to_string() })),
            ),
        };
        self.audit
            .record_completion(correlation_id, Some(*key_id), tool_name, status, duration_ms, detail)
            .await;

        match &result {
            Ok(_) => tracing::debug!(tool = tool_name, duration_ms, "tool completed"),
            Err(e) => tracing::warn!(tool = tool_name, duration_ms, error = %e, "tool failed"),
        }
        result
    }
}
