//! Tool listing and invocation.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use switchboard_types::tool::{ToolCall, ToolResponse};

use crate::http::error::{AppError, status_for_code};
use crate::http::extractors::auth::CallerKey;
use crate::state::AppState;

/// Body of `POST /v1/tools/call`. The caller comes from the API key.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
}

/// POST /v1/tools/call
pub async fn call_tool(
    State(state): State<AppState>,
    CallerKey(caller): CallerKey,
    body: Result<Json<CallRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ToolResponse>), AppError> {
    let Json(request) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let response = state
        .dispatcher
        .handle(ToolCall {
            tool_name: request.tool_name,
            params: request.params,
            caller_key_id: caller,
        })
        .await;

    let status = match &response {
        ToolResponse::Ok { .. } => StatusCode::OK,
        ToolResponse::Err { error_code, .. } => status_for_code(error_code),
    };
    Ok((status, Json(response)))
}

/// GET /v1/tools
pub async fn list_tools(State(state): State<AppState>, _caller: CallerKey) -> Json<Value> {
    let mut definitions = state.dispatcher.list_definitions();
    definitions.sort_by(|a, b| a.name.cmp(&b.name));
    let tools: Vec<Value> = definitions.iter().map(|d| d.to_listing()).collect();
    Json(json!({ "count": tools.len(), "tools": tools }))
}
