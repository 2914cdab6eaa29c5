//! Inbound message ingress for the loopback backend.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use switchboard_types::auth::Permission;

use crate::http::error::AppError;
use crate::http::extractors::auth::CallerKey;
use crate::state::AppState;

/// Body of `POST /v1/events`: a message as a platform user would send it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub chat_id: i64,
    pub sender_id: i64,
    pub text: String,
}

/// POST /v1/events
///
/// Requires `admin:bots`. The message is stored and published on the
/// backend event stream, so subscribed bots see it as received traffic.
pub async fn inject_message(
    State(state): State<AppState>,
    CallerKey(caller): CallerKey,
    body: Result<Json<InboundMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(inbound) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if inbound.text.trim().is_empty() {
        return Err(AppError::BadRequest("text is empty".to_string()));
    }

    let permission = Permission::ADMIN_BOTS;
    let granted = state
        .access
        .check_permission(&caller, &permission)
        .await
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;
    state
        .audit
        .record_auth(Some(caller), &permission, granted, None)
        .await;
    if !granted {
        return Err(AppError::Forbidden(format!("missing permission '{permission}'")));
    }

    let message = state
        .loopback
        .inject(inbound.chat_id, inbound.sender_id, &inbound.text);
    tracing::info!(chat_id = message.chat_id, message_id = message.message_id, "inbound message accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "chat_id": message.chat_id, "message_id": message.message_id })),
    ))
}
