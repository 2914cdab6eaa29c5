//! API key authentication extractor.
//!
//! Reads the plaintext key from `Authorization: Bearer <key>` or
//! `X-API-Key: <key>` and resolves it to a key id through AccessControl.
//! Permission checks happen later, in the dispatcher.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use switchboard_types::auth::ApiKeyId;

use crate::http::error::AppError;
use crate::state::AppState;

/// The authenticated caller's key id.
pub struct CallerKey(pub ApiKeyId);

impl FromRequestParts<AppState> for CallerKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let secret = extract_api_key(parts)?;
        match state.access.validate(&secret).await {
            Ok(key_id) => Ok(CallerKey(key_id)),
            Err(e) => {
                tracing::debug!(error = %e, "rejected API key");
                Err(AppError::Unauthorized(
                    "invalid, expired or revoked API key".to_string(),
                ))
            }
        }
    }
}

fn extract_api_key(parts: &Parts) -> Result<String, AppError> {
    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth
            .to_str()
            .map_err(|_| AppError::Unauthorized("invalid Authorization header encoding".into()))?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(key.trim().to_string());
        }
    }

    if let Some(key) = parts.headers.get("x-api-key") {
        let key_str = key
            .to_str()
            .map_err(|_| AppError::Unauthorized("invalid X-API-Key header encoding".into()))?;
        return Ok(key_str.trim().to_string());
    }

    Err(AppError::Unauthorized(
        "missing API key; send 'Authorization: Bearer <key>' or 'X-API-Key: <key>'".into(),
    ))
}
