//! Transport-level errors, rendered in the same `{errorCode, errorMessage}`
//! shape as a failed tool response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use switchboard_types::tool::ToolResponse;

#[derive(Debug)]
pub enum AppError {
    /// Missing, malformed or rejected API key.
    Unauthorized(String),
    /// The request body could not be decoded.
    BadRequest(String),
    /// The key is valid but lacks a permission the route needs.
    Forbidden(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "AUTH_INVALID", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED", msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        let body = ToolResponse::Err {
            error_code: code.to_string(),
            error_message: message.to_string(),
            detail: None,
        };
        (status, Json(body)).into_response()
    }
}

/// HTTP status for a tool error code.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "INVALID_PARAMS" | "INVALID_REQUEST" => StatusCode::BAD_REQUEST,
        "AUTH_INVALID" => StatusCode::UNAUTHORIZED,
        "PERMISSION_DENIED" => StatusCode::FORBIDDEN,
        "TOOL_NOT_FOUND" | "NOT_FOUND" => StatusCode::NOT_FOUND,
        "ALREADY_SENT" | "ALREADY_TERMINAL" | "DUPLICATE_TOOL" => StatusCode::CONFLICT,
        "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
        "BACKEND_ERROR" => StatusCode::BAD_GATEWAY,
        "STORE_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
        "TIMEOUT" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
