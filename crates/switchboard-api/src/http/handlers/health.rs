//! Unauthenticated liveness endpoint.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde_json::{Value, json};

use crate::state::AppState;

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": (Utc::now() - state.started_at).num_seconds().max(0),
        "bots": state.bots.system_status(),
        "audit_pending": state.audit.pending(),
    }))
}
