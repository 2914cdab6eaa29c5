//! HTTP surface for the tool-call protocol.
//!
//! `POST /v1/tools/call` frames `{toolName, params}` plus the caller's API
//! key into a dispatcher call and returns the `ToolResponse` JSON.
//! `GET /v1/tools` lists definitions; `GET /health` is unauthenticated.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod router;
