//! Shared domain types for Switchboard.
//!
//! This crate contains the domain types used across the tool runtime:
//! API keys and permissions, audit events, tool envelopes, bots, backend
//! events, batch jobs, scheduled messages, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod audit;
pub mod auth;
pub mod batch;
pub mod bot;
pub mod config;
pub mod error;
pub mod event;
pub mod schedule;
pub mod tool;
