//! Services and port definitions for Switchboard.
//!
//! This crate defines the "ports" (repository, backend and hasher traits)
//! that the infrastructure layer implements, plus every runtime service:
//! access control, audit, dispatch, the event bus, bots, batch jobs and
//! the scheduler. It depends only on `switchboard-types` -- never on
//! `switchboard-infra` or any database/IO crate.

pub mod audit;
pub mod auth;
pub mod backend;
pub mod batch;
pub mod bot;
pub mod clock;
pub mod event;
pub mod hash;
pub mod repository;
pub mod scheduler;
pub mod settings;
pub mod tool;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;
