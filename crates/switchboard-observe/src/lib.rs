//! Observability setup shared by Switchboard binaries.

pub mod tracing_setup;
