//! Messaging backend adapters.

pub mod loopback;

pub use loopback::LoopbackBackend;
