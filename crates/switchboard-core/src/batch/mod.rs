//! Bounded-concurrency bulk operations against the messaging backend.

pub mod executor;
pub mod operation;

pub use executor::{BatchExecutor, BatchRequest};
pub use operation::PreparedOp;
