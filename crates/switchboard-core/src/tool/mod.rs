//! Tool registration and permission-gated dispatch.

pub mod dispatcher;
pub mod registry;

pub use dispatcher::Dispatcher;
pub use registry::{RegisteredTool, ToolContext, ToolHandler, ToolRegistry, tool_fn};
