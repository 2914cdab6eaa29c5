//! Tool registry: name -> (definition, handler), resolved at registration time.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use switchboard_types::auth::ApiKeyId;
use switchboard_types::error::ToolError;
use switchboard_types::tool::ToolDefinition;

/// Per-call information handed to a tool handler.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub caller: ApiKeyId,
    pub tool_name: String,
    /// Correlation id of the `ToolInvoked` audit record.
    pub correlation_id: Uuid,
}

pub type ToolHandler =
    Arc<dyn Fn(ToolContext, Value) -> BoxFuture<'static, Result<Value, ToolError>> + Send + Sync>;

/// Wrap an async closure as a [`ToolHandler`].
pub fn tool_fn<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(ToolContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(move |ctx, params| f(ctx, params).boxed())
}

pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub handler: ToolHandler,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.definition.name)
            .finish()
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: DashMap<String, Arc<RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique.
    pub fn register(&self, definition: ToolDefinition, handler: ToolHandler) -> Result<(), ToolError> {
        match self.tools.entry(definition.name.clone()) {
            Entry::Occupied(_) => Err(ToolError::DuplicateTool(definition.name)),
            Entry::Vacant(slot) => {
                tracing::debug!(tool = %definition.name, "registered tool");
                slot.insert(Arc::new(RegisteredTool {
                    definition,
                    handler,
                }));
                Ok(())
            }
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.tools.get(name).map(|t| Arc::clone(t.value()))
    }

    /// All definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .iter()
            .map(|t| t.value().definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
