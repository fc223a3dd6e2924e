//! Tool registry: name → definition, compiled input schema and handler.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use jsonschema::Validator;
use parking_lot::RwLock;
use serde_json::Value;
use tidemcp_core::{McpError, McpResult, Tool};

/// Boxed tool handler: input value in, result value out
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, McpResult<Value>> + Send + Sync>;

/// Wrap an async closure as a [`ToolHandler`]
pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<Value>> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}

struct RegisteredTool {
    tool: Tool,
    validator: Validator,
    handler: ToolHandler,
}

/// Read-mostly map of registered tools
#[derive(Default)]
pub(crate) struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<RegisteredTool>>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Add or replace a tool
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the input schema does not compile.
    pub(crate) fn register(&self, tool: Tool, handler: ToolHandler) -> McpResult<()> {
        let validator = jsonschema::validator_for(&tool.input_schema).map_err(|e| {
            McpError::configuration(format!("Invalid input schema for tool '{}': {e}", tool.name))
        })?;
        let name = tool.name.clone();
        let replaced = self
            .tools
            .write()
            .insert(
                name.clone(),
                Arc::new(RegisteredTool {
                    tool,
                    validator,
                    handler,
                }),
            )
            .is_some();
        tracing::debug!(tool = %name, replaced, "Registered tool");
        Ok(())
    }

    /// Remove a tool, returning whether it existed
    pub(crate) fn unregister(&self, name: &str) -> bool {
        self.tools.write().remove(name).is_some()
    }

    /// Definitions of every registered tool, sorted by name
    pub(crate) fn list(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .tools
            .read()
            .values()
            .map(|entry| entry.tool.clone())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub(crate) fn len(&self) -> usize {
        self.tools.read().len()
    }

    /// Validate `input` against the tool's schema and run its handler
    ///
    /// The registry lock is released before the handler runs.
    pub(crate) async fn execute(&self, name: &str, input: Value) -> McpResult<Value> {
        let entry = self
            .tools
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::tool_not_found(name))?;

        let violations: Vec<String> = entry
            .validator
            .iter_errors(&input)
            .take(5)
            .map(|e| e.to_string())
            .collect();
        if !violations.is_empty() {
            return Err(McpError::invalid_params(format!(
                "Invalid input for tool '{name}': {}",
                violations.join("; ")
            )));
        }

        (entry.handler)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidemcp_core::ErrorKind;

    fn echo_tool() -> Tool {
        Tool::new("echo", "Echo the message back").with_input_schema(json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        }))
    }

    fn echo_handler() -> ToolHandler {
        tool_handler(|input: Value| async move { Ok(json!({ "echo": input["message"] })) })
    }

    #[tokio::test]
    async fn test_execute_returns_handler_result() {
        let registry = ToolRegistry::default();
        registry.register(echo_tool(), echo_handler()).unwrap();

        let result = registry
            .execute("echo", json!({"message": "Hello, MCP!"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"echo": "Hello, MCP!"}));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::default();
        let err = registry.execute("missing", json!({})).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ToolNotFound);
        assert_eq!(err.message, "Tool not found: missing");
    }

    #[tokio::test]
    async fn test_input_is_validated_before_handler_runs() {
        let registry = ToolRegistry::default();
        registry
            .register(
                echo_tool(),
                tool_handler(|_| async { panic!("handler must not run") }),
            )
            .unwrap();

        let err = registry
            .execute("echo", json!({"message": 42}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
        assert!(err.message.contains("echo"));
    }

    #[test]
    fn test_register_overwrites_and_lists_sorted() {
        let registry = ToolRegistry::default();
        registry.register(Tool::new("zeta", "z"), echo_handler()).unwrap();
        registry.register(echo_tool(), echo_handler()).unwrap();
        registry
            .register(Tool::new("echo", "replaced"), echo_handler())
            .unwrap();

        let tools = registry.list();
        assert_eq!(registry.len(), 2);
        assert_eq!(tools[0].name, "echo");
        assert_eq!(tools[0].description, "replaced");
        assert_eq!(tools[1].name, "zeta");

        assert!(registry.unregister("zeta"));
        assert!(!registry.unregister("zeta"));
    }

    #[test]
    fn test_invalid_schema_is_rejected() {
        let registry = ToolRegistry::default();
        let bad = Tool::new("bad", "").with_input_schema(json!({"type": 12}));
        let err = registry.register(bad, echo_handler()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
