//! Tool definitions and dispatch for the scaffold system.
//!
//! Each tool declares a static [`ToolSchema`] and a typed argument struct.
//! Raw JSON arguments from the model are decoded into that struct when the
//! call is dispatched, so unknown or missing fields are rejected before the
//! tool runs. Dispatch never fails: every error becomes the text of the tool
//! message sent back to the model.

pub mod bash;

pub use bash::{BashArgs, BashTool, BASH_TOOL_NAME};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::agent_loop::AgentConfig;
use crate::environment::Environment;
use crate::error::{ExecutionError, TemplateError};
use crate::llm::{Message, ToolCallRequest, ToolSchema};
use crate::template::TemplateVars;

/// Errors that can occur while invoking a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name is registered.
    #[error("`{0}` is not a valid function name.")]
    UnknownTool(String),

    /// Arguments could not be decoded into the tool's parameters.
    #[error("Invalid arguments for `{tool}`: {message}")]
    InvalidArguments { tool: String, message: String },

    /// The tool exceeded its own time budget.
    #[error("Tool `{tool}` timed out after {limit:?}")]
    Timeout { tool: String, limit: Duration },

    /// Command execution failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// Rendering the observation failed.
    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// What a tool may use while running.
pub struct ToolContext<'a> {
    /// Environment commands run in.
    pub env: &'a dyn Environment,
    /// Template variables without the call layer.
    pub vars: &'a TemplateVars,
    /// Agent configuration (templates).
    pub config: &'a AgentConfig,
}

/// A tool the model can call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Typed parameters decoded from the model's JSON arguments.
    type Args: DeserializeOwned + Send;

    /// Static description shown to the model.
    fn schema(&self) -> ToolSchema;

    /// Time budget for one call, enforced by the dispatcher.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Run the tool, returning the observation text.
    async fn call(&self, args: Self::Args, ctx: &ToolContext<'_>) -> Result<String, ToolError>;
}

/// Object-safe view of a [`Tool`] taking raw JSON arguments.
#[async_trait]
trait RegisteredTool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    async fn invoke(&self, arguments: &str, ctx: &ToolContext<'_>) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: Tool> RegisteredTool for T {
    fn schema(&self) -> ToolSchema {
        Tool::schema(self)
    }

    async fn invoke(&self, arguments: &str, ctx: &ToolContext<'_>) -> Result<String, ToolError> {
        let name = Tool::schema(self).name;
        let args: T::Args = decode_arguments(&name, arguments)?;

        match self.timeout() {
            Some(limit) => tokio::time::timeout(limit, self.call(args, ctx))
                .await
                .map_err(|_| ToolError::Timeout { tool: name, limit })?,
            None => self.call(args, ctx).await,
        }
    }
}

/// Decode raw JSON arguments; an empty string means no arguments.
pub fn decode_arguments<A: DeserializeOwned>(tool: &str, arguments: &str) -> Result<A, ToolError> {
    let raw = if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    };
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

/// Registry and dispatcher for tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn RegisteredTool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the default set of tools.
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(BashTool);
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = Tool::schema(&tool).name;
        let tool: Arc<dyn RegisteredTool> = Arc::new(tool);
        match self.by_name.get(&name) {
            Some(&index) => self.tools[index] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// List all registered tool names, in registration order.
    pub fn list_tools(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.schema().name).collect()
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of all registered tools, in registration order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.schema()).collect()
    }

    /// Run one tool call and wrap its outcome in a tool message.
    pub async fn dispatch(&self, call: &ToolCallRequest, ctx: &ToolContext<'_>) -> Message {
        let name = call.name();
        let result = match self.by_name.get(name) {
            Some(&index) => self.tools[index].invoke(call.arguments(), ctx).await,
            None => Err(ToolError::UnknownTool(name.to_string())),
        };

        let content = match result {
            Ok(content) => {
                debug!(tool = %name, call_id = %call.id, "Tool call completed");
                content
            }
            Err(e) => {
                warn!(tool = %name, call_id = %call.id, error = %e, "Tool call failed");
                e.to_string()
            }
        };

        Message::tool(call.id.clone(), name, content)
    }
}
