//! Tool trait — the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world: run shell
//! commands, drive a browser, message the user mid-run, spawn subagents.
//!
//! Arguments arrive as one schema-validated JSON object per call — a single
//! structured value, never unpacked into positional call arguments.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// Prefix a tool result uses to announce that it produced a local file.
/// The orchestration loop lifts the path that follows into the outbound
/// media list.
pub const FILE_RESULT_MARKER: &str = "Screenshot saved to ";

/// A request to execute a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call id, loop-scoped)
    pub id: String,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a single JSON object
    pub arguments: serde_json::Value,
}

/// The result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call ID this result is for
    pub call_id: String,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output content (an "Error: ..." string on failure)
    pub output: String,
}

/// Where the message being processed came from.
///
/// Tools that route output back to the user (message, spawn) need to know
/// the originating channel and chat. The loop hands this to every tool at
/// the start of each message via [`Tool::set_context`] — an explicit part of
/// the tool interface, not something discovered by probing concrete types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    /// The channel the current message arrived on
    pub channel: String,

    /// The chat the current message belongs to
    pub chat_id: String,
}

impl ToolContext {
    pub fn new(channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
        }
    }
}

/// The core Tool trait.
///
/// Each tool implements this trait and registers in the [`ToolRegistry`].
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "shell", "browser").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Receive the per-message origin context. Default: no interest.
    fn set_context(&self, _ctx: &ToolContext) {}

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value)
        -> std::result::Result<String, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Dispatch tool calls when the LLM requests them
///
/// Dispatch never raises: an unknown tool or a failing tool becomes an
/// error-text [`ToolResult`] so one bad call cannot derail a turn.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool = %name, "Replacing already-registered tool");
        }
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Whether a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.to_definition()).collect()
    }

    /// Hand the per-message origin context to every registered tool.
    pub fn set_context_all(&self, ctx: &ToolContext) {
        for tool in self.tools.values() {
            tool.set_context(ctx);
        }
    }

    /// Execute a tool call. Never fails past this boundary — every failure
    /// becomes an error-text result.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(tool) = self.tools.get(&call.name) else {
            return ToolResult {
                call_id: call.id.clone(),
                success: false,
                output: format!("Error: {}", ToolError::NotFound(call.name.clone())),
            };
        };

        match tool.execute(call.arguments.clone()).await {
            Ok(output) => ToolResult {
                call_id: call.id.clone(),
                success: true,
                output,
            },
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolResult {
                    call_id: call.id.clone(),
                    success: false,
                    output: format!("Error: {e}"),
                }
            }
        }
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
