//! Message tool — lets the model push a message to the user mid-run,
//! before the final answer (progress notes, partial results).
//!
//! Routing uses the per-message context handed in through `set_context`;
//! without it the tool reports an error instead of guessing a destination.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use nanoclaw_core::bus::MessageBus;
use nanoclaw_core::error::ToolError;
use nanoclaw_core::message::OutboundMessage;
use nanoclaw_core::tool::{Tool, ToolContext};

/// Send a message to the originating chat.
pub struct MessageTool {
    bus: Arc<MessageBus>,
    context: Mutex<Option<ToolContext>>,
}

impl MessageTool {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            bus,
            context: Mutex::new(None),
        }
    }

    fn current_context(&self) -> Option<ToolContext> {
        self.context.lock().ok().and_then(|guard| guard.clone())
    }
}

#[async_trait]
impl Tool for MessageTool {
    fn name(&self) -> &str {
        "message"
    }

    fn description(&self) -> &str {
        "Send a message to the user immediately, before your final answer. \
         Useful for progress updates during long tasks."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The message text to send"
                }
            },
            "required": ["content"]
        })
    }

    fn set_context(&self, ctx: &ToolContext) {
        if let Ok(mut guard) = self.context.lock() {
            *guard = Some(ctx.clone());
        }
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let Some(ctx) = self.current_context() else {
            return Ok("Error: no delivery context for this message".into());
        };

        self.bus
            .publish_outbound(OutboundMessage::new(&ctx.channel, &ctx.chat_id, content))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "message".into(),
                reason: e.to_string(),
            })?;

        Ok("Message sent".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sends_to_context_chat() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus.clone());
        tool.set_context(&ToolContext::new("webhook", "42"));

        let result = tool
            .execute(serde_json::json!({"content": "working on it"}))
            .await
            .unwrap();
        assert_eq!(result, "Message sent");

        let out = bus.consume_outbound().await.unwrap();
        assert_eq!(out.channel, "webhook");
        assert_eq!(out.chat_id, "42");
        assert_eq!(out.content, "working on it");
    }

    #[tokio::test]
    async fn without_context_reports_error_text() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus);

        let result = tool
            .execute(serde_json::json!({"content": "hello"}))
            .await
            .unwrap();
        assert!(result.starts_with("Error:"));
    }

    #[tokio::test]
    async fn missing_content_is_invalid() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus);
        tool.set_context(&ToolContext::new("cli", "local"));

        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn context_updates_per_message() {
        let bus = Arc::new(MessageBus::new());
        let tool = MessageTool::new(bus.clone());

        tool.set_context(&ToolContext::new("cli", "a"));
        tool.set_context(&ToolContext::new("webhook", "b"));

        tool.execute(serde_json::json!({"content": "hi"}))
            .await
            .unwrap();
        let out = bus.consume_outbound().await.unwrap();
        assert_eq!(out.channel, "webhook");
        assert_eq!(out.chat_id, "b");
    }
}
