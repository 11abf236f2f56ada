//! Message domain types.
//!
//! Two families of value objects live here:
//!
//! - [`InboundMessage`] / [`OutboundMessage`] — what flows over the
//!   [`MessageBus`](crate::bus::MessageBus) between channel adapters and the
//!   orchestration loop.
//! - [`Message`] — one entry of the working transcript sent to the LLM
//!   (system prompt, user content, assistant replies, tool results).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::tool::ToolCall;

/// Reserved channel name for internal announcements (subagent results).
/// Messages on this channel carry `"{origin_channel}:{origin_chat}:{result}"`
/// in their content and are routed back to the origin instead of being
/// processed as conversation.
pub const SYSTEM_CHANNEL: &str = "system";

/// A message received from a channel, on its way to the agent.
///
/// Immutable once enqueued — the loop never mutates it, it only reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Name of the channel that produced this message ("cli", "webhook", ...)
    pub channel: String,

    /// Platform-specific sender identifier
    pub sender_id: String,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// Session key — one conversation history per distinct key
    pub session_key: String,

    /// The text content
    pub content: String,

    /// Attached media references (local paths or URLs)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,

    /// Free-form channel metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl InboundMessage {
    /// Create an inbound message with the default `"{channel}:{chat_id}"`
    /// session key.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let channel = channel.into();
        let chat_id = chat_id.into();
        Self {
            session_key: format!("{channel}:{chat_id}"),
            channel,
            sender_id: sender_id.into(),
            chat_id,
            content: content.into(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Attach media references.
    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }
}

/// A response on its way back to a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Which channel should deliver this
    pub channel: String,

    /// The chat to deliver to
    pub chat_id: String,

    /// The text content
    pub content: String,

    /// Media references to deliver alongside the text
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            media: Vec::new(),
        }
    }

    pub fn with_media(mut self, media: Vec<String>) -> Self {
        self.media = media;
        self
    }
}

/// The role of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Tool execution result
    Tool,
}

/// A single entry of the working transcript sent to the LLM.
///
/// The transcript is loop-scoped: it exists for the duration of one inbound
/// message's processing. Only the final user/assistant pair survives into
/// the long-lived session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who produced this entry
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the assistant (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn base(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::base(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::base(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(Role::Assistant, content)
    }

    /// Create an assistant message carrying tool calls.
    pub fn assistant_with_tools(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::base(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// Create a tool result message keyed by its originating call id.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::base(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// Whether this entry carries tool calls.
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
