//! # NanoClaw Core
//!
//! Domain types, traits, and error definitions for the NanoClaw agent
//! runtime. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem is defined as a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod bus;
pub mod channel;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use bus::MessageBus;
pub use channel::Channel;
pub use error::{ChannelError, Error, ProviderError, Result, SessionError, ToolError};
pub use message::{InboundMessage, Message, OutboundMessage, Role, SYSTEM_CHANNEL};
pub use provider::{ChatRequest, ChatResponse, Provider, ToolDefinition, Usage};
pub use tool::{Tool, ToolCall, ToolContext, ToolRegistry, ToolResult, FILE_RESULT_MARKER};
