//! The core orchestration loop — the heart of NanoClaw.
//!
//! One inbound message flows through:
//!
//! 1. **Receive** from the message bus (any channel)
//! 2. **Build context** (system prompt + session history + new content)
//! 3. **Send to LLM** via the configured provider
//! 4. **If tool calls**: execute them in order, append results, go to 3
//! 5. **If text**: that is the answer — persist the summary pair and
//!    publish one outbound message
//!
//! The cycle is bounded by a turn budget; tool failures are isolated per
//! call; provider failures end the current message with a readable error.

pub mod context;
pub mod loop_runner;
pub mod subagent;

pub use context::ContextBuilder;
pub use loop_runner::AgentLoop;
pub use subagent::{SpawnTool, SubagentManager};
