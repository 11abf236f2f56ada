//! Built-in tool implementations for NanoClaw.
//!
//! Tools give the agent the ability to act in the world: drive a browser
//! through the command relay, message the user mid-run, and execute shell
//! commands. The host assembles the registry explicitly — nothing here
//! registers itself.

pub mod browser;
pub mod message;
pub mod shell;

pub use browser::BrowserTool;
pub use message::MessageTool;
pub use shell::ShellTool;
