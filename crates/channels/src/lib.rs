//! Chat channel adapters for NanoClaw.
//!
//! A channel connects the runtime to a messaging surface. Inbound messages
//! flow from each channel into the message bus; outbound responses are
//! dispatched back through the [`ChannelRegistry`] to whichever channel
//! they belong to.

pub mod cli;
pub mod registry;
pub mod webhook;

pub use cli::CliChannel;
pub use registry::ChannelRegistry;
pub use webhook::WebhookChannel;
