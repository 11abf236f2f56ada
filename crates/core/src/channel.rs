//! Channel trait — the abstraction over chat platforms.
//!
//! A Channel connects NanoClaw to a messaging surface (a webhook bridge, the
//! local terminal, ...). It produces [`InboundMessage`]s and delivers
//! [`OutboundMessage`]s; the agent loop never talks to a platform directly.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::message::{InboundMessage, OutboundMessage};

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, payload
/// parsing, and sender authorization.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Channel name ("cli", "webhook", ...). Doubles as the routing key on
    /// inbound/outbound messages.
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    ///
    /// Returns a receiver that yields inbound messages. The channel
    /// implementation handles its own listener internally (an HTTP server, a
    /// stdin reader task, ...).
    async fn start(
        &self,
    ) -> std::result::Result<mpsc::Receiver<InboundMessage>, ChannelError>;

    /// Deliver a response, including any media references, to its chat.
    async fn send(&self, msg: &OutboundMessage) -> std::result::Result<(), ChannelError>;

    /// Check if a sender is allowed (allowlist check).
    fn is_allowed(&self, sender_id: &str) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check — is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullChannel;

    #[async_trait]
    impl Channel for NullChannel {
        fn name(&self) -> &str {
            "null"
        }

        async fn start(
            &self,
        ) -> std::result::Result<mpsc::Receiver<InboundMessage>, ChannelError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn send(&self, _msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
            Ok(())
        }

        fn is_allowed(&self, _sender_id: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn default_trait_methods() {
        let ch = NullChannel;
        assert_eq!(ch.name(), "null");
        assert!(ch.stop().await.is_ok());
        assert!(ch.health_check().await.unwrap());
    }
}
