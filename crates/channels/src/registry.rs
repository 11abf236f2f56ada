//! Channel registry — manages all active channel instances.
//!
//! Merges inbound streams from every started channel into one receiver and
//! dispatches outbound responses back to the channel named on the message.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use nanoclaw_core::channel::Channel;
use nanoclaw_core::error::ChannelError;
use nanoclaw_core::message::{InboundMessage, OutboundMessage};

/// Central registry holding all enabled channel instances.
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "Registered channel");
        self.channels.insert(name, channel);
    }

    /// Get a channel by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Channel>> {
        self.channels.get(name)
    }

    /// List all registered channel names.
    pub fn list(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Number of registered channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Start all channels and merge their message streams into one receiver.
    pub async fn start_all(
        &self,
    ) -> std::result::Result<mpsc::Receiver<InboundMessage>, ChannelError> {
        let (merged_tx, merged_rx) = mpsc::channel(256);

        for (name, channel) in &self.channels {
            let mut rx = channel.start().await?;
            let tx = merged_tx.clone();

            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if tx.send(msg).await.is_err() {
                        break; // Merged receiver dropped
                    }
                }
            });

            info!(channel = %name, "Started channel");
        }

        Ok(merged_rx)
    }

    /// Dispatch an outbound message to the channel it names.
    pub async fn dispatch(&self, msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
        let channel = self.channels.get(&msg.channel).ok_or_else(|| {
            ChannelError::NotConfigured(format!("Channel '{}' not found", msg.channel))
        })?;

        channel.send(msg).await
    }

    /// Stop all channels gracefully.
    pub async fn stop_all(&self) {
        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!(channel = %name, error = %e, "Failed to stop channel");
            }
        }
    }

    /// Run health checks on all channels.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for (name, channel) in &self.channels {
            let healthy = channel.health_check().await.unwrap_or(false);
            results.insert(name.clone(), healthy);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;

    struct MockChannel {
        name: String,
        started: AtomicBool,
        stopped: AtomicBool,
        sent: Mutex<Vec<OutboundMessage>>,
        inject: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    }

    impl MockChannel {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                sent: Mutex::new(Vec::new()),
                inject: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl Channel for MockChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(
            &self,
        ) -> std::result::Result<mpsc::Receiver<InboundMessage>, ChannelError> {
            self.started.store(true, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(8);
            *self.inject.lock().await = Some(tx);
            Ok(rx)
        }

        async fn send(&self, msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
            self.sent.lock().await.push(msg.clone());
            Ok(())
        }

        fn is_allowed(&self, _sender_id: &str) -> bool {
            true
        }

        async fn stop(&self) -> std::result::Result<(), ChannelError> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
            Ok(self.started.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn empty_registry() {
        let reg = ChannelRegistry::new();
        assert!(reg.is_empty());
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn register_and_list() {
        let mut reg = ChannelRegistry::new();
        reg.register(Arc::new(MockChannel::new("cli")));
        reg.register(Arc::new(MockChannel::new("webhook")));

        assert_eq!(reg.len(), 2);
        assert!(reg.list().contains(&"cli".to_string()));
        assert!(reg.get("webhook").is_some());
        assert!(reg.get("missing").is_none());
    }

    #[tokio::test]
    async fn start_all_merges_streams() {
        let mut reg = ChannelRegistry::new();
        let a = Arc::new(MockChannel::new("a"));
        let b = Arc::new(MockChannel::new("b"));
        reg.register(a.clone());
        reg.register(b.clone());

        let mut merged = reg.start_all().await.unwrap();
        assert!(a.started.load(Ordering::SeqCst));
        assert!(b.started.load(Ordering::SeqCst));

        let tx_a = a.inject.lock().await.clone().unwrap();
        tx_a.send(InboundMessage::new("a", "u", "c", "from a"))
            .await
            .unwrap();

        let msg = merged.recv().await.unwrap();
        assert_eq!(msg.channel, "a");
        assert_eq!(msg.content, "from a");
    }

    #[tokio::test]
    async fn dispatch_routes_by_channel_name() {
        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(MockChannel::new("cli"));
        reg.register(ch.clone());

        reg.dispatch(&OutboundMessage::new("cli", "chat1", "hello"))
            .await
            .unwrap();
        assert_eq!(ch.sent.lock().await.len(), 1);

        let err = reg
            .dispatch(&OutboundMessage::new("nonexistent", "chat1", "hello"))
            .await;
        assert!(matches!(err, Err(ChannelError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn stop_all_channels() {
        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(MockChannel::new("cli"));
        reg.register(ch.clone());

        reg.stop_all().await;
        assert!(ch.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn health_check_all() {
        let mut reg = ChannelRegistry::new();
        let ch = Arc::new(MockChannel::new("cli"));
        reg.register(ch.clone());

        let health = reg.health_check_all().await;
        assert_eq!(health.get("cli"), Some(&false));

        let _rx = reg.start_all().await.unwrap();
        let health = reg.health_check_all().await;
        assert_eq!(health.get("cli"), Some(&true));
    }
}
