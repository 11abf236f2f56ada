//! Message bus — async FIFO queues between channels and the agent loop.
//!
//! Channels publish inbound messages; the orchestration loop consumes them,
//! and publishes outbound responses that a dispatcher routes back to the
//! originating channel. Delivery is strict FIFO with no priority.
//!
//! Listeners that live outside the cooperative core (an HTTP handler task, a
//! blocking reader thread) hand messages off through [`MessageBus::inbound_sender`],
//! a plain cloneable `mpsc::Sender` — the one explicit thread-safe boundary
//! into the loop.

use tokio::sync::{mpsc, Mutex};

use crate::error::{Error, Result};
use crate::message::{InboundMessage, OutboundMessage};

/// Default queue depth for each direction.
const DEFAULT_CAPACITY: usize = 256;

/// Bidirectional FIFO message bus.
///
/// The receivers live behind async mutexes so the bus can be shared as a
/// plain `Arc<MessageBus>`; with one loop consuming inbound and one
/// dispatcher consuming outbound there is never lock contention in practice.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<mpsc::Receiver<OutboundMessage>>,
}

impl MessageBus {
    /// Create a bus with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a bus with an explicit per-direction capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            outbound_tx,
            outbound_rx: Mutex::new(outbound_rx),
        }
    }

    /// Publish a message for the agent loop to process.
    pub async fn publish_inbound(&self, msg: InboundMessage) -> Result<()> {
        self.inbound_tx
            .send(msg)
            .await
            .map_err(|_| Error::BusClosed("inbound".into()))
    }

    /// Wait for the next inbound message.
    pub async fn consume_inbound(&self) -> Option<InboundMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    /// Publish a response for dispatch back to its channel.
    pub async fn publish_outbound(&self, msg: OutboundMessage) -> Result<()> {
        self.outbound_tx
            .send(msg)
            .await
            .map_err(|_| Error::BusClosed("outbound".into()))
    }

    /// Wait for the next outbound message.
    pub async fn consume_outbound(&self) -> Option<OutboundMessage> {
        self.outbound_rx.lock().await.recv().await
    }

    /// A cloneable sender for code that cannot hold the bus itself —
    /// webhook handler tasks, blocking listener threads.
    pub fn inbound_sender(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound_tx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
