//! WebSocket command relay between the agent and a browser extension.
//!
//! The relay is a loopback-only WebSocket server that at most one external
//! automation peer (the browser extension) connects to, on a single
//! designated path. Commands flow out wrapped in a forwarding envelope:
//!
//! ```json
//! { "id": 7, "method": "forwardCDPCommand",
//!   "params": { "method": "Page.navigate", "params": { "url": "..." } } }
//! ```
//!
//! Responses come back as `{ "id": 7, "result": ... }` or
//! `{ "id": 7, "error": ... }` and are correlated to the waiting caller
//! through a pending-command table. Each pending entry is resolved exactly
//! once: either by its response or by its timeout, and it is removed from
//! the table in both cases.
//!
//! The extension also sends `{ "method": "ping" }` heartbeats (answered with
//! `{ "method": "pong" }`) and bare HTTP `HEAD` health probes, which get a
//! minimal `200 OK` before the WebSocket handshake is attempted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

/// Default port the extension looks for.
pub const DEFAULT_RELAY_PORT: u16 = 18792;

/// The only path connections are accepted on.
pub const DEFAULT_RELAY_PATH: &str = "/extension";

/// Default wait for a command response.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced to relay callers.
///
/// None of these ever escape the invoking tool as a panic or process exit —
/// the browser tool renders them as conversational error text.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Browser extension not connected. Install and open the browser relay extension.")]
    NotConnected,

    #[error("Browser command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Browser extension reported an error: {0}")]
    Peer(String),

    #[error("Browser extension disconnected before responding")]
    Disconnected,

    #[error("Relay transport error: {0}")]
    Transport(String),
}

/// The live peer connection: a handle for writing frames, plus a generation
/// counter so a stale connection's teardown cannot clear its replacement.
struct Peer {
    tx: mpsc::UnboundedSender<WsMessage>,
    generation: u64,
}

struct RelayInner {
    port: u16,
    path: String,
    command_timeout: Duration,
    fail_pending_on_disconnect: bool,

    running: AtomicBool,
    next_command_id: AtomicU64,
    next_generation: AtomicU64,

    peer: Mutex<Option<Peer>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, RelayError>>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

/// WebSocket relay server for the browser extension.
///
/// Cheap to clone; clones share the same listener, peer, and pending table.
/// The relay is constructed by the host and handed to consumers explicitly —
/// there is no process-global instance.
#[derive(Clone)]
pub struct CommandRelay {
    inner: Arc<RelayInner>,
}

impl CommandRelay {
    /// Create a relay for the given loopback port (0 = ephemeral).
    pub fn new(port: u16) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                port,
                path: DEFAULT_RELAY_PATH.to_string(),
                command_timeout: DEFAULT_COMMAND_TIMEOUT,
                fail_pending_on_disconnect: false,
                running: AtomicBool::new(false),
                next_command_id: AtomicU64::new(0),
                next_generation: AtomicU64::new(0),
                peer: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                accept_task: Mutex::new(None),
                local_addr: Mutex::new(None),
            }),
        }
    }

    /// Override the accepted connection path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_path before sharing")
            .path = path.into();
        self
    }

    /// Override the per-command timeout.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_command_timeout before sharing")
            .command_timeout = timeout;
        self
    }

    /// Fail in-flight commands immediately on peer disconnect instead of
    /// letting them run out their timeout.
    pub fn with_fail_pending_on_disconnect(mut self, fail: bool) -> Self {
        Arc::get_mut(&mut self.inner)
            .expect("with_fail_pending_on_disconnect before sharing")
            .fail_pending_on_disconnect = fail;
        self
    }

    /// Start the listener. Idempotent if already running.
    ///
    /// A failed bind (port taken) logs an error and leaves the relay
    /// disabled — the host keeps running and commands fail with
    /// [`RelayError::NotConnected`] until a restart frees the port.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let addr = SocketAddr::from(([127, 0, 0, 1], self.inner.port));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(port = self.inner.port, error = %e, "Failed to start browser relay; browser tool disabled");
                self.inner.running.store(false, Ordering::SeqCst);
                return;
            }
        };

        let local = listener.local_addr().ok();
        *self.inner.local_addr.lock().await = local;
        if let Some(local) = local {
            info!(addr = %local, path = %self.inner.path, "Browser relay listening");
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(remote = %remote, "Relay connection attempt");
                        let inner = Arc::clone(&inner);
                        tokio::spawn(async move {
                            handle_connection(inner, stream).await;
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "Relay accept failed");
                    }
                }
            }
        });
        *self.inner.accept_task.lock().await = Some(handle);
    }

    /// Stop the listener and drop the peer. Pending commands are left to
    /// their timeouts.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.inner.accept_task.lock().await.take() {
            handle.abort();
        }
        *self.inner.peer.lock().await = None;
        *self.inner.local_addr.lock().await = None;
        info!("Browser relay stopped");
    }

    /// Whether a peer is currently connected.
    pub async fn is_connected(&self) -> bool {
        self.inner.peer.lock().await.is_some()
    }

    /// The bound listener address, if the relay started successfully.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock().await
    }

    /// Number of commands awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Send a command to the extension and wait for its result.
    ///
    /// The caller's `method`/`params` are wrapped in the forwarding
    /// envelope; the relay's own id correlates the response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, RelayError> {
        let peer_tx = {
            let peer = self.inner.peer.lock().await;
            match peer.as_ref() {
                Some(peer) => peer.tx.clone(),
                None => return Err(RelayError::NotConnected),
            }
        };

        let id = self.inner.next_command_id.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = json!({
            "id": id,
            "method": "forwardCDPCommand",
            "params": {
                "method": method,
                "params": params,
            }
        });

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        debug!(id, method, "Sending relay command");
        if peer_tx.send(WsMessage::Text(envelope.to_string())).is_err() {
            self.inner.pending.lock().await.remove(&id);
            return Err(RelayError::Disconnected);
        }

        match tokio::time::timeout(self.inner.command_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Result slot dropped without an answer (peer teardown drained it)
            Ok(Err(_)) => {
                self.inner.pending.lock().await.remove(&id);
                Err(RelayError::Disconnected)
            }
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                debug!(id, "Relay command timed out");
                Err(RelayError::Timeout(self.inner.command_timeout))
            }
        }
    }
}

/// Serve one TCP connection: answer health probes, enforce the designated
/// path, then run the peer session until it closes.
async fn handle_connection(inner: Arc<RelayInner>, mut stream: TcpStream) {
    if is_health_probe(&stream).await {
        let _ = stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await;
        let _ = stream.shutdown().await;
        debug!("Answered relay health probe");
        return;
    }

    let expected_path = inner.path.clone();
    let callback = move |req: &Request, resp: Response| {
        if req.uri().path() == expected_path {
            Ok(resp)
        } else {
            warn!(path = %req.uri().path(), "Rejected relay connection on unexpected path");
            let mut rejection = ErrorResponse::new(Some("not found".to_string()));
            *rejection.status_mut() = StatusCode::FORBIDDEN;
            Err(rejection)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(error = %e, "Relay handshake failed");
            return;
        }
    };

    let generation = inner.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<WsMessage>();

    // Replace any previous peer wholesale; one live connection at a time.
    {
        let mut peer = inner.peer.lock().await;
        if peer.is_some() {
            info!("Replacing existing browser extension connection");
        }
        *peer = Some(Peer {
            tx: peer_tx,
            generation,
        });
    }
    info!("Browser extension connected");

    let (mut sink, mut source) = ws.split();

    let writer = tokio::spawn(async move {
        while let Some(msg) = peer_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_peer_message(&inner, &text).await,
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "Relay read error");
                break;
            }
        }
    }
    writer.abort();

    // Only the connection that registered this generation may deregister it;
    // a reconnect that replaced us must not be cleared by our teardown.
    let mut peer = inner.peer.lock().await;
    if peer.as_ref().map(|p| p.generation) == Some(generation) {
        *peer = None;
        drop(peer);
        info!("Browser extension disconnected");

        if inner.fail_pending_on_disconnect {
            let drained: Vec<_> = {
                let mut pending = inner.pending.lock().await;
                pending.drain().collect()
            };
            for (id, slot) in drained {
                debug!(id, "Failing pending command on disconnect");
                let _ = slot.send(Err(RelayError::Disconnected));
            }
        }
        // Otherwise pending commands are deliberately left in the table to
        // expire via their own timeouts (tolerates a fast reconnect).
    }
}

/// Detect a bare HTTP `HEAD` probe without consuming bytes from the stream.
async fn is_health_probe(stream: &TcpStream) -> bool {
    let mut buf = [0u8; 5];
    match stream.peek(&mut buf).await {
        Ok(n) if n >= 5 => &buf == b"HEAD ",
        _ => false,
    }
}

/// Dispatch one inbound frame: command responses resolve their pending
/// entry (at most once), heartbeats get an immediate pong and never touch
/// the table.
async fn handle_peer_message(inner: &Arc<RelayInner>, text: &str) {
    let data: Value = match serde_json::from_str(text) {
        Ok(data) => data,
        Err(e) => {
            warn!(error = %e, "Unparseable relay message");
            return;
        }
    };

    if let Some(id) = data.get("id").and_then(Value::as_u64) {
        if data.get("result").is_some() || data.get("error").is_some() {
            let slot = inner.pending.lock().await.remove(&id);
            match slot {
                Some(tx) => {
                    let outcome = match data.get("error") {
                        Some(err) => Err(RelayError::Peer(error_text(err))),
                        None => Ok(data.get("result").cloned().unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(outcome);
                }
                None => debug!(id, "Response for unknown or already-resolved command"),
            }
        }
        return;
    }

    if data.get("method").and_then(Value::as_str) == Some("ping") {
        let peer = inner.peer.lock().await;
        if let Some(peer) = peer.as_ref() {
            let _ = peer
                .tx
                .send(WsMessage::Text(json!({"method": "pong"}).to_string()));
        }
    }
}

fn error_text(err: &Value) -> String {
    match err.as_str() {
        Some(s) => s.to_string(),
        None => err.to_string(),
    }
}
