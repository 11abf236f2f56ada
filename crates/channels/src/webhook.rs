//! Webhook channel — bridges an external bot gateway over HTTP.
//!
//! Inbound: the gateway POSTs `{"message", "sender", "type"}` to
//! `/webhook`; the handler validates the optional HMAC signature and the
//! sender allowlist, then hands the message into the returned stream — an
//! explicit thread-safe enqueue from the HTTP task into the core loop.
//!
//! Outbound: replies are POSTed to the gateway's reply endpoint as
//! `{"session_name", "content", "type"}` — text first, then one request
//! per media item with a longer timeout.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use nanoclaw_config::WebhookChannelConfig;
use nanoclaw_core::channel::Channel;
use nanoclaw_core::error::ChannelError;
use nanoclaw_core::message::{InboundMessage, OutboundMessage};

/// Inbound payload from the gateway.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    message: String,
    #[serde(default)]
    sender: String,
    #[serde(default = "default_msg_type")]
    r#type: String,
}

fn default_msg_type() -> String {
    "text".into()
}

struct WebhookState {
    config: WebhookChannelConfig,
    tx: mpsc::Sender<InboundMessage>,
}

/// Webhook channel adapter.
pub struct WebhookChannel {
    config: WebhookChannelConfig,
    client: reqwest::Client,
    server: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WebhookChannel {
    pub fn new(config: WebhookChannelConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            config,
            client,
            server: Mutex::new(None),
        }
    }

    /// Validate an HMAC-SHA256 signature against the shared secret.
    ///
    /// Accepts `sha256=<hex_digest>` or a bare hex digest. Uses
    /// constant-time comparison.
    pub fn validate_signature(config: &WebhookChannelConfig, payload: &[u8], signature: &str) -> bool {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        type HmacSha256 = Hmac<Sha256>;

        match &config.shared_secret {
            None => true, // No secret configured = no validation
            Some(secret) if secret.is_empty() => true,
            Some(secret) => {
                let sig_hex = signature.strip_prefix("sha256=").unwrap_or(signature);

                let provided_bytes = match hex::decode(sig_hex) {
                    Ok(b) => b,
                    Err(_) => return false, // Invalid hex = reject
                };

                let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                    .expect("HMAC accepts any key length");
                mac.update(payload);
                mac.verify_slice(&provided_bytes).is_ok()
            }
        }
    }

    fn sender_allowed(config: &WebhookChannelConfig, sender: &str) -> bool {
        if config.allowed_senders.is_empty() {
            return false;
        }
        if config.allowed_senders.iter().any(|s| s == "*") {
            return true;
        }
        config.allowed_senders.iter().any(|s| s == sender)
    }

    /// Build the intake router (factored out for tests).
    fn router(state: Arc<WebhookState>) -> Router {
        Router::new()
            .route("/webhook", post(webhook_handler))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state)
    }
}

async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if state.config.shared_secret.is_some() {
        let signature = headers
            .get("x-signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !WebhookChannel::validate_signature(&state.config, &body, signature) {
            warn!("Webhook signature rejected");
            return (StatusCode::UNAUTHORIZED, "bad signature");
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Invalid webhook payload");
            return (StatusCode::BAD_REQUEST, "invalid payload");
        }
    };

    if payload.message.is_empty() || payload.sender.is_empty() {
        return (StatusCode::BAD_REQUEST, "missing fields");
    }

    if !WebhookChannel::sender_allowed(&state.config, &payload.sender) {
        warn!(sender = %payload.sender, "Ignoring message from unauthorized sender");
        return (StatusCode::FORBIDDEN, "sender not allowed");
    }

    let mut msg = InboundMessage::new("webhook", &payload.sender, &payload.sender, &payload.message);
    msg.metadata.insert("type".into(), payload.r#type);

    if state.tx.send(msg).await.is_err() {
        error!("Webhook intake queue closed");
        return (StatusCode::SERVICE_UNAVAILABLE, "not running");
    }

    (StatusCode::OK, "OK")
}

#[async_trait]
impl Channel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn start(
        &self,
    ) -> std::result::Result<mpsc::Receiver<InboundMessage>, ChannelError> {
        let (tx, rx) = mpsc::channel(64);
        let state = Arc::new(WebhookState {
            config: self.config.clone(),
            tx,
        });

        let addr = format!("{}:{}", self.config.listen_host, self.config.listen_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ChannelError::BindFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;

        info!(addr = %addr, "Webhook channel listening");

        let router = Self::router(state);
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "Webhook server exited");
            }
        });
        *self.server.lock().await = Some(handle);

        Ok(rx)
    }

    async fn send(&self, msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
        let Some(reply_url) = &self.config.reply_url else {
            info!(chat_id = %msg.chat_id, "Webhook: no reply URL configured, response discarded");
            return Ok(());
        };

        if !msg.content.is_empty() {
            let payload = serde_json::json!({
                "session_name": msg.chat_id,
                "content": msg.content,
                "type": "text",
            });
            self.client
                .post(reply_url)
                .json(&payload)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ChannelError::DeliveryFailed {
                    channel: "webhook".into(),
                    reason: e.to_string(),
                })?;
        }

        for item in &msg.media {
            let payload = serde_json::json!({
                "session_name": msg.chat_id,
                "content": item,
                "type": "file",
            });
            // Longer timeout: the gateway may need to fetch the file
            self.client
                .post(reply_url)
                .timeout(Duration::from_secs(60))
                .json(&payload)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ChannelError::DeliveryFailed {
                    channel: "webhook".into(),
                    reason: e.to_string(),
                })?;
        }

        Ok(())
    }

    fn is_allowed(&self, sender_id: &str) -> bool {
        Self::sender_allowed(&self.config, sender_id)
    }

    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        if let Some(handle) = self.server.lock().await.take() {
            handle.abort();
        }
        info!("Webhook channel stopped");
        Ok(())
    }
}
