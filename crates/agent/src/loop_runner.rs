//! The agent loop: consume inbound messages, drive the model/tool cycle,
//! persist history, publish responses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use nanoclaw_core::bus::MessageBus;
use nanoclaw_core::error::{Error, Result};
use nanoclaw_core::message::{InboundMessage, Message, OutboundMessage, Role, SYSTEM_CHANNEL};
use nanoclaw_core::provider::{ChatRequest, Provider};
use nanoclaw_core::tool::{ToolContext, ToolRegistry, FILE_RESULT_MARKER};
use nanoclaw_session::SessionManager;

use crate::context::ContextBuilder;

/// Emitted when a message produced neither an answer nor a recorded
/// assistant text.
const FALLBACK_REPLY: &str = "I'm not sure how to respond to that.";

/// The orchestration loop.
///
/// Owns the per-message working transcript; only the final user/assistant
/// summary pair is committed to the session. The registry, session store,
/// and bus are constructed by the host and shared in — the loop holds no
/// global state.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    sessions: SessionManager,
    bus: Arc<MessageBus>,
    context: ContextBuilder,
    max_turns: u32,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
        sessions: SessionManager,
        bus: Arc<MessageBus>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            sessions,
            bus,
            context: ContextBuilder::default(),
            max_turns: 10,
            running: AtomicBool::new(false),
            shutdown_tx,
        }
    }

    /// Set the maximum number of model/tool turns per message.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Override the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.context = ContextBuilder::new(Some(prompt.into()));
        self
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get a reference to the session manager.
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Run the loop until [`stop`](Self::stop) is called or the inbound
    /// queue closes. Messages are processed strictly one at a time; any
    /// processing error becomes a user-visible outbound message, never a
    /// crash.
    pub async fn run(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal("Agent loop already running".into()));
        }
        info!("Agent loop started");

        // Subscribe fresh and consume any stale stop signal from a previous run.
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let _ = *shutdown_rx.borrow_and_update();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Received shutdown signal");
                        break;
                    }
                }
                msg = self.bus.consume_inbound() => {
                    let Some(msg) = msg else {
                        info!("Inbound queue closed");
                        break;
                    };

                    match self.process_message(&msg).await {
                        Ok(Some(response)) => {
                            if let Err(e) = self.bus.publish_outbound(response).await {
                                error!(error = %e, "Failed to publish outbound message");
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "Error processing message");
                            let apology = OutboundMessage::new(
                                &msg.channel,
                                &msg.chat_id,
                                format!("Sorry, I encountered an error: {e}"),
                            );
                            self.bus.publish_outbound(apology).await.ok();
                        }
                    }
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Agent loop stopped");
        Ok(())
    }

    /// Stop the loop after the in-flight message (if any) completes.
    pub fn stop(&self) {
        info!("Stopping agent loop");
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    /// Process a single inbound message into at most one response.
    pub async fn process_message(
        &self,
        msg: &InboundMessage,
    ) -> Result<Option<OutboundMessage>> {
        // Announcements from subagents are routed, not conversed with.
        if msg.channel == SYSTEM_CHANNEL {
            return Ok(self.process_system_message(msg));
        }

        info!(channel = %msg.channel, sender = %msg.sender_id, "Processing message");

        let mut session = self.sessions.get_or_create(&msg.session_key).await?;

        // Every tool learns where this message came from before any call.
        self.tools
            .set_context_all(&ToolContext::new(&msg.channel, &msg.chat_id));

        let mut transcript = self
            .context
            .build(session.history(), &msg.content, &msg.media);
        let definitions = self.tools.definitions();

        // The answer that ends the loop, and the latest assistant text seen
        // along the way (returned if the turn budget runs out first).
        let mut final_text: Option<String> = None;
        let mut last_answer: Option<String> = None;
        let mut collected_media: Vec<String> = Vec::new();

        let mut turn = 0;
        while turn < self.max_turns {
            turn += 1;
            debug!(turn, "Agent loop turn");

            let request = ChatRequest {
                model: self.model.clone(),
                messages: transcript.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: definitions.clone(),
            };

            let response = match self.provider.chat(request).await {
                Ok(response) => response,
                Err(e) => {
                    // No retry here; the provider owns that policy.
                    error!(error = %e, "LLM call failed");
                    final_text = Some(format!("Error calling LLM: {e}"));
                    break;
                }
            };

            if let Some(usage) = &response.usage {
                debug!(
                    prompt_tokens = usage.prompt_tokens,
                    completion_tokens = usage.completion_tokens,
                    "Model usage"
                );
            }

            let reply = response.message;
            if !reply.content.is_empty() {
                last_answer = Some(reply.content.clone());
            }
            let tool_calls = reply.tool_calls.clone();
            transcript.push(reply);

            if tool_calls.is_empty() {
                final_text = last_answer.clone();
                break;
            }

            // Execute in issued order, one at a time. A failing call becomes
            // an error-text result and the turn continues.
            for call in &tool_calls {
                info!(tool = %call.name, "Executing tool");
                let result = self.tools.execute(call).await;

                if let Some(path) = result.output.strip_prefix(FILE_RESULT_MARKER) {
                    collected_media.push(path.trim().to_string());
                }

                transcript.push(Message::tool_result(&call.id, &result.output));
            }
        }

        if turn >= self.max_turns && final_text.is_none() {
            warn!(turns = turn, "Turn budget exhausted without a final answer");
        }

        // Only the summary pair is retained across messages; intermediate
        // tool traffic stays in the loop-scoped transcript.
        let answer = final_text.or(last_answer);
        session.append(Role::User, &msg.content, msg.media.clone());
        if let Some(text) = &answer {
            session.append(Role::Assistant, text, vec![]);
        }
        self.sessions.save(&session).await?;

        let content = answer.unwrap_or_else(|| FALLBACK_REPLY.to_string());
        Ok(Some(
            OutboundMessage::new(&msg.channel, &msg.chat_id, content).with_media(collected_media),
        ))
    }

    /// Route a subagent announcement back to its origin chat.
    ///
    /// Content format: `"{origin_channel}:{origin_chat}:{result}"` — the
    /// result itself may contain colons, so only the first two split.
    /// Fewer than three fields: logged and dropped, nothing emitted.
    fn process_system_message(&self, msg: &InboundMessage) -> Option<OutboundMessage> {
        let mut parts = msg.content.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(origin_channel), Some(origin_chat), Some(result)) => {
                info!(channel = %origin_channel, chat = %origin_chat, "Forwarding subagent result");
                Some(OutboundMessage::new(
                    origin_channel,
                    origin_chat,
                    format!("Subagent task completed:\n{result}"),
                ))
            }
            _ => {
                warn!(content = %msg.content, "Malformed system announcement, dropping");
                None
            }
        }
    }
}
