//! CLI channel — interactive terminal-based chat.
//!
//! The simplest channel: reads lines from stdin, prints responses to
//! stdout. Used by `nanoclaw agent` interactive mode.

use async_trait::async_trait;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use nanoclaw_core::channel::Channel;
use nanoclaw_core::error::ChannelError;
use nanoclaw_core::message::{InboundMessage, OutboundMessage};

/// Interactive CLI channel for terminal-based chat.
pub struct CliChannel;

impl CliChannel {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(
        &self,
    ) -> std::result::Result<mpsc::Receiver<InboundMessage>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let stdin = io::stdin();
            let reader = BufReader::new(stdin);
            let mut lines = reader.lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim().to_string();
                        if line.is_empty() {
                            continue;
                        }

                        if matches!(line.as_str(), "exit" | "quit" | "/exit" | "/quit" | ":q") {
                            break;
                        }

                        let msg = InboundMessage::new("cli", "local_user", "cli_session", line);
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break, // EOF (Ctrl+D)
                    Err(_) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, msg: &OutboundMessage) -> std::result::Result<(), ChannelError> {
        println!("{}", msg.content);
        for item in &msg.media {
            println!("[file] {item}");
        }
        Ok(())
    }

    fn is_allowed(&self, _sender_id: &str) -> bool {
        true // CLI is always allowed (local user)
    }
}
