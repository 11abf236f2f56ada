//! `nanoclaw agent` — chat from the terminal.
//!
//! With `-m`, sends one message and prints the reply. Without it, runs an
//! interactive session over the CLI channel until EOF or `exit`.

use std::sync::Arc;

use tracing::error;

use nanoclaw_channels::{ChannelRegistry, CliChannel};
use nanoclaw_config::AppConfig;
use nanoclaw_core::message::InboundMessage;

use super::runtime;

pub async fn run(message: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let rt = runtime::build(config).await?;

    if rt.config.relay.enabled {
        rt.relay.start().await;
    }

    let agent = Arc::clone(&rt.agent);
    let loop_task = tokio::spawn(async move { agent.run().await });

    match message {
        Some(content) => {
            // One-shot: publish, print the reply, leave.
            rt.bus
                .publish_inbound(InboundMessage::new("cli", "local_user", "cli_session", content))
                .await?;

            if let Some(reply) = rt.bus.consume_outbound().await {
                println!("{}", reply.content);
                for item in &reply.media {
                    println!("[file] {item}");
                }
            }
        }
        None => {
            // Interactive: the CLI channel reads stdin until EOF/exit.
            let mut registry = ChannelRegistry::new();
            registry.register(Arc::new(CliChannel::new()));
            let registry = Arc::new(registry);

            let mut merged = registry.start_all().await?;
            let inbound_tx = rt.bus.inbound_sender();
            let bus = Arc::clone(&rt.bus);
            let dispatcher = {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    while let Some(msg) = bus.consume_outbound().await {
                        if let Err(e) = registry.dispatch(&msg).await {
                            error!(error = %e, "Failed to print response");
                        }
                    }
                })
            };

            println!("NanoClaw ready. Type a message, or `exit` to quit.");
            while let Some(msg) = merged.recv().await {
                if inbound_tx.send(msg).await.is_err() {
                    break;
                }
            }
            dispatcher.abort();
        }
    }

    rt.agent.stop();
    rt.relay.stop().await;
    loop_task.await??;

    Ok(())
}
