//! `nanoclaw daemon` — the full runtime: channels + browser relay + loop.

use std::sync::Arc;

use tracing::{error, info};

use nanoclaw_channels::{ChannelRegistry, CliChannel, WebhookChannel};
use nanoclaw_config::AppConfig;

use super::runtime;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let rt = runtime::build(config).await?;

    if rt.config.relay.enabled {
        rt.relay.start().await;
    }

    let mut registry = ChannelRegistry::new();
    if rt.config.channels.cli.enabled {
        registry.register(Arc::new(CliChannel::new()));
    }
    if rt.config.channels.webhook.enabled {
        registry.register(Arc::new(WebhookChannel::new(
            rt.config.channels.webhook.clone(),
        )));
    }
    if registry.is_empty() {
        return Err("No channels enabled — nothing to listen on.".into());
    }
    let registry = Arc::new(registry);

    // Inbound pump: merged channel stream → bus
    let mut merged = registry.start_all().await?;
    let inbound_tx = rt.bus.inbound_sender();
    tokio::spawn(async move {
        while let Some(msg) = merged.recv().await {
            if inbound_tx.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Outbound pump: bus → owning channel
    {
        let bus = Arc::clone(&rt.bus);
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            while let Some(msg) = bus.consume_outbound().await {
                if let Err(e) = registry.dispatch(&msg).await {
                    error!(channel = %msg.channel, error = %e, "Failed to deliver response");
                }
            }
        });
    }

    info!(
        channels = ?registry.list(),
        model = %rt.config.provider.model,
        "NanoClaw daemon running — press Ctrl+C to stop"
    );

    let agent = Arc::clone(&rt.agent);
    let loop_task = tokio::spawn(async move { agent.run().await });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    rt.agent.stop();
    registry.stop_all().await;
    rt.relay.stop().await;
    loop_task.await??;

    Ok(())
}
