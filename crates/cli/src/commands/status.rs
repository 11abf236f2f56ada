//! `nanoclaw status` — show configuration and stored sessions.

use nanoclaw_config::AppConfig;
use nanoclaw_session::SessionManager;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("NanoClaw status");
    println!("  Config dir:  {}", AppConfig::config_dir().display());
    println!("  Provider:    {}", config.provider.api_url);
    println!("  Model:       {}", config.provider.model);
    println!(
        "  API key:     {}",
        if config.has_api_key() { "configured" } else { "MISSING" }
    );
    println!("  Max turns:   {}", config.agent.max_turns);
    println!(
        "  Relay:       {} (port {}, path {})",
        if config.relay.enabled { "enabled" } else { "disabled" },
        config.relay.port,
        config.relay.path
    );
    println!(
        "  Channels:    cli={} webhook={}",
        config.channels.cli.enabled, config.channels.webhook.enabled
    );

    let sessions_dir = AppConfig::config_dir().join("sessions");
    if sessions_dir.exists() {
        let manager = SessionManager::new(sessions_dir)?;
        let keys = manager.list().await?;
        println!("  Sessions:    {}", keys.len());
        for key in keys.iter().take(10) {
            println!("    - {key}");
        }
        if keys.len() > 10 {
            println!("    ... and {} more", keys.len() - 10);
        }
    } else {
        println!("  Sessions:    0 (no session directory yet)");
    }

    Ok(())
}
