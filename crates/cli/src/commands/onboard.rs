//! `nanoclaw onboard` — initialize configuration and workspace.

use nanoclaw_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    std::fs::create_dir_all(&config_dir)?;
    std::fs::create_dir_all(config_dir.join("workspace"))?;
    std::fs::create_dir_all(config_dir.join("sessions"))?;

    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("Wrote default config to {}", config_path.display());
    }

    println!();
    println!("Next steps:");
    println!("  1. Set your API key: export NANOCLAW_API_KEY=sk-...");
    println!("     (or add it under [provider] in config.toml)");
    println!("  2. Chat: nanoclaw agent -m \"hello\"");
    println!("  3. Full runtime: nanoclaw daemon");

    Ok(())
}
