//! Configuration loading, validation, and management for NanoClaw.
//!
//! Loads configuration from `~/.nanoclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.nanoclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Provider settings
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Agent loop settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Browser relay settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Channel settings
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Workspace directory override (default: ~/.nanoclaw/workspace)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("provider", &self.provider)
            .field("agent", &self.agent)
            .field("relay", &self.relay)
            .field("channels", &self.channels)
            .field("workspace", &self.workspace)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// API key; env vars take priority (NANOCLAW_API_KEY, OPENROUTER_API_KEY,
    /// OPENAI_API_KEY)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Default model
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            model: default_model(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum model/tool turns per inbound message
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Override the built-in system prompt entirely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_turns() -> u32 {
    10
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Whether to start the browser relay at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Port for the loopback listener
    #[serde(default = "default_relay_port")]
    pub port: u16,

    /// The only path the extension may connect on
    #[serde(default = "default_relay_path")]
    pub path: String,

    /// How long a command waits for its response
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Fail in-flight commands immediately when the peer disconnects,
    /// instead of letting them run out their timeout
    #[serde(default)]
    pub fail_pending_on_disconnect: bool,
}

fn default_true() -> bool {
    true
}
fn default_relay_port() -> u16 {
    18792
}
fn default_relay_path() -> String {
    "/extension".into()
}
fn default_command_timeout() -> u64 {
    30
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_relay_port(),
            path: default_relay_path(),
            command_timeout_secs: default_command_timeout(),
            fail_pending_on_disconnect: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub cli: CliChannelConfig,

    #[serde(default)]
    pub webhook: WebhookChannelConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliChannelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for CliChannelConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookChannelConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Address the intake server binds to
    #[serde(default = "default_webhook_host")]
    pub listen_host: String,

    #[serde(default = "default_webhook_port")]
    pub listen_port: u16,

    /// Where replies are POSTed (the bridge's /reply endpoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_url: Option<String>,

    /// HMAC shared secret for signature validation. None = no validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_secret: Option<String>,

    /// Allowlist of sender IDs. Empty = deny all, ["*"] = allow all.
    #[serde(default = "default_allow_all")]
    pub allowed_senders: Vec<String>,
}

fn default_webhook_host() -> String {
    "0.0.0.0".into()
}
fn default_webhook_port() -> u16 {
    18790
}
fn default_allow_all() -> Vec<String> {
    vec!["*".into()]
}

impl Default for WebhookChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_host: default_webhook_host(),
            listen_port: default_webhook_port(),
            reply_url: None,
            shared_secret: None,
            allowed_senders: default_allow_all(),
        }
    }
}

impl std::fmt::Debug for WebhookChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookChannelConfig")
            .field("enabled", &self.enabled)
            .field("listen_host", &self.listen_host)
            .field("listen_port", &self.listen_port)
            .field("reply_url", &self.reply_url)
            .field("shared_secret", &redact(&self.shared_secret))
            .field("allowed_senders", &self.allowed_senders)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.nanoclaw/config.toml).
    ///
    /// Environment variables override file values:
    /// - `NANOCLAW_API_KEY` (highest priority), `OPENROUTER_API_KEY`,
    ///   `OPENAI_API_KEY`
    /// - `NANOCLAW_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.provider.api_key.is_none() {
            config.provider.api_key = std::env::var("NANOCLAW_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("NANOCLAW_MODEL") {
            config.provider.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".nanoclaw")
    }

    /// Get the workspace directory path (screenshots, tool scratch space).
    pub fn workspace_dir(&self) -> PathBuf {
        match &self.workspace {
            Some(dir) => PathBuf::from(dir),
            None => Self::config_dir().join("workspace"),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.agent.temperature) {
            return Err(ConfigError::ValidationError(
                "agent.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_turns must be at least 1".into(),
            ));
        }

        if self.relay.command_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "relay.command_timeout_secs must be at least 1".into(),
            ));
        }

        if !self.relay.path.starts_with('/') {
            return Err(ConfigError::ValidationError(
                "relay.path must start with '/'".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_turns, 10);
        assert_eq!(config.relay.port, 18792);
        assert_eq!(config.relay.path, "/extension");
        assert_eq!(config.relay.command_timeout_secs, 30);
        assert!(!config.relay.fail_pending_on_disconnect);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.model, config.provider.model);
        assert_eq!(parsed.relay.port, config.relay.port);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            agent: AgentConfig {
                temperature: 5.0,
                ..AgentConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_turns_rejected() {
        let config = AppConfig {
            agent: AgentConfig {
                max_turns: 0,
                ..AgentConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn relay_path_must_be_absolute() {
        let config = AppConfig {
            relay: RelayConfig {
                path: "extension".into(),
                ..RelayConfig::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().relay.port, 18792);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[provider]
model = "gpt-4o"

[channels.webhook]
enabled = true
listen_port = 9999
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.provider.model, "gpt-4o");
        assert!(config.channels.webhook.enabled);
        assert_eq!(config.channels.webhook.listen_port, 9999);
        // untouched sections keep defaults
        assert_eq!(config.agent.max_turns, 10);
        assert_eq!(config.relay.path, "/extension");
    }

    #[test]
    fn debug_redacts_secrets() {
        let config = AppConfig {
            provider: ProviderConfig {
                api_key: Some("sk-secret".into()),
                ..ProviderConfig::default()
            },
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("18792"));
        assert!(toml_str.contains("/extension"));
    }
}
