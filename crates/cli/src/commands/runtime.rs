//! Shared runtime assembly for the `agent` and `daemon` commands.
//!
//! Everything with shared state — the bus, the relay, the tool registry,
//! the session store — is constructed here, once, and handed to consumers
//! by reference. No component reaches for a global.

use std::sync::Arc;
use std::time::Duration;

use nanoclaw_agent::{AgentLoop, SpawnTool, SubagentManager};
use nanoclaw_config::AppConfig;
use nanoclaw_core::bus::MessageBus;
use nanoclaw_core::provider::Provider;
use nanoclaw_core::tool::ToolRegistry;
use nanoclaw_providers::OpenAiCompatProvider;
use nanoclaw_relay::CommandRelay;
use nanoclaw_session::SessionManager;
use nanoclaw_tools::{BrowserTool, MessageTool, ShellTool};

/// Shell commands a default install may run without extra configuration.
const SAFE_COMMANDS: &[&str] = &[
    "ls", "cat", "head", "tail", "echo", "pwd", "date", "whoami", "wc", "grep", "find", "which",
    "git", "cargo", "curl",
];

/// The assembled runtime, ready to run.
pub struct Runtime {
    pub config: AppConfig,
    pub bus: Arc<MessageBus>,
    pub relay: CommandRelay,
    pub agent: Arc<AgentLoop>,
}

/// Build provider, relay, tools, sessions, and the agent loop from config.
pub async fn build(config: AppConfig) -> Result<Runtime, Box<dyn std::error::Error>> {
    let Some(api_key) = config.provider.api_key.clone() else {
        return Err(
            "No API key configured. Set NANOCLAW_API_KEY or run `nanoclaw onboard`.".into(),
        );
    };

    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(
        "openai-compat",
        config.provider.api_url.as_str(),
        api_key,
        config.provider.model.as_str(),
    ));
    let model = provider.default_model().to_string();

    let bus = Arc::new(MessageBus::new());

    let relay = CommandRelay::new(config.relay.port)
        .with_path(config.relay.path.as_str())
        .with_command_timeout(Duration::from_secs(config.relay.command_timeout_secs))
        .with_fail_pending_on_disconnect(config.relay.fail_pending_on_disconnect);

    let subagents = Arc::new(SubagentManager::new(
        Arc::clone(&provider),
        model.as_str(),
        Arc::clone(&bus),
    ));

    let mut tools = ToolRegistry::new();
    tools.register(Box::new(ShellTool::new(
        SAFE_COMMANDS.iter().map(|s| s.to_string()).collect(),
    )));
    tools.register(Box::new(MessageTool::new(Arc::clone(&bus))));
    tools.register(Box::new(SpawnTool::new(subagents)));
    if config.relay.enabled {
        tools.register(Box::new(BrowserTool::new(
            relay.clone(),
            config.workspace_dir(),
        )));
    }

    let sessions = SessionManager::new(AppConfig::config_dir().join("sessions"))?;

    let mut agent = AgentLoop::new(
        provider,
        model.as_str(),
        Arc::new(tools),
        sessions,
        Arc::clone(&bus),
    )
    .with_max_turns(config.agent.max_turns)
    .with_temperature(config.agent.temperature)
    .with_max_tokens(config.agent.max_tokens);

    if let Some(prompt) = &config.agent.system_prompt {
        agent = agent.with_system_prompt(prompt.as_str());
    }

    Ok(Runtime {
        config,
        bus,
        relay,
        agent: Arc::new(agent),
    })
}
