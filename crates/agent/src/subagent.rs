//! Subagents: detached one-shot agent tasks.
//!
//! A subagent runs its own bounded model/tool cycle in the background and
//! reports its result through the bus as a system announcement, which the
//! main loop routes back to the originating chat. Subagents get their own
//! small tool registry — they cannot message users or spawn further
//! subagents.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{error, info};

use nanoclaw_core::bus::MessageBus;
use nanoclaw_core::error::ToolError;
use nanoclaw_core::message::{InboundMessage, Message, SYSTEM_CHANNEL};
use nanoclaw_core::provider::{ChatRequest, Provider};
use nanoclaw_core::tool::{Tool, ToolContext, ToolRegistry};
use nanoclaw_tools::ShellTool;

const SUBAGENT_SYSTEM_PROMPT: &str = "\
You are a NanoClaw subagent working on one delegated task. Complete the \
task using the available tools, then reply with a concise plain-text \
summary of the outcome. That reply is your final report.";

/// Spawns and tracks background subagent tasks.
pub struct SubagentManager {
    provider: Arc<dyn Provider>,
    model: String,
    bus: Arc<MessageBus>,
    tools: Arc<ToolRegistry>,
    max_turns: u32,
}

impl SubagentManager {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, bus: Arc<MessageBus>) -> Self {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(ShellTool::new(vec![])));
        Self {
            provider,
            model: model.into(),
            bus,
            tools: Arc::new(tools),
            max_turns: 10,
        }
    }

    /// Replace the subagent tool registry.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Set the per-task turn budget.
    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns = max;
        self
    }

    /// Start a background task; its result is announced on the system
    /// channel as `"{origin_channel}:{origin_chat}:{result}"`.
    pub fn spawn(
        &self,
        task: String,
        origin_channel: String,
        origin_chat: String,
    ) -> String {
        let task_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        info!(task_id = %task_id, "Spawning subagent");

        let provider = Arc::clone(&self.provider);
        let model = self.model.clone();
        let tools = Arc::clone(&self.tools);
        let bus = Arc::clone(&self.bus);
        let max_turns = self.max_turns;
        let id = task_id.clone();

        tokio::spawn(async move {
            let result = run_task(provider, &model, &tools, &task, max_turns).await;

            let announce = InboundMessage::new(
                SYSTEM_CHANNEL,
                "subagent",
                &id,
                format!("{origin_channel}:{origin_chat}:{result}"),
            );
            if let Err(e) = bus.publish_inbound(announce).await {
                error!(task_id = %id, error = %e, "Failed to announce subagent result");
            }
        });

        task_id
    }
}

/// The subagent's own bounded model/tool cycle. Always resolves to a
/// result string; failures become readable text.
async fn run_task(
    provider: Arc<dyn Provider>,
    model: &str,
    tools: &ToolRegistry,
    task: &str,
    max_turns: u32,
) -> String {
    let mut transcript = vec![
        Message::system(SUBAGENT_SYSTEM_PROMPT),
        Message::user(task),
    ];
    let definitions = tools.definitions();
    let mut last_answer: Option<String> = None;

    for _ in 0..max_turns {
        let request = ChatRequest {
            model: model.to_string(),
            messages: transcript.clone(),
            temperature: 0.7,
            max_tokens: None,
            tools: definitions.clone(),
        };

        let response = match provider.chat(request).await {
            Ok(response) => response,
            Err(e) => return format!("Subagent failed: {e}"),
        };

        let reply = response.message;
        if !reply.content.is_empty() {
            last_answer = Some(reply.content.clone());
        }
        let tool_calls = reply.tool_calls.clone();
        transcript.push(reply);

        if tool_calls.is_empty() {
            break;
        }

        for call in &tool_calls {
            let result = tools.execute(call).await;
            transcript.push(Message::tool_result(&call.id, &result.output));
        }
    }

    last_answer.unwrap_or_else(|| "Subagent produced no result".to_string())
}

/// Expose subagent spawning to the model.
pub struct SpawnTool {
    manager: Arc<SubagentManager>,
    context: Mutex<Option<ToolContext>>,
}

impl SpawnTool {
    pub fn new(manager: Arc<SubagentManager>) -> Self {
        Self {
            manager,
            context: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Tool for SpawnTool {
    fn name(&self) -> &str {
        "spawn"
    }

    fn description(&self) -> &str {
        "Delegate a task to a background subagent. The subagent works \
         independently and reports back to this chat when done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What the subagent should do"
                }
            },
            "required": ["task"]
        })
    }

    fn set_context(&self, ctx: &ToolContext) {
        if let Ok(mut guard) = self.context.lock() {
            *guard = Some(ctx.clone());
        }
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        let task = arguments["task"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'task' argument".into()))?;

        let ctx = self.context.lock().ok().and_then(|guard| guard.clone());
        let Some(ctx) = ctx else {
            return Ok("Error: no origin context for spawn".into());
        };

        let task_id = self
            .manager
            .spawn(task.to_string(), ctx.channel, ctx.chat_id);
        Ok(format!(
            "Subagent {task_id} started. It will report back here when done."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nanoclaw_core::error::ProviderError;
    use nanoclaw_core::provider::ChatResponse;
    use nanoclaw_core::tool::ToolCall;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    struct ScriptedProvider {
        script: StdMutex<VecDeque<std::result::Result<ChatResponse, ProviderError>>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<std::result::Result<ChatResponse, ProviderError>>) -> Self {
            Self {
                script: StdMutex::new(script.into()),
            }
        }

        fn text(content: &str) -> std::result::Result<ChatResponse, ProviderError> {
            Ok(ChatResponse {
                message: Message::assistant(content),
                model: "mock-model".into(),
                usage: None,
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn default_model(&self) -> &str {
            "mock-model"
        }
        async fn chat(
            &self,
            _request: ChatRequest,
        ) -> std::result::Result<ChatResponse, ProviderError> {
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Self::text("done"))
        }
    }

    #[tokio::test]
    async fn spawn_announces_result_on_system_channel() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text(
            "task finished: 3 files",
        )]));
        let bus = Arc::new(MessageBus::new());
        let manager = SubagentManager::new(provider, "mock-model", bus.clone());

        manager.spawn("count files".into(), "chanA".into(), "42".into());

        let announce = bus.consume_inbound().await.unwrap();
        assert_eq!(announce.channel, SYSTEM_CHANNEL);
        assert_eq!(announce.content, "chanA:42:task finished: 3 files");
    }

    #[tokio::test]
    async fn provider_failure_is_reported_not_dropped() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(ProviderError::Network(
            "dns".into(),
        ))]));
        let bus = Arc::new(MessageBus::new());
        let manager = SubagentManager::new(provider, "mock-model", bus.clone());

        manager.spawn("anything".into(), "cli".into(), "local".into());

        let announce = bus.consume_inbound().await.unwrap();
        assert!(announce.content.starts_with("cli:local:Subagent failed:"));
    }

    #[tokio::test]
    async fn subagent_runs_its_own_tool_cycle() {
        struct Marker;
        #[async_trait]
        impl Tool for Marker {
            fn name(&self) -> &str {
                "marker"
            }
            fn description(&self) -> &str {
                "Marker"
            }
            fn parameters_schema(&self) -> serde_json::Value {
                serde_json::json!({"type": "object", "properties": {}})
            }
            async fn execute(
                &self,
                _arguments: serde_json::Value,
            ) -> std::result::Result<String, ToolError> {
                Ok("marked".into())
            }
        }

        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(ChatResponse {
                message: Message::assistant_with_tools(
                    "",
                    vec![ToolCall {
                        id: "c1".into(),
                        name: "marker".into(),
                        arguments: serde_json::json!({}),
                    }],
                ),
                model: "mock-model".into(),
                usage: None,
            }),
            ScriptedProvider::text("used the marker"),
        ]));

        let mut tools = ToolRegistry::new();
        tools.register(Box::new(Marker));

        let bus = Arc::new(MessageBus::new());
        let manager = SubagentManager::new(provider, "mock-model", bus.clone())
            .with_tools(Arc::new(tools));

        manager.spawn("mark it".into(), "cli".into(), "local".into());

        let announce = bus.consume_inbound().await.unwrap();
        assert_eq!(announce.content, "cli:local:used the marker");
    }

    #[tokio::test]
    async fn spawn_tool_uses_message_context() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedProvider::text("ok")]));
        let bus = Arc::new(MessageBus::new());
        let manager = Arc::new(SubagentManager::new(provider, "mock-model", bus.clone()));
        let tool = SpawnTool::new(manager);

        tool.set_context(&ToolContext::new("webhook", "7"));
        let reply = tool
            .execute(serde_json::json!({"task": "do the thing"}))
            .await
            .unwrap();
        assert!(reply.contains("started"));

        let announce = bus.consume_inbound().await.unwrap();
        assert!(announce.content.starts_with("webhook:7:"));
    }

    #[tokio::test]
    async fn spawn_tool_without_context_reports_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let bus = Arc::new(MessageBus::new());
        let manager = Arc::new(SubagentManager::new(provider, "mock-model", bus));
        let tool = SpawnTool::new(manager);

        let reply = tool
            .execute(serde_json::json!({"task": "x"}))
            .await
            .unwrap();
        assert!(reply.starts_with("Error:"));
    }
}
