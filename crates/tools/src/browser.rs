//! Browser automation tool, speaking CDP through the command relay.
//!
//! Actions: navigate, click, type, read, screenshot, evaluate. Click and
//! type are expressed as `Runtime.evaluate` scripts that locate the element
//! by CSS selector and dispatch standard input/change events; read extracts
//! `innerText` capped to a fixed length; screenshot decodes the captured
//! PNG into the workspace and reports its absolute path.
//!
//! Every action converts relay faults and in-page exceptions into a
//! human-readable error string. Nothing raises past this tool.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::debug;

use nanoclaw_core::error::ToolError;
use nanoclaw_core::tool::{Tool, FILE_RESULT_MARKER};
use nanoclaw_relay::{CommandRelay, RelayError};

/// Cap applied to `read` output.
const READ_LIMIT: usize = 2000;

/// Control the browser via the extension relay.
pub struct BrowserTool {
    relay: CommandRelay,
    workspace: PathBuf,
}

impl BrowserTool {
    /// The relay is owned by the host and shared by handle; the workspace
    /// directory receives screenshots.
    pub fn new(relay: CommandRelay, workspace: PathBuf) -> Self {
        Self { relay, workspace }
    }

    async fn dispatch(&self, action: &str, args: &Value) -> Result<String, RelayError> {
        match action {
            "navigate" => {
                let Some(url) = args["url"].as_str() else {
                    return Ok("Error: url is required for navigate".into());
                };
                let url = if url.starts_with("http") {
                    url.to_string()
                } else {
                    format!("https://{url}")
                };

                self.relay
                    .send_command("Page.navigate", json!({"url": url}))
                    .await?;
                Ok(format!("Navigated to {url}"))
            }

            "click" => {
                let Some(selector) = args["selector"].as_str() else {
                    return Ok("Error: selector is required for click".into());
                };

                let js = format!(
                    "document.querySelector('{}').click()",
                    js_escape(selector)
                );
                let res = self
                    .relay
                    .send_command("Runtime.evaluate", json!({"expression": js}))
                    .await?;
                if let Some(details) = res.get("exceptionDetails") {
                    return Ok(format!("Error clicking {selector}: {details}"));
                }
                Ok(format!("Clicked {selector}"))
            }

            "type" => {
                let Some(selector) = args["selector"].as_str() else {
                    return Ok("Error: selector and text are required for type".into());
                };
                let Some(text) = args["text"].as_str() else {
                    return Ok("Error: selector and text are required for type".into());
                };

                let js = format!(
                    r#"
                    var el = document.querySelector('{}');
                    if (el) {{
                        el.value = '{}';
                        el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                        el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                    }} else {{
                        throw new Error('Element not found');
                    }}
                    "#,
                    js_escape(selector),
                    js_escape(text)
                );
                let res = self
                    .relay
                    .send_command("Runtime.evaluate", json!({"expression": js}))
                    .await?;
                if let Some(details) = res.get("exceptionDetails") {
                    return Ok(format!("Error typing in {selector}: {details}"));
                }
                Ok(format!("Typed '{text}' into {selector}"))
            }

            "read" => {
                let selector = args["selector"].as_str().unwrap_or("body");

                let js = if selector == "body" {
                    "document.body.innerText".to_string()
                } else {
                    format!(
                        "document.querySelector('{}').innerText",
                        js_escape(selector)
                    )
                };
                let res = self
                    .relay
                    .send_command(
                        "Runtime.evaluate",
                        json!({"expression": js, "returnByValue": true}),
                    )
                    .await?;
                if let Some(details) = res.get("exceptionDetails") {
                    return Ok(format!("Error reading {selector}: {details}"));
                }

                let text = value_to_text(res.pointer("/result/value"));
                Ok(text.chars().take(READ_LIMIT).collect())
            }

            "screenshot" => {
                let res = self
                    .relay
                    .send_command("Page.captureScreenshot", json!({"format": "png"}))
                    .await?;

                let Some(data) = res.get("data").and_then(Value::as_str) else {
                    return Ok("Failed to capture screenshot".into());
                };
                let bytes = match base64::engine::general_purpose::STANDARD.decode(data) {
                    Ok(bytes) => bytes,
                    Err(e) => return Ok(format!("Failed to decode screenshot data: {e}")),
                };

                let filename = format!("screenshot_{}.png", chrono::Utc::now().timestamp());
                let path = self.workspace.join(filename);
                if let Some(parent) = path.parent() {
                    if let Err(e) = tokio::fs::create_dir_all(parent).await {
                        return Ok(format!("Failed to prepare screenshot dir: {e}"));
                    }
                }
                if let Err(e) = tokio::fs::write(&path, &bytes).await {
                    return Ok(format!("Failed to save screenshot: {e}"));
                }

                let abs = path
                    .canonicalize()
                    .unwrap_or(path);
                debug!(path = %abs.display(), "Screenshot captured");
                Ok(format!("{FILE_RESULT_MARKER}{}", abs.display()))
            }

            "evaluate" => {
                let Some(script) = args["script"].as_str() else {
                    return Ok("Error: script is required for evaluate".into());
                };

                let res = self
                    .relay
                    .send_command(
                        "Runtime.evaluate",
                        json!({"expression": script, "returnByValue": true}),
                    )
                    .await?;
                if let Some(details) = res.get("exceptionDetails") {
                    return Ok(format!("Error evaluating script: {details}"));
                }

                Ok(value_to_text(res.pointer("/result/value")))
            }

            other => Ok(format!("Unknown action: {other}")),
        }
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Control the browser. Requires the browser relay extension. \
         Actions: navigate, click, type, read, screenshot, evaluate."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["navigate", "click", "type", "read", "screenshot", "evaluate"],
                    "description": "Action to perform"
                },
                "url": {"type": "string", "description": "URL for navigate"},
                "selector": {"type": "string", "description": "CSS selector for click/type/read"},
                "text": {"type": "string", "description": "Text to type"},
                "script": {"type": "string", "description": "JavaScript for evaluate"}
            },
            "required": ["action"]
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<String, ToolError> {
        let action = arguments["action"].as_str().unwrap_or("").to_string();
        match self.dispatch(&action, &arguments).await {
            Ok(text) => Ok(text),
            Err(e) => Ok(format!("Error executing {action}: {e}")),
        }
    }
}

/// Escape a string for embedding inside a single-quoted JS literal.
fn js_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'").replace('\n', "\\n")
}

/// Render an evaluate result value as plain text.
fn value_to_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    /// Relay plus a scripted peer: each responder takes the inner CDP
    /// command and produces the peer's `result` payload.
    async fn relay_with_peer<F>(responder: F) -> (CommandRelay, tokio::task::JoinHandle<()>)
    where
        F: Fn(&str, &Value) -> Value + Send + 'static,
    {
        let relay = CommandRelay::new(0).with_command_timeout(Duration::from_secs(2));
        relay.start().await;
        let addr = relay.local_addr().await.unwrap();

        let (mut peer, _) = connect_async(format!("ws://{addr}/extension"))
            .await
            .unwrap();

        let handle = tokio::spawn(async move {
            while let Some(Ok(frame)) = peer.next().await {
                let Ok(text) = frame.to_text() else { continue };
                let Ok(envelope) = serde_json::from_str::<Value>(text) else {
                    continue;
                };
                let method = envelope["params"]["method"].as_str().unwrap_or("").to_string();
                let params = envelope["params"]["params"].clone();
                let reply = json!({
                    "id": envelope["id"],
                    "result": responder(&method, &params),
                });
                if peer.send(WsMessage::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
        });

        // Give the relay a beat to register the peer
        tokio::time::sleep(Duration::from_millis(50)).await;
        (relay, handle)
    }

    fn tool(relay: &CommandRelay, workspace: &std::path::Path) -> BrowserTool {
        BrowserTool::new(relay.clone(), workspace.to_path_buf())
    }

    #[tokio::test]
    async fn navigate_prefixes_missing_scheme() {
        let (relay, peer) = relay_with_peer(|method, params| {
            assert_eq!(method, "Page.navigate");
            assert_eq!(params["url"], "https://example.com");
            json!({"frameId": "F1"})
        })
        .await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "navigate", "url": "example.com"}))
            .await
            .unwrap();
        assert_eq!(result, "Navigated to https://example.com");
        peer.abort();
    }

    #[tokio::test]
    async fn navigate_requires_url() {
        let (relay, peer) = relay_with_peer(|_, _| json!({})).await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "navigate"}))
            .await
            .unwrap();
        assert_eq!(result, "Error: url is required for navigate");
        peer.abort();
    }

    #[tokio::test]
    async fn read_caps_output_at_2000_chars() {
        let (relay, peer) = relay_with_peer(|method, _| {
            assert_eq!(method, "Runtime.evaluate");
            json!({"result": {"value": "x".repeat(5000)}})
        })
        .await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "read"}))
            .await
            .unwrap();
        assert_eq!(result.chars().count(), 2000);
        assert!(result.chars().all(|c| c == 'x'));
        peer.abort();
    }

    #[tokio::test]
    async fn click_surfaces_page_exception() {
        let (relay, peer) = relay_with_peer(|_, _| {
            json!({"exceptionDetails": {"text": "Cannot read properties of null"}})
        })
        .await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "click", "selector": "#missing"}))
            .await
            .unwrap();
        assert!(result.starts_with("Error clicking #missing:"));
        peer.abort();
    }

    #[tokio::test]
    async fn type_dispatches_script_and_reports() {
        let (relay, peer) = relay_with_peer(|method, params| {
            assert_eq!(method, "Runtime.evaluate");
            let expr = params["expression"].as_str().unwrap();
            assert!(expr.contains("querySelector"));
            assert!(expr.contains("dispatchEvent"));
            json!({"result": {}})
        })
        .await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "type", "selector": "#q", "text": "rust"}))
            .await
            .unwrap();
        assert_eq!(result, "Typed 'rust' into #q");
        peer.abort();
    }

    #[tokio::test]
    async fn screenshot_writes_file_and_reports_marker() {
        let png_bytes = b"fake png bytes".to_vec();
        let encoded = base64::engine::general_purpose::STANDARD.encode(&png_bytes);
        let (relay, peer) = relay_with_peer(move |method, _| {
            assert_eq!(method, "Page.captureScreenshot");
            json!({"data": encoded.clone()})
        })
        .await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "screenshot"}))
            .await
            .unwrap();
        assert!(result.starts_with(FILE_RESULT_MARKER));

        let path = result.strip_prefix(FILE_RESULT_MARKER).unwrap();
        let written = std::fs::read(path).unwrap();
        assert_eq!(written, png_bytes);
        peer.abort();
    }

    #[tokio::test]
    async fn evaluate_returns_value_text() {
        let (relay, peer) =
            relay_with_peer(|_, _| json!({"result": {"value": 42}})).await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "evaluate", "script": "6*7"}))
            .await
            .unwrap();
        assert_eq!(result, "42");
        peer.abort();
    }

    #[tokio::test]
    async fn unknown_action_is_reported() {
        let (relay, peer) = relay_with_peer(|_, _| json!({})).await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "hover", "selector": "#x"}))
            .await
            .unwrap();
        assert_eq!(result, "Unknown action: hover");
        peer.abort();
    }

    #[tokio::test]
    async fn no_peer_yields_error_text_not_a_panic() {
        let relay = CommandRelay::new(0).with_command_timeout(Duration::from_millis(200));
        relay.start().await;
        let dir = tempfile::tempdir().unwrap();

        let result = tool(&relay, dir.path())
            .execute(json!({"action": "navigate", "url": "example.com"}))
            .await
            .unwrap();
        assert!(result.starts_with("Error executing navigate:"));
        assert!(result.contains("not connected"));
    }

    #[test]
    fn js_escape_handles_quotes() {
        assert_eq!(js_escape("a'b"), "a\\'b");
        assert_eq!(js_escape("a\\b"), "a\\\\b");
    }
}
