//! Transcript assembly: system prompt + session history + the new message.

use nanoclaw_core::message::{Message, Role};
use nanoclaw_session::Turn;

const DEFAULT_SYSTEM_PROMPT: &str = "\
You are NanoClaw, a helpful personal assistant reachable over chat. \
Answer concisely. Use the available tools when a task needs them, and \
reply with plain text once you have what you need.";

/// Builds the working transcript for one inbound message.
pub struct ContextBuilder {
    system_prompt: String,
}

impl ContextBuilder {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            system_prompt: system_prompt.unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Assemble: system prompt, then prior turns in order, then the new
    /// user content. Media references are noted inline so the model knows
    /// they exist.
    pub fn build(&self, history: &[Turn], content: &str, media: &[String]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(&self.system_prompt));

        for turn in history {
            let msg = match turn.role {
                Role::Assistant => Message::assistant(&turn.content),
                _ => Message::user(&turn.content),
            };
            messages.push(msg);
        }

        messages.push(Message::user(annotate_media(content, media)));
        messages
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(None)
    }
}

fn annotate_media(content: &str, media: &[String]) -> String {
    if media.is_empty() {
        return content.to_string();
    }
    let mut annotated = content.to_string();
    for item in media {
        annotated.push_str(&format!("\n[attached: {item}]"));
    }
    annotated
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(role: Role, content: &str) -> Turn {
        Turn {
            role,
            content: content.into(),
            media: vec![],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn system_prompt_comes_first() {
        let builder = ContextBuilder::default();
        let messages = builder.build(&[], "hello", &[]);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "hello");
    }

    #[test]
    fn history_is_preserved_in_order() {
        let builder = ContextBuilder::default();
        let history = vec![
            turn(Role::User, "first"),
            turn(Role::Assistant, "second"),
        ];
        let messages = builder.build(&history, "third", &[]);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "first");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages[3].content, "third");
    }

    #[test]
    fn media_is_annotated() {
        let builder = ContextBuilder::default();
        let messages = builder.build(&[], "look at this", &["/tmp/pic.png".into()]);
        let user = &messages[1].content;
        assert!(user.contains("look at this"));
        assert!(user.contains("[attached: /tmp/pic.png]"));
    }

    #[test]
    fn custom_system_prompt() {
        let builder = ContextBuilder::new(Some("You are a pirate.".into()));
        let messages = builder.build(&[], "hi", &[]);
        assert_eq!(messages[0].content, "You are a pirate.");
    }
}
