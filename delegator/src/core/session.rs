//! Observable shape of a host-managed session.
//!
//! The orchestrator never sees a session's internals, only its status flag and
//! an append-only message log. These types model exactly that surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status flag reported by the host for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Busy,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolState {
    Pending,
    Running,
    Completed,
    Error,
}

/// One part of a message: plain text or a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    Tool {
        tool: String,
        #[serde(default)]
        input: Value,
        state: ToolState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

impl SessionMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    /// Concatenated plain-text parts, trimmed.
    pub fn text(&self) -> String {
        let mut buf = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                if !buf.is_empty() {
                    buf.push('\n');
                }
                buf.push_str(text);
            }
        }
        buf.trim().to_string()
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &Value, ToolState, Option<&str>)> {
        self.parts.iter().filter_map(|part| match part {
            MessagePart::Tool {
                tool,
                input,
                state,
                output,
            } => Some((tool.as_str(), input, *state, output.as_deref())),
            MessagePart::Text { .. } => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_joins_text_parts_only() {
        let message = SessionMessage {
            id: "m1".to_string(),
            role: MessageRole::Assistant,
            parts: vec![
                MessagePart::Text {
                    text: "first".to_string(),
                },
                MessagePart::Tool {
                    tool: "read".to_string(),
                    input: json!({"filePath": "a.ts"}),
                    state: ToolState::Completed,
                    output: Some("contents".to_string()),
                },
                MessagePart::Text {
                    text: "second ".to_string(),
                },
            ],
        };
        assert_eq!(message.text(), "first\nsecond");
        assert_eq!(message.tool_calls().count(), 1);
    }

    #[test]
    fn parses_host_json() {
        let raw = r#"{"id":"m","role":"assistant","parts":[{"type":"tool","tool":"signal_done","input":{"result":"ok"},"state":"completed"}]}"#;
        let message: SessionMessage = serde_json::from_str(raw).expect("parse");
        let (tool, input, state, output) = message.tool_calls().next().expect("tool");
        assert_eq!(tool, "signal_done");
        assert_eq!(input["result"], "ok");
        assert_eq!(state, ToolState::Completed);
        assert!(output.is_none());
    }
}
