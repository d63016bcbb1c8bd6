//! `gemini --output-format stream-json` event mapping.

use super::process::{Dialect, ParseState};
use super::{AgentEvent, ProviderKind, StartOptions};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GeminiEvent {
    Message {
        #[serde(default)]
        role: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        delta: bool,
    },
    ToolUse {
        tool_name: String,
        #[serde(default)]
        parameters: Value,
    },
    ToolResult {
        #[serde(default)]
        status: String,
        #[serde(default)]
        output: Value,
    },
    Result {
        #[serde(default)]
        status: String,
        #[serde(default)]
        error: Option<Value>,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Other,
}

pub struct GeminiDialect;

impl Dialect for GeminiDialect {
    const KIND: ProviderKind = ProviderKind::Gemini;

    fn args(opts: &StartOptions) -> Vec<String> {
        let mut args = vec!["--output-format".to_string(), "stream-json".to_string()];
        if opts.safe_mode {
            args.push("--approval-mode".into());
            args.push("auto_edit".into());
        } else if opts.permission_mode == "bypassPermissions" {
            args.push("--yolo".into());
        }
        args
    }

    fn parse_line(line: &str, state: &mut ParseState) -> Vec<AgentEvent> {
        let Ok(event) = serde_json::from_str::<GeminiEvent>(line) else {
            return Vec::new();
        };
        match event {
            GeminiEvent::Message {
                role,
                content,
                delta,
            } if role == "assistant" => {
                if delta {
                    state.last_text.push_str(&content);
                } else {
                    state.last_text = content;
                }
                Vec::new()
            }
            GeminiEvent::ToolUse {
                tool_name,
                parameters,
            } => vec![AgentEvent::ToolStart {
                tool: tool_name,
                input: parameters.to_string(),
            }],
            GeminiEvent::ToolResult { status, output } => vec![AgentEvent::ToolResult {
                content: match output {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
                is_error: status == "error",
            }],
            GeminiEvent::Result { status, error } => {
                let success = status == "success";
                let content = if success {
                    std::mem::take(&mut state.last_text)
                } else {
                    error
                        .and_then(|e| e.get("message").and_then(|m| m.as_str()).map(String::from))
                        .unwrap_or_else(|| format!("gemini finished with status '{}'", status))
                };
                vec![AgentEvent::Result { success, content }]
            }
            GeminiEvent::Error { message } => vec![AgentEvent::Result {
                success: false,
                content: message,
            }],
            GeminiEvent::Message { .. } | GeminiEvent::Other => Vec::new(),
        }
    }
}
