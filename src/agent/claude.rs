use super::process::{Dialect, ParseState};
use super::{AgentEvent, ProviderKind, StartOptions};
use serde::Deserialize;
use serde_json::Value;

/// Events from Claude CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "assistant")]
    Assistant {
        message: AssistantMessage,
        #[serde(default)]
        session_id: String,
    },

    #[serde(rename = "user")]
    User {
        #[serde(default)]
        message: Option<UserMessage>,
    },

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System { subtype: String },
}

#[derive(Debug, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "tool_use")]
    ToolUse {
        name: String,
        input: Value,
        #[serde(default)]
        id: String,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub content: Vec<UserContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum UserContent {
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(other)]
    Other,
}

/// Flatten a tool_result content value (string or list of text blocks).
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|i| i.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct ClaudeDialect;

impl Dialect for ClaudeDialect {
    const KIND: ProviderKind = ProviderKind::Claude;

    fn args(opts: &StartOptions) -> Vec<String> {
        let mut args: Vec<String> = ["--print", "--output-format", "stream-json", "--verbose"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        if opts.safe_mode {
            args.push("--permission-mode".into());
            args.push("acceptEdits".into());
        } else if opts.permission_mode == "bypassPermissions" {
            args.push("--dangerously-skip-permissions".into());
        } else {
            args.push("--permission-mode".into());
            args.push(opts.permission_mode.clone());
        }
        args
    }

    fn parse_line(line: &str, state: &mut ParseState) -> Vec<AgentEvent> {
        let Ok(event) = serde_json::from_str::<StreamEvent>(line) else {
            // Not a stream event; stray output from the CLI.
            return Vec::new();
        };

        match event {
            StreamEvent::Assistant { message, .. } => message
                .content
                .into_iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse { name, input, .. } => Some(AgentEvent::ToolStart {
                        tool: name,
                        input: input.to_string(),
                    }),
                    ContentBlock::Text { text } => {
                        state.last_text = text;
                        None
                    }
                    ContentBlock::Other => None,
                })
                .collect(),
            StreamEvent::User { message } => message
                .map(|m| m.content)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|c| match c {
                    UserContent::ToolResult { content, is_error } => Some(AgentEvent::ToolResult {
                        content: content_text(&content),
                        is_error,
                    }),
                    UserContent::Other => None,
                })
                .collect(),
            StreamEvent::Result {
                subtype,
                result,
                is_error,
            } => {
                let success = !is_error && subtype == "success";
                let content = result
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| std::mem::take(&mut state.last_text));
                vec![AgentEvent::Result { success, content }]
            }
            StreamEvent::System { .. } => Vec::new(),
        }
    }
}
