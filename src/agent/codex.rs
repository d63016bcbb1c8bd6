//! `codex exec --json` event mapping.
//!
//! Codex reports work as items. Command executions map to a `shell` tool
//! start/result pair; each path in a `file_change` item becomes its own
//! `edit` tool start so file tracking sees every changed file.

use super::process::{Dialect, ParseState};
use super::{AgentEvent, ProviderKind, StartOptions};
use serde_json::{Value, json};

pub struct CodexDialect;

fn item_events(item: &Value, completed: bool, state: &mut ParseState) -> Vec<AgentEvent> {
    let kind = item.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match (kind, completed) {
        ("command_execution", false) => {
            let command = item.get("command").and_then(|c| c.as_str()).unwrap_or("");
            vec![AgentEvent::ToolStart {
                tool: "shell".into(),
                input: json!({ "command": command }).to_string(),
            }]
        }
        ("command_execution", true) => {
            let output = item
                .get("aggregated_output")
                .and_then(|o| o.as_str())
                .unwrap_or("")
                .to_string();
            let is_error = item
                .get("exit_code")
                .and_then(|c| c.as_i64())
                .is_some_and(|c| c != 0);
            vec![AgentEvent::ToolResult {
                content: output,
                is_error,
            }]
        }
        ("file_change", true) => item
            .get("changes")
            .and_then(|c| c.as_array())
            .map(|changes| {
                changes
                    .iter()
                    .filter_map(|c| c.get("path").and_then(|p| p.as_str()))
                    .map(|path| AgentEvent::ToolStart {
                        tool: "edit".into(),
                        input: json!({ "file_path": path }).to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        ("agent_message", true) => {
            if let Some(text) = item.get("text").and_then(|t| t.as_str()) {
                state.last_text = text.to_string();
            }
            Vec::new()
        }
        _ => Vec::new(),
    }
}

impl Dialect for CodexDialect {
    const KIND: ProviderKind = ProviderKind::Codex;

    fn args(opts: &StartOptions) -> Vec<String> {
        let mut args = vec!["exec".to_string(), "--json".to_string()];
        if opts.safe_mode {
            args.push("--full-auto".into());
        } else if opts.permission_mode == "bypassPermissions" {
            args.push("--dangerously-bypass-approvals-and-sandbox".into());
        } else {
            args.push("--full-auto".into());
        }
        // Read the prompt from stdin.
        args.push("-".into());
        args
    }

    fn parse_line(line: &str, state: &mut ParseState) -> Vec<AgentEvent> {
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            return Vec::new();
        };
        let event_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("");
        match event_type {
            "item.started" | "item.completed" => match value.get("item") {
                Some(item) => item_events(item, event_type == "item.completed", state),
                None => Vec::new(),
            },
            "turn.completed" => vec![AgentEvent::Result {
                success: true,
                content: std::mem::take(&mut state.last_text),
            }],
            "turn.failed" => {
                let message = value
                    .pointer("/error/message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("turn failed")
                    .to_string();
                vec![AgentEvent::Result {
                    success: false,
                    content: message,
                }]
            }
            "error" => {
                let message = value
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("codex error")
                    .to_string();
                vec![AgentEvent::Result {
                    success: false,
                    content: message,
                }]
            }
            _ => Vec::new(),
        }
    }
}
