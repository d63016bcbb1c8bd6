//! Agent session boundary.
//!
//! Three interchangeable agent CLIs sit behind [`AgentProvider`]. Each
//! provider publishes [`SessionEvent`]s for all of its sessions on one
//! broadcast stream; consumers filter by session id. The [`bridge`] turns a
//! session into a single awaitable delegation with a timeout.

pub mod bridge;
pub mod claude;
pub mod codex;
pub mod gemini;
pub mod process;

pub use bridge::{AgentBridge, DelegationKind, DelegationOutcome};
pub use process::{CliProvider, Dialect};

use crate::errors::{ConfigError, DelegationError};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Normalized event from any provider's output stream.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// A tool invocation began. `input` is the JSON-encoded argument object.
    ToolStart { tool: String, input: String },
    ToolResult { content: String, is_error: bool },
    /// Terminal event; exactly one is emitted per session.
    Result { success: bool, content: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvent {
    pub session_id: String,
    pub event: AgentEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Claude,
    Codex,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Codex => "codex",
            ProviderKind::Gemini => "gemini",
        }
    }

    /// Executable name when no override is configured.
    pub fn default_command(&self) -> &'static str {
        self.as_str()
    }

    pub fn stream_event_name(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude-event",
            ProviderKind::Codex => "codex-event",
            ProviderKind::Gemini => "gemini-event",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(ProviderKind::Claude),
            "codex" => Ok(ProviderKind::Codex),
            "gemini" => Ok(ProviderKind::Gemini),
            _ => Err(ConfigError::UnknownProvider(s.to_string())),
        }
    }
}

/// Launch parameters for one agent session.
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub cwd: PathBuf,
    pub session_id: String,
    pub permission_mode: String,
    pub safe_mode: bool,
}

#[async_trait]
pub trait AgentProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Name of the event stream this provider publishes on.
    fn stream_event_name(&self) -> &'static str {
        self.kind().stream_event_name()
    }

    /// Subscribe to events for every session of this provider.
    fn subscribe(&self) -> broadcast::Receiver<SessionEvent>;

    async fn start(&self, opts: StartOptions) -> Result<(), DelegationError>;

    async fn send_input(&self, session_id: &str, text: &str) -> Result<(), DelegationError>;

    /// Best-effort termination; unknown sessions are ignored.
    async fn terminate(&self, session_id: &str);
}

/// Build the provider for `kind`, running `command` as the executable.
pub fn build_provider(kind: ProviderKind, command: &str) -> Arc<dyn AgentProvider> {
    match kind {
        ProviderKind::Claude => Arc::new(CliProvider::<claude::ClaudeDialect>::new(command)),
        ProviderKind::Codex => Arc::new(CliProvider::<codex::CodexDialect>::new(command)),
        ProviderKind::Gemini => Arc::new(CliProvider::<gemini::GeminiDialect>::new(command)),
    }
}

/// Tool names that modify files across all providers.
pub fn is_file_modifying_tool(tool: &str) -> bool {
    let t = tool.to_lowercase();
    ["edit", "write", "replace", "patch"]
        .iter()
        .any(|k| t.contains(k))
}

/// Path argument of a file-modifying tool call, if present.
pub fn tool_file_path(input: &serde_json::Value) -> Option<&str> {
    ["file_path", "path", "absolute_path"]
        .iter()
        .find_map(|k| input.get(*k).and_then(|v| v.as_str()))
        .filter(|p| !p.is_empty())
}

/// Short human-readable description of a tool call for the activity log.
pub fn describe_tool(tool: &str, input: &serde_json::Value) -> String {
    let path = tool_file_path(input).map(shorten_path);
    match (tool.to_lowercase().as_str(), path) {
        ("read" | "read_file", Some(p)) => format!("Reading: {}", p),
        ("write" | "write_file", Some(p)) => format!("Creating: {}", p),
        (_, Some(p)) if is_file_modifying_tool(tool) => format!("Editing: {}", p),
        ("bash" | "shell" | "run_shell_command", _) => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| crate::util::truncate_chars(s, 40))
                .unwrap_or_else(|| "command".to_string());
            format!("Running: {}", cmd)
        }
        ("grep" | "glob" | "search_file_content", _) => {
            let pattern = input.get("pattern").and_then(|v| v.as_str()).unwrap_or("*");
            format!("Searching: {}", crate::util::truncate_chars(pattern, 30))
        }
        _ => tool.to_string(),
    }
}

/// Last two path components.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}
