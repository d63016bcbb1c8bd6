//! Typed error hierarchy for the Foreman orchestrator.
//!
//! Five enums cover the external boundaries:
//! - `DelegationError`: agent session start/stream/timeout failures
//! - `BranchError`: version-control operations during branch lifecycle
//! - `ConfigError`: invalid settings or provider selection
//! - `TrackerError`: issue tracker command failures
//! - `QueueError`: rejected backlog edits

use thiserror::Error;

/// Errors from a single delegation to an external agent process.
#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("Failed to start {provider} session {session_id}: {message}")]
    StartFailed {
        provider: String,
        session_id: String,
        message: String,
    },

    #[error("Failed to send input to session {session_id}: {message}")]
    InputFailed { session_id: String, message: String },

    #[error("{kind} delegation timed out after {secs}s")]
    Timeout { kind: String, secs: u64 },

    #[error("Agent reported an error: {0}")]
    AgentError(String),

    #[error("Event stream for session {0} closed before a result arrived")]
    StreamClosed(String),
}

impl DelegationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Errors from branch lifecycle management.
#[derive(Debug, Error)]
pub enum BranchError {
    #[error("Failed to read repository status: {0}")]
    Status(String),

    #[error("Failed to stash uncommitted changes: {0}")]
    Stash(String),

    #[error("Failed to create branch {branch}: {message}")]
    Create { branch: String, message: String },

    #[error("Failed to checkout branch {branch}: {message}")]
    Checkout { branch: String, message: String },

    #[error("Failed to push branch {branch}: {message}")]
    Push { branch: String, message: String },

    #[error("Repository has no current branch (detached HEAD or unborn)")]
    NoCurrentBranch,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from configuration parsing and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown agent provider '{0}'. Valid values: claude, codex, gemini")]
    UnknownProvider(String),

    #[error("Invalid setting {field}: {message}")]
    InvalidSetting { field: String, message: String },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

/// Errors from the external issue tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Failed to run tracker command `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tracker command `{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Could not parse tracker output: {0}")]
    Parse(String),
}

/// A backlog edit that would break queue/review/completed exclusivity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("{id} is already in the {location}")]
    AlreadyPresent { id: String, location: &'static str },

    #[error("{0} is not in the queue")]
    NotQueued(String),

    #[error("{id} is being worked on by worker {worker}")]
    InProgress { id: String, worker: usize },

    #[error("{0} is not awaiting review")]
    NotInReview(String),
}
