//! Session snapshots: the persisted projection of orchestrator state.
//!
//! A snapshot is written after every mutating action and read once at
//! startup. Every field carries a serde default so snapshots written by an
//! older build still load.

pub mod store;

pub use store::{FileSessionStore, SessionStore};

use crate::queue::{CompletedRing, Queue};
use crate::settings::Settings;
use crate::worker::WorkerPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Error,
}

impl SessionStatus {
    /// Whether a snapshot with this status represents an interrupted run.
    pub fn is_resumable(&self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Branch bookkeeping for feature-branch runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchState {
    #[serde(default)]
    pub current_branch: Option<String>,
    #[serde(default)]
    pub original_branch: Option<String>,
    /// Epic (or standalone issue) id to branch name
    #[serde(default)]
    pub epic_branches: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub queue: Queue,
    #[serde(default)]
    pub completed: CompletedRing,
    #[serde(default)]
    pub human_review: Vec<String>,
    /// Single-worker view: the issue worker 0 is on
    #[serde(default)]
    pub current_issue: Option<String>,
    #[serde(default)]
    pub current_phase: WorkerPhase,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub branch: BranchState,
    #[serde(default = "Utc::now")]
    pub saved_at: DateTime<Utc>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Idle,
            queue: Queue::new(),
            completed: CompletedRing::default(),
            human_review: Vec::new(),
            current_issue: None,
            current_phase: WorkerPhase::Idle,
            retry_count: 0,
            settings: Settings::default(),
            branch: BranchState::default(),
            saved_at: Utc::now(),
        }
    }
}

impl SessionSnapshot {
    /// Where an issue id currently lives, if anywhere.
    pub fn location_of(&self, id: &str) -> Option<&'static str> {
        if self.queue.contains(id) {
            Some("queue")
        } else if self.human_review.iter().any(|i| i == id) {
            Some("human review")
        } else if self.completed.contains(id) {
            Some("completed")
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_old_snapshot_without_new_fields_loads() {
        let json = r#"{"status":"paused","queue":["bd-1","bd-2"]}"#;
        let snap: SessionSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.status, SessionStatus::Paused);
        assert_eq!(snap.queue.len(), 2);
        assert!(snap.completed.is_empty());
        assert_eq!(snap.settings, Settings::default());
        assert!(snap.branch.epic_branches.is_empty());
    }

    #[test]
    fn test_resumable_statuses() {
        assert!(SessionStatus::Running.is_resumable());
        assert!(SessionStatus::Paused.is_resumable());
        assert!(!SessionStatus::Idle.is_resumable());
        assert!(!SessionStatus::Error.is_resumable());
    }

    #[test]
    fn test_location_of() {
        let mut snap = SessionSnapshot::default();
        snap.queue.add("q");
        snap.human_review.push("r".into());
        snap.completed.push("c");
        assert_eq!(snap.location_of("q"), Some("queue"));
        assert_eq!(snap.location_of("r"), Some("human review"));
        assert_eq!(snap.location_of("c"), Some("completed"));
        assert_eq!(snap.location_of("z"), None);
    }
}
