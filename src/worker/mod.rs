//! Worker lanes and the per-issue phase pipeline.
//!
//! A [`WorkerSlot`] is the shared record the scheduler reads to avoid double
//! claims; [`pipeline::IssuePipeline`] is the state machine a worker drives
//! for each issue it claims.

pub mod pipeline;
pub mod prompts;

pub use pipeline::{IssuePipeline, PipelineContext};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    #[default]
    Idle,
    Working,
    SelfReviewing,
    Auditing,
    AuditFixing,
    Testing,
    Fixing,
    Committing,
    Reviewing,
    Completed,
    Blocked,
}

impl WorkerPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerPhase::Reviewing | WorkerPhase::Completed | WorkerPhase::Blocked
        )
    }
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerPhase::Idle => "idle",
            WorkerPhase::Working => "working",
            WorkerPhase::SelfReviewing => "self-reviewing",
            WorkerPhase::Auditing => "auditing",
            WorkerPhase::AuditFixing => "audit-fixing",
            WorkerPhase::Testing => "testing",
            WorkerPhase::Fixing => "fixing",
            WorkerPhase::Committing => "committing",
            WorkerPhase::Reviewing => "reviewing",
            WorkerPhase::Completed => "completed",
            WorkerPhase::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// One concurrent execution lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSlot {
    pub id: usize,
    pub issue_id: Option<String>,
    pub phase: WorkerPhase,
    pub retry_count: u32,
    pub files_touched: BTreeSet<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkerSlot {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            issue_id: None,
            phase: WorkerPhase::Idle,
            retry_count: 0,
            files_touched: BTreeSet::new(),
            started_at: None,
        }
    }

    pub fn claim(&mut self, issue_id: impl Into<String>) {
        self.issue_id = Some(issue_id.into());
        self.phase = WorkerPhase::Working;
        self.retry_count = 0;
        self.files_touched.clear();
        self.started_at = Some(Utc::now());
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.id);
    }

    pub fn is_idle(&self) -> bool {
        self.issue_id.is_none()
    }
}

/// How an issue left a worker's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueOutcome {
    Completed,
    /// Parked in the human-review list
    Review,
    Blocked(String),
    /// A stop request arrived between phases; the issue stays queued
    Interrupted,
}
