//! Work items and the local read-through cache of their metadata.
//!
//! Issues are owned by an external tracker (see [`tracker`]); the
//! orchestrator only reads them and requests status transitions.

pub mod tracker;

pub use tracker::{CliTracker, IssueTracker};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tracker-side status of an issue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Blocked => "blocked",
            IssueStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_issue_type() -> String {
    "task".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    #[serde(default = "default_issue_type", alias = "type")]
    pub issue_type: String,
    #[serde(default)]
    pub description: String,
    /// 0 is the highest priority; absent sorts after every explicit value
    #[serde(default)]
    pub priority: Option<u32>,
    /// Ordering hint; absent sorts last
    #[serde(default)]
    pub phase: Option<u32>,
    #[serde(default, alias = "parent", alias = "epic_id")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: IssueStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            issue_type: default_issue_type(),
            description: String::new(),
            priority: None,
            phase: None,
            parent_id: None,
            status: IssueStatus::Open,
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_phase(mut self, phase: u32) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    pub fn with_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = issue_type.into();
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }

    /// Conventional-commit prefix for this issue's type.
    pub fn commit_prefix(&self) -> &'static str {
        match self.issue_type.to_lowercase().as_str() {
            "bug" | "fix" => "fix",
            "chore" => "chore",
            "docs" | "documentation" => "docs",
            "refactor" => "refactor",
            "test" | "tests" => "test",
            _ => "feat",
        }
    }
}

/// Fields for an issue the orchestrator asks the tracker to create.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub issue_type: String,
    pub priority: Option<u32>,
    pub parent_id: Option<String>,
}

/// In-memory cache of issue metadata keyed by id.
#[derive(Debug, Clone, Default)]
pub struct IssueCache {
    issues: HashMap<String, Issue>,
}

impl IssueCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_issues(issues: impl IntoIterator<Item = Issue>) -> Self {
        let mut cache = Self::new();
        cache.replace_all(issues);
        cache
    }

    pub fn get(&self, id: &str) -> Option<&Issue> {
        self.issues.get(id)
    }

    pub fn insert(&mut self, issue: Issue) {
        self.issues.insert(issue.id.clone(), issue);
    }

    pub fn replace_all(&mut self, issues: impl IntoIterator<Item = Issue>) {
        self.issues = issues.into_iter().map(|i| (i.id.clone(), i)).collect();
    }

    pub fn contains(&self, id: &str) -> bool {
        self.issues.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Title for display, falling back to the id for unknown issues.
    pub fn title_for<'a>(&'a self, id: &'a str) -> &'a str {
        self.issues.get(id).map(|i| i.title.as_str()).unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tracker_json() {
        let json = r#"{
            "id": "bd-12",
            "title": "Add login",
            "issue_type": "feature",
            "priority": 1,
            "status": "in_progress",
            "parent": "bd-10",
            "created_at": "2025-01-05T10:00:00Z",
            "labels": ["auth"]
        }"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.id, "bd-12");
        assert_eq!(issue.priority, Some(1));
        assert_eq!(issue.phase, None);
        assert_eq!(issue.parent_id.as_deref(), Some("bd-10"));
        assert_eq!(issue.status, IssueStatus::InProgress);
        assert!(issue.created_at.is_some());
    }

    #[test]
    fn test_minimal_issue_json() {
        let issue: Issue = serde_json::from_str(r#"{"id":"x","title":"t"}"#).unwrap();
        assert_eq!(issue.issue_type, "task");
        assert_eq!(issue.status, IssueStatus::Open);
        assert!(issue.created_at.is_none());
    }

    #[test]
    fn test_commit_prefix() {
        assert_eq!(Issue::new("a", "t").with_type("bug").commit_prefix(), "fix");
        assert_eq!(Issue::new("a", "t").with_type("Chore").commit_prefix(), "chore");
        assert_eq!(Issue::new("a", "t").commit_prefix(), "feat");
    }

    #[test]
    fn test_cache_title_fallback() {
        let cache = IssueCache::from_issues([Issue::new("bd-1", "First")]);
        assert_eq!(cache.title_for("bd-1"), "First");
        assert_eq!(cache.title_for("bd-9"), "bd-9");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(IssueStatus::InProgress.as_str(), "in_progress");
        assert_eq!(IssueStatus::Closed.to_string(), "closed");
    }
}
