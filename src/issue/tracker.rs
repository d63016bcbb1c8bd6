//! Issue tracker boundary.
//!
//! [`CliTracker`] drives a beads-style CLI (`bd`) and parses its `--json`
//! output. Some tracker builds print warnings before the JSON payload, so
//! output is scanned for the first JSON value rather than parsed whole.

use super::{Issue, IssueStatus, NewIssue};
use crate::errors::TrackerError;
use crate::util::extract_json_value;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn list_issues(&self) -> Result<Vec<Issue>, TrackerError>;

    async fn create_issue(&self, issue: &NewIssue) -> Result<Issue, TrackerError>;

    async fn update_status(&self, id: &str, status: IssueStatus) -> Result<(), TrackerError>;
}

pub struct CliTracker {
    command: String,
    project_dir: PathBuf,
}

impl CliTracker {
    pub fn new(command: impl Into<String>, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            project_dir: project_dir.into(),
        }
    }

    async fn run(&self, args: &[String]) -> Result<String, TrackerError> {
        let shown = format!("{} {}", self.command, args.join(" "));
        tracing::debug!(command = %shown, "Running tracker command");

        let output = Command::new(&self.command)
            .args(args)
            .current_dir(&self.project_dir)
            .output()
            .await
            .map_err(|source| TrackerError::Spawn {
                command: shown.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(TrackerError::CommandFailed {
                command: shown,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub(crate) fn parse_issue_list(stdout: &str) -> Result<Vec<Issue>, TrackerError> {
    let Some(json) = extract_json_value(stdout) else {
        // An empty tracker prints nothing at all.
        if stdout.trim().is_empty() {
            return Ok(Vec::new());
        }
        return Err(TrackerError::Parse("no JSON array in tracker output".into()));
    };
    serde_json::from_str(json).map_err(|e| TrackerError::Parse(e.to_string()))
}

pub(crate) fn parse_created_issue(stdout: &str) -> Result<Issue, TrackerError> {
    let json = extract_json_value(stdout)
        .ok_or_else(|| TrackerError::Parse("no JSON object in tracker output".into()))?;
    // Some trackers answer `create` with a one-element array.
    if json.starts_with('[') {
        let mut issues: Vec<Issue> =
            serde_json::from_str(json).map_err(|e| TrackerError::Parse(e.to_string()))?;
        return issues
            .pop()
            .ok_or_else(|| TrackerError::Parse("tracker returned an empty array".into()));
    }
    serde_json::from_str(json).map_err(|e| TrackerError::Parse(e.to_string()))
}

pub(crate) fn create_args(issue: &NewIssue) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        issue.title.clone(),
        "--type".to_string(),
        issue.issue_type.clone(),
    ];
    if !issue.description.is_empty() {
        args.push("--description".to_string());
        args.push(issue.description.clone());
    }
    if let Some(p) = issue.priority {
        args.push("--priority".to_string());
        args.push(p.to_string());
    }
    if let Some(parent) = &issue.parent_id {
        args.push("--parent".to_string());
        args.push(parent.clone());
    }
    args.push("--json".to_string());
    args
}

pub(crate) fn status_args(id: &str, status: IssueStatus) -> Vec<String> {
    match status {
        IssueStatus::Closed => vec!["close".to_string(), id.to_string()],
        other => vec![
            "update".to_string(),
            id.to_string(),
            "--status".to_string(),
            other.as_str().to_string(),
        ],
    }
}

#[async_trait]
impl IssueTracker for CliTracker {
    async fn list_issues(&self) -> Result<Vec<Issue>, TrackerError> {
        let stdout = self.run(&["list".to_string(), "--json".to_string()]).await?;
        parse_issue_list(&stdout)
    }

    async fn create_issue(&self, issue: &NewIssue) -> Result<Issue, TrackerError> {
        let stdout = self.run(&create_args(issue)).await?;
        parse_created_issue(&stdout)
    }

    async fn update_status(&self, id: &str, status: IssueStatus) -> Result<(), TrackerError> {
        self.run(&status_args(id, status)).await.map(|_| ())
    }
}
