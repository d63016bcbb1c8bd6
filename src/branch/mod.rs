//! Feature-branch lifecycle for a run.
//!
//! Branches are named deterministically: issues with a parent share
//! `<prefix>/epic-<parent>`, standalone issues get `<prefix>/issue-<id>`.
//! Only branches carrying the prefix are considered orchestrator-owned and
//! eligible for push and PR creation.

pub mod git;

pub use git::{GitRepo, Vcs};

use crate::errors::BranchError;
use crate::issue::Issue;
use crate::session::BranchState;
use std::collections::HashMap;
use std::sync::Arc;

/// `id` as a single ref path component: kept verbatim except for
/// characters and sequences git forbids in ref names, which become `-`.
pub fn ref_component(id: &str) -> String {
    let mapped: String = id
        .chars()
        .map(|c| match c {
            '~' | '^' | ':' | '?' | '*' | '[' | '\\' | '/' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        })
        .collect();
    let mut out = mapped.replace("..", "-.").replace("@{", "-{");
    if out.starts_with('.') {
        out.replace_range(..1, "-");
    }
    if out.ends_with(".lock") {
        out.truncate(out.len() - ".lock".len());
        out.push_str("-lock");
    }
    if out.ends_with('.') {
        out.pop();
        out.push('-');
    }
    if out.is_empty() || out == "@" {
        out = "-".to_string();
    }
    out
}

/// Key under which an issue's branch is recorded.
pub fn branch_key(issue: &Issue) -> &str {
    issue.parent_id.as_deref().unwrap_or(&issue.id)
}

/// What finishing a session did, for the activity log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FinishReport {
    pub pushed: Vec<String>,
    pub pull_requests: Vec<String>,
    pub warnings: Vec<String>,
    pub returned_to: Option<String>,
}

pub struct BranchManager {
    vcs: Arc<dyn Vcs>,
    prefix: String,
}

impl BranchManager {
    pub fn new(vcs: Arc<dyn Vcs>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { vcs, prefix }
    }

    pub fn vcs(&self) -> &Arc<dyn Vcs> {
        &self.vcs
    }

    pub fn branch_name_for(&self, issue: &Issue) -> String {
        match &issue.parent_id {
            Some(parent) => format!("{}/epic-{}", self.prefix, ref_component(parent)),
            None => format!("{}/issue-{}", self.prefix, ref_component(&issue.id)),
        }
    }

    pub fn is_owned(&self, branch: &str) -> bool {
        branch.starts_with(&format!("{}/", self.prefix))
    }

    /// Capture the original branch (once) and move onto `issue`'s branch.
    pub async fn begin_session(
        &self,
        issue: &Issue,
        state: &mut BranchState,
    ) -> Result<String, BranchError> {
        if state.original_branch.is_none() {
            let original = self
                .vcs
                .current_branch()
                .await
                .map_err(|_| BranchError::NoCurrentBranch)?;
            tracing::info!(branch = %original, "Recorded original branch");
            state.original_branch = Some(original);
        }
        self.switch_for(issue, state).await
    }

    /// Check out (creating if needed) the branch for `issue`, stashing any
    /// uncommitted changes first. No-op when already there.
    pub async fn switch_for(
        &self,
        issue: &Issue,
        state: &mut BranchState,
    ) -> Result<String, BranchError> {
        let name = self.branch_name_for(issue);
        let current = self
            .vcs
            .current_branch()
            .await
            .map_err(|e| BranchError::Status(e.to_string()))?;

        if current != name {
            let dirty = self
                .vcs
                .has_changes()
                .await
                .map_err(|e| BranchError::Status(e.to_string()))?;
            if dirty {
                let message = format!("foreman: auto-stash before {}", name);
                self.vcs
                    .stash(&message)
                    .await
                    .map_err(|e| BranchError::Stash(e.to_string()))?;
                tracing::info!("Stashed uncommitted changes on {}", current);
            }

            let exists = self
                .vcs
                .branch_exists(&name)
                .await
                .map_err(|e| BranchError::Status(e.to_string()))?;
            if !exists {
                self.vcs
                    .create_branch(&name)
                    .await
                    .map_err(|e| BranchError::Create {
                        branch: name.clone(),
                        message: e.to_string(),
                    })?;
            }
            self.vcs
                .checkout(&name)
                .await
                .map_err(|e| BranchError::Checkout {
                    branch: name.clone(),
                    message: e.to_string(),
                })?;
            tracing::info!(branch = %name, created = !exists, "Switched branch");
        }

        state
            .epic_branches
            .insert(branch_key(issue).to_string(), name.clone());
        state.current_branch = Some(name.clone());
        Ok(name)
    }

    /// Warning text when HEAD no longer matches the recorded branch.
    pub async fn check_resume(&self, state: &BranchState) -> Option<String> {
        let recorded = state.current_branch.as_ref()?;
        match self.vcs.current_branch().await {
            Ok(actual) if &actual == recorded => None,
            Ok(actual) => Some(format!(
                "Session was on branch {} but HEAD is {}; continuing on {}",
                recorded, actual, actual
            )),
            Err(e) => Some(format!("Could not read current branch: {}", e)),
        }
    }

    /// Push and open PRs for owned branches (when `create_pr`), then return
    /// to the original branch. `titles` maps branch keys to issue titles.
    pub async fn finish_session(
        &self,
        state: &mut BranchState,
        create_pr: bool,
        titles: &HashMap<String, String>,
    ) -> Result<FinishReport, BranchError> {
        let mut report = FinishReport::default();

        if create_pr {
            let mut seen = Vec::new();
            for (key, branch) in &state.epic_branches {
                if !self.is_owned(branch) || seen.contains(branch) {
                    continue;
                }
                seen.push(branch.clone());

                if let Err(e) = self.vcs.push(branch).await {
                    report
                        .warnings
                        .push(format!("Failed to push {}: {}", branch, e));
                    continue;
                }
                report.pushed.push(branch.clone());

                let title = titles
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| format!("foreman: {}", branch));
                let body = format!(
                    "## Summary\n\nAutomated implementation for: {}\n\nBranch `{}` was produced by foreman.",
                    key, branch
                );
                let args: Vec<String> = vec![
                    "pr".into(),
                    "create".into(),
                    "--head".into(),
                    branch.clone(),
                    "--title".into(),
                    title,
                    "--body".into(),
                    body,
                ];
                match self.vcs.run_command("gh", &args).await {
                    Ok(url) => report.pull_requests.push(url),
                    Err(e) => report
                        .warnings
                        .push(format!("Failed to create PR for {}: {}", branch, e)),
                }
            }
        }

        if let Some(original) = state.original_branch.clone() {
            let current = self.vcs.current_branch().await.ok();
            if current.as_deref() != Some(original.as_str()) {
                self.vcs
                    .checkout(&original)
                    .await
                    .map_err(|e| BranchError::Checkout {
                        branch: original.clone(),
                        message: e.to_string(),
                    })?;
            }
            state.current_branch = Some(original.clone());
            report.returned_to = Some(original);
        }
        Ok(report)
    }
}
