//! Audit artifacts written by agent audit passes.
//!
//! An audit delegation asks the agent to run one pass per enabled category
//! and write `.foreman/audits/<issue>/<category>.json`. The pipeline reads
//! those files back to decide whether an audit-fix loop is needed.

pub mod findings;

pub use findings::{AuditFinding, AuditReport, FindingSeverity};

use crate::settings::AuditSelection;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Security,
    Performance,
    Quality,
    Accessibility,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 4] = [
        AuditCategory::Security,
        AuditCategory::Performance,
        AuditCategory::Quality,
        AuditCategory::Accessibility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::Security => "security",
            AuditCategory::Performance => "performance",
            AuditCategory::Quality => "quality",
            AuditCategory::Accessibility => "accessibility",
        }
    }

    /// What the audit pass for this category looks for.
    pub fn focus(&self) -> &'static str {
        match self {
            AuditCategory::Security => {
                "injection, authentication and authorization gaps, secrets in code, unsafe input handling"
            }
            AuditCategory::Performance => {
                "algorithmic complexity, needless allocation or IO in hot paths, N+1 queries, blocking calls in async code"
            }
            AuditCategory::Quality => {
                "error handling, dead code, duplication, naming, missing tests for new behavior"
            }
            AuditCategory::Accessibility => {
                "semantic markup, keyboard navigation, labels and ARIA attributes, color contrast"
            }
        }
    }

    /// Categories enabled in the given selection, in fixed order.
    pub fn enabled(selection: &AuditSelection) -> Vec<AuditCategory> {
        Self::ALL
            .into_iter()
            .filter(|c| match c {
                AuditCategory::Security => selection.security,
                AuditCategory::Performance => selection.performance,
                AuditCategory::Quality => selection.quality,
                AuditCategory::Accessibility => selection.accessibility,
            })
            .collect()
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read/clear access to audit artifacts.
pub trait AuditStore: Send + Sync {
    /// Where the agent must write the report for this issue and category.
    fn report_path(&self, issue_id: &str, category: AuditCategory) -> PathBuf;

    /// Reports present for the given categories. Missing files are skipped.
    fn read_reports(&self, issue_id: &str, categories: &[AuditCategory]) -> Result<Vec<AuditReport>>;

    /// Remove stale reports before a new audit run.
    fn clear(&self, issue_id: &str) -> Result<()>;
}

pub struct FileAuditStore {
    dir: PathBuf,
}

impl FileAuditStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn issue_dir(&self, issue_id: &str) -> PathBuf {
        self.dir.join(issue_id.replace(['/', '\\'], "_"))
    }
}

impl AuditStore for FileAuditStore {
    fn report_path(&self, issue_id: &str, category: AuditCategory) -> PathBuf {
        self.issue_dir(issue_id).join(format!("{}.json", category))
    }

    fn read_reports(&self, issue_id: &str, categories: &[AuditCategory]) -> Result<Vec<AuditReport>> {
        let mut reports = Vec::new();
        for &category in categories {
            let path = self.report_path(issue_id, category);
            if !path.exists() {
                continue;
            }
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read audit report: {}", path.display()))?;
            let json = crate::util::extract_json_value(&content).unwrap_or(&content);
            let report: AuditReport = serde_json::from_str(json)
                .with_context(|| format!("Failed to parse audit report: {}", path.display()))?;
            reports.push(report);
        }
        Ok(reports)
    }

    fn clear(&self, issue_id: &str) -> Result<()> {
        let dir = self.issue_dir(issue_id);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .with_context(|| format!("Failed to clear {}", dir.display()))?;
        }
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))
    }
}
