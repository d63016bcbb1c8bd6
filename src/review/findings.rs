//! Audit finding types.
//!
//! An audit pass writes one [`AuditReport`] per category. The pipeline only
//! cares whether any finding is *blocking*: severity error or warning and not
//! yet marked resolved by a fix pass.
//!
//! ## Example
//!
//! ```
//! use foreman::review::findings::{AuditFinding, AuditReport, FindingSeverity};
//! use foreman::review::AuditCategory;
//!
//! let report = AuditReport::new(AuditCategory::Security).add_finding(
//!     AuditFinding::new(FindingSeverity::Error, "src/db.rs", "SQL built by string concat")
//!         .with_line(42),
//! );
//! assert_eq!(report.blocking().count(), 1);
//! ```

use super::AuditCategory;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity level for individual findings, most critical first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum FindingSeverity {
    Error,
    #[default]
    Warning,
    Info,
    Note,
}

impl FindingSeverity {
    /// Error and warning findings must be fixed before an issue proceeds.
    pub fn is_actionable(&self) -> bool {
        matches!(self, Self::Error | Self::Warning)
    }
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Note => "note",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditFinding {
    #[serde(default)]
    pub severity: FindingSeverity,
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    /// Set by the agent once a fix pass has addressed the finding
    #[serde(default)]
    pub resolved: bool,
}

impl AuditFinding {
    pub fn new(severity: FindingSeverity, file: impl Into<String>, issue: impl Into<String>) -> Self {
        Self {
            severity,
            file: file.into(),
            line: None,
            issue: issue.into(),
            suggestion: None,
            resolved: false,
        }
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity.is_actionable() && !self.resolved
    }

    /// `file:line` when a line is known.
    pub fn location(&self) -> String {
        match self.line {
            Some(line) => format!("{}:{}", self.file, line),
            None => self.file.clone(),
        }
    }
}

/// All findings from one audit category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub category: AuditCategory,
    #[serde(default)]
    pub findings: Vec<AuditFinding>,
}

impl AuditReport {
    pub fn new(category: AuditCategory) -> Self {
        Self {
            category,
            findings: Vec::new(),
        }
    }

    pub fn add_finding(mut self, finding: AuditFinding) -> Self {
        self.findings.push(finding);
        self
    }

    pub fn blocking(&self) -> impl Iterator<Item = &AuditFinding> {
        self.findings.iter().filter(|f| f.is_blocking())
    }
}

/// Render blocking findings across reports as a bullet list for a fix prompt.
pub fn format_blocking(reports: &[AuditReport]) -> String {
    let mut out = String::new();
    for report in reports {
        for f in report.blocking() {
            out.push_str(&format!(
                "- [{}] [{}] {}: {}",
                report.category, f.severity, f.location(), f.issue
            ));
            if let Some(s) = &f.suggestion {
                out.push_str(&format!(" (suggestion: {})", s));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_requires_actionable_and_unresolved() {
        let mut f = AuditFinding::new(FindingSeverity::Warning, "a.rs", "x");
        assert!(f.is_blocking());
        f.resolved = true;
        assert!(!f.is_blocking());
        assert!(!AuditFinding::new(FindingSeverity::Info, "a.rs", "x").is_blocking());
        assert!(!AuditFinding::new(FindingSeverity::Note, "a.rs", "x").is_blocking());
    }

    #[test]
    fn test_parse_agent_written_report() {
        let json = r#"{
            "category": "performance",
            "findings": [
                {"severity": "error", "file": "src/loop.rs", "line": 10, "issue": "N+1 query"},
                {"severity": "info", "issue": "consider caching", "resolved": false}
            ]
        }"#;
        let report: AuditReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.category, AuditCategory::Performance);
        assert_eq!(report.findings.len(), 2);
        assert_eq!(report.blocking().count(), 1);
        assert_eq!(report.findings[1].file, "");
    }

    #[test]
    fn test_format_blocking() {
        let report = AuditReport::new(AuditCategory::Security)
            .add_finding(
                AuditFinding::new(FindingSeverity::Error, "src/auth.rs", "token logged")
                    .with_line(7)
                    .with_suggestion("redact"),
            )
            .add_finding(AuditFinding::new(FindingSeverity::Note, "src/auth.rs", "fine"));
        let text = format_blocking(&[report]);
        assert_eq!(
            text,
            "- [security] [error] src/auth.rs:7: token logged (suggestion: redact)\n"
        );
    }

    #[test]
    fn test_severity_ordering() {
        assert!(FindingSeverity::Error < FindingSeverity::Warning);
        assert!(FindingSeverity::Info < FindingSeverity::Note);
    }
}
