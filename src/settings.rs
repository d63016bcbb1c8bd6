//! Run settings: the value object that steers every worker's pipeline.
//!
//! Settings are immutable for the duration of a run except through an explicit
//! update on the orchestrator. They are persisted inside every session snapshot
//! so a resumed run keeps the knobs it was started with.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};

/// Which AI audit passes run after self-review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditSelection {
    #[serde(default)]
    pub security: bool,
    #[serde(default)]
    pub performance: bool,
    #[serde(default)]
    pub quality: bool,
    #[serde(default)]
    pub accessibility: bool,
}

impl AuditSelection {
    pub fn all() -> Self {
        Self {
            security: true,
            performance: true,
            quality: true,
            accessibility: true,
        }
    }

    pub fn any_enabled(&self) -> bool {
        self.security || self.performance || self.quality || self.accessibility
    }
}

/// Which verification stages to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSelection {
    pub lint: bool,
    pub tests: bool,
    pub build: bool,
}

impl StageSelection {
    pub fn any(&self) -> bool {
        self.lint || self.tests || self.build
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Size of the worker pool
    #[serde(default = "default_max_concurrent_issues")]
    pub max_concurrent_issues: usize,
    /// Commit automatically once an issue passes verification
    #[serde(default = "default_true")]
    pub auto_commit: bool,
    #[serde(default = "default_true")]
    pub run_lint: bool,
    #[serde(default = "default_true")]
    pub run_tests: bool,
    #[serde(default = "default_true")]
    pub run_build: bool,
    /// Fix attempts after the first failed verification
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Park verified issues for explicit human approval
    #[serde(default)]
    pub require_human_review: bool,
    /// Downgrade failures whose output never mentions a touched file
    #[serde(default = "default_true")]
    pub ignore_unrelated_failures: bool,
    #[serde(default)]
    pub audits: AuditSelection,
    #[serde(default)]
    pub use_feature_branches: bool,
    #[serde(default)]
    pub auto_create_pr: bool,
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

fn default_max_concurrent_issues() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_branch_prefix() -> String {
    "foreman".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_concurrent_issues: default_max_concurrent_issues(),
            auto_commit: true,
            run_lint: true,
            run_tests: true,
            run_build: true,
            max_retries: default_max_retries(),
            require_human_review: false,
            ignore_unrelated_failures: true,
            audits: AuditSelection::default(),
            use_feature_branches: false,
            auto_create_pr: false,
            branch_prefix: default_branch_prefix(),
        }
    }
}

impl Settings {
    pub fn stages(&self) -> StageSelection {
        StageSelection {
            lint: self.run_lint,
            tests: self.run_tests,
            build: self.run_build,
        }
    }

    /// File coordination is only engaged when more than one worker runs.
    pub fn coordination_enabled(&self) -> bool {
        self.max_concurrent_issues > 1
    }

    /// Commits happen in-pipeline only when no human gate follows.
    pub fn commits_in_pipeline(&self) -> bool {
        self.auto_commit && !self.require_human_review
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_issues == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "max_concurrent_issues".into(),
                message: "must be at least 1".into(),
            });
        }
        let prefix = self.branch_prefix.trim_matches('/');
        if self.use_feature_branches && (prefix.is_empty() || prefix.contains(char::is_whitespace))
        {
            return Err(ConfigError::InvalidSetting {
                field: "branch_prefix".into(),
                message: format!("'{}' is not a usable branch prefix", self.branch_prefix),
            });
        }
        Ok(())
    }

    pub fn with_max_concurrent_issues(mut self, n: usize) -> Self {
        self.max_concurrent_issues = n;
        self
    }

    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn with_human_review(mut self, required: bool) -> Self {
        self.require_human_review = required;
        self
    }

    pub fn with_audits(mut self, audits: AuditSelection) -> Self {
        self.audits = audits;
        self
    }

    pub fn with_feature_branches(mut self, enabled: bool, auto_pr: bool) -> Self {
        self.use_feature_branches = enabled;
        self.auto_create_pr = auto_pr;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.max_concurrent_issues, 1);
        assert_eq!(s.max_retries, 3);
        assert!(s.auto_commit);
        assert!(s.ignore_unrelated_failures);
        assert!(!s.audits.any_enabled());
        assert!(!s.coordination_enabled());
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let s = Settings::default().with_max_concurrent_issues(0);
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_issues"));
    }

    #[test]
    fn test_blank_branch_prefix_rejected_when_branches_enabled() {
        let mut s = Settings::default().with_feature_branches(true, false);
        s.branch_prefix = "/".into();
        assert!(s.validate().is_err());
        s.use_feature_branches = false;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_commits_in_pipeline() {
        let s = Settings::default();
        assert!(s.commits_in_pipeline());
        assert!(!s.clone().with_human_review(true).commits_in_pipeline());
        let mut no_commit = s;
        no_commit.auto_commit = false;
        assert!(!no_commit.commits_in_pipeline());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let s: Settings = toml::from_str("max_concurrent_issues = 3\n[audits]\nsecurity = true\n")
            .unwrap();
        assert_eq!(s.max_concurrent_issues, 3);
        assert!(s.audits.security);
        assert!(!s.audits.quality);
        assert!(s.run_tests);
        assert_eq!(s.branch_prefix, "foreman");
    }
}
