//! Verification runner boundary and failure attribution.
//!
//! [`VerificationRunner`] runs lint/test/build and reports raw results.
//! [`Verifier`] applies the attribution policy on top: when unrelated-failure
//! suppression is on, a failing stage whose output never mentions a file the
//! worker touched is treated as a pre-existing failure and downgraded to
//! success.

pub mod command;

pub use command::CommandVerifier;

use crate::settings::{Settings, StageSelection};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub success: bool,
    pub output: String,
}

impl StageResult {
    pub fn passed(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }

    /// Result for a stage that was not requested.
    pub fn skipped() -> Self {
        Self::passed("")
    }
}

/// Stage results exactly as the tools reported them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawVerification {
    pub lint: StageResult,
    pub tests: StageResult,
    pub build: StageResult,
}

impl RawVerification {
    pub fn passing() -> Self {
        Self {
            lint: StageResult::skipped(),
            tests: StageResult::skipped(),
            build: StageResult::skipped(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lint,
    Tests,
    Build,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Lint => "lint",
            Stage::Tests => "tests",
            Stage::Build => "build",
        }
    }
}

/// Verification results after attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    pub success: bool,
    pub lint: StageResult,
    pub tests: StageResult,
    pub build: StageResult,
    /// Stages that failed but were attributed to unrelated code
    pub downgraded: Vec<Stage>,
}

impl VerificationReport {
    fn stages(&self) -> [(Stage, &StageResult); 3] {
        [
            (Stage::Lint, &self.lint),
            (Stage::Tests, &self.tests),
            (Stage::Build, &self.build),
        ]
    }

    pub fn failed_stages(&self) -> Vec<Stage> {
        self.stages()
            .into_iter()
            .filter(|(_, r)| !r.success)
            .map(|(s, _)| s)
            .collect()
    }

    /// Combined error report for a fix prompt, one section per failed stage.
    pub fn error_report(&self, max_chars_per_stage: usize) -> String {
        let mut out = String::new();
        for (stage, result) in self.stages() {
            if result.success {
                continue;
            }
            out.push_str(&format!("## {} failed\n\n```\n", stage.as_str()));
            out.push_str(crate::util::tail_chars(result.output.trim(), max_chars_per_stage));
            out.push_str("\n```\n\n");
        }
        out
    }
}

#[async_trait]
pub trait VerificationRunner: Send + Sync {
    async fn run(&self, stages: StageSelection) -> RawVerification;
}

/// Whether `output` mentions any touched file by basename, relative path,
/// or absolute path under `project_dir`.
pub fn output_mentions_files(output: &str, files: &BTreeSet<String>, project_dir: &Path) -> bool {
    files.iter().any(|f| {
        let path = Path::new(f);
        let basename = path.file_name().map(|n| n.to_string_lossy().into_owned());
        let absolute = if path.is_absolute() {
            f.clone()
        } else {
            project_dir.join(path).to_string_lossy().into_owned()
        };
        output.contains(f.as_str())
            || output.contains(&absolute)
            || basename.is_some_and(|b| !b.is_empty() && output.contains(&b))
    })
}

/// Apply the failure-attribution policy to raw results.
pub fn attribute(
    raw: RawVerification,
    files: &BTreeSet<String>,
    project_dir: &Path,
    ignore_unrelated: bool,
) -> VerificationReport {
    let mut downgraded = Vec::new();
    let mut adjust = |stage: Stage, mut result: StageResult| {
        if !result.success
            && ignore_unrelated
            && !files.is_empty()
            && !output_mentions_files(&result.output, files, project_dir)
        {
            result.success = true;
            downgraded.push(stage);
        }
        result
    };
    let lint = adjust(Stage::Lint, raw.lint);
    let tests = adjust(Stage::Tests, raw.tests);
    let build = adjust(Stage::Build, raw.build);

    VerificationReport {
        success: lint.success && tests.success && build.success,
        lint,
        tests,
        build,
        downgraded,
    }
}

/// Runs verification and applies attribution for one project.
pub struct Verifier {
    runner: Arc<dyn VerificationRunner>,
    project_dir: std::path::PathBuf,
}

impl Verifier {
    pub fn new(runner: Arc<dyn VerificationRunner>, project_dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            runner,
            project_dir: project_dir.into(),
        }
    }

    pub async fn run_verification(
        &self,
        files_modified: &BTreeSet<String>,
        settings: &Settings,
    ) -> VerificationReport {
        let raw = self.runner.run(settings.stages()).await;
        attribute(
            raw,
            files_modified,
            &self.project_dir,
            settings.ignore_unrelated_failures,
        )
    }
}
