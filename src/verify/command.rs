//! Shell-command verification runner.

use super::{RawVerification, StageResult, VerificationRunner};
use crate::config::VerificationSection;
use crate::settings::StageSelection;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Resolved shell command per stage. `None` means nothing to run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCommands {
    pub lint: Option<String>,
    pub test: Option<String>,
    pub build: Option<String>,
}

impl StageCommands {
    /// Explicit configuration first, then project-type detection.
    pub fn resolve(section: &VerificationSection, project_dir: &Path) -> Self {
        let detected = Self::detect(project_dir);
        Self {
            lint: section.lint.clone().or(detected.lint),
            test: section.test.clone().or(detected.test),
            build: section.build.clone().or(detected.build),
        }
    }

    pub fn detect(project_dir: &Path) -> Self {
        if project_dir.join("Cargo.toml").exists() {
            return Self {
                lint: Some("cargo clippy --all-targets -- -D warnings".into()),
                test: Some("cargo test".into()),
                build: Some("cargo build".into()),
            };
        }

        let package_json = project_dir.join("package.json");
        if let Ok(content) = std::fs::read_to_string(&package_json) {
            let scripts = serde_json::from_str::<serde_json::Value>(&content)
                .ok()
                .and_then(|v| v.get("scripts").cloned())
                .unwrap_or_default();
            let has = |name: &str| scripts.get(name).is_some();
            return Self {
                lint: has("lint").then(|| "npm run lint".to_string()),
                test: has("test").then(|| "npm test".to_string()),
                build: has("build").then(|| "npm run build".to_string()),
            };
        }

        Self::default()
    }
}

pub struct CommandVerifier {
    project_dir: PathBuf,
    commands: StageCommands,
}

impl CommandVerifier {
    pub fn new(project_dir: impl Into<PathBuf>, commands: StageCommands) -> Self {
        Self {
            project_dir: project_dir.into(),
            commands,
        }
    }

    async fn run_stage(&self, name: &str, enabled: bool, command: Option<&str>) -> StageResult {
        if !enabled {
            return StageResult::skipped();
        }
        let Some(command) = command else {
            return StageResult::passed(format!("No {} command configured; stage skipped", name));
        };

        tracing::info!(stage = name, "Running: {}", command);
        let output = shell(command).current_dir(&self.project_dir).output().await;

        match output {
            Ok(out) => {
                let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&out.stderr);
                if !stderr.trim().is_empty() {
                    if !text.is_empty() && !text.ends_with('\n') {
                        text.push('\n');
                    }
                    text.push_str(&stderr);
                }
                StageResult {
                    success: out.status.success(),
                    output: text,
                }
            }
            Err(e) => StageResult::failed(format!("Failed to run `{}`: {}", command, e)),
        }
    }
}

#[cfg(unix)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(not(unix))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[async_trait]
impl VerificationRunner for CommandVerifier {
    async fn run(&self, stages: StageSelection) -> RawVerification {
        let lint = self
            .run_stage("lint", stages.lint, self.commands.lint.as_deref())
            .await;
        let tests = self
            .run_stage("test", stages.tests, self.commands.test.as_deref())
            .await;
        let build = self
            .run_stage("build", stages.build, self.commands.build.as_deref())
            .await;
        RawVerification { lint, tests, build }
    }
}
