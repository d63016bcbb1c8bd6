//! Configuration for Foreman, read from `.foreman/foreman.toml`.
//!
//! Settings are layered: file → environment → CLI flags. The file is optional;
//! every section has defaults so a bare project runs with the Claude provider
//! and auto-detected verification commands.
//!
//! # Configuration File Format
//!
//! ```toml
//! [agent]
//! provider = "claude"
//! command = "claude"
//! permission_mode = "bypassPermissions"
//! safe_mode = false
//!
//! [settings]
//! max_concurrent_issues = 2
//! max_retries = 3
//! require_human_review = true
//!
//! [settings.audits]
//! security = true
//!
//! [verification]
//! lint = "cargo clippy -- -D warnings"
//! test = "cargo test"
//!
//! [tracker]
//! command = "bd"
//! ```

use crate::agent::ProviderKind;
use crate::errors::ConfigError;
use crate::settings::Settings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The name of the foreman state directory inside a project.
pub const FOREMAN_DIR: &str = ".foreman";

/// Agent CLI selection and launch policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Provider name: claude, codex or gemini
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Override for the CLI executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Permission policy handed to the agent CLI
    #[serde(default = "default_permission_mode")]
    pub permission_mode: String,
    /// Restrict the agent to non-destructive operation
    #[serde(default)]
    pub safe_mode: bool,
}

fn default_provider() -> String {
    "claude".to_string()
}

fn default_permission_mode() -> String {
    "bypassPermissions".to_string()
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            command: None,
            permission_mode: default_permission_mode(),
            safe_mode: false,
        }
    }
}

/// Explicit verification commands. Missing entries are auto-detected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerSection {
    #[serde(default = "default_tracker_command")]
    pub command: String,
}

fn default_tracker_command() -> String {
    "bd".to_string()
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            command: default_tracker_command(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinationSection {
    /// Command that launches the lock broker; defaults to `foreman broker`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_command: Option<String>,
}

/// The complete foreman.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForemanToml {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub verification: VerificationSection,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub coordination: CoordinationSection,
}

impl ForemanToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).map_err(|e| {
            ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `.foreman/foreman.toml`, falling back to defaults when absent.
    pub fn load_or_default(foreman_dir: &Path) -> Result<Self> {
        let path = foreman_dir.join("foreman.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize foreman.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Provider from `FOREMAN_PROVIDER` or the file. Unknown names are an error.
    pub fn provider(&self) -> Result<ProviderKind, ConfigError> {
        let name = std::env::var("FOREMAN_PROVIDER").unwrap_or_else(|_| self.agent.provider.clone());
        name.parse()
    }

    /// Executable for the agent CLI: file override, then `FOREMAN_AGENT_CMD`,
    /// then the provider's conventional binary name.
    pub fn agent_command(&self, provider: ProviderKind) -> String {
        self.agent
            .command
            .clone()
            .or_else(|| std::env::var("FOREMAN_AGENT_CMD").ok())
            .unwrap_or_else(|| provider.default_command().to_string())
    }
}

/// Keep the state directory out of the user's history, stashes and status.
pub fn ensure_gitignore(foreman_dir: &Path) -> Result<()> {
    let path = foreman_dir.join(".gitignore");
    if !path.exists() {
        std::fs::write(&path, "*\n")
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Runtime paths plus the parsed configuration file.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub foreman_dir: PathBuf,
    pub session_file: PathBuf,
    pub silo_dir: PathBuf,
    pub audit_dir: PathBuf,
    pub log_dir: PathBuf,
    pub toml: ForemanToml,
}

impl Config {
    pub fn new(project_dir: &Path) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let foreman_dir = project_dir.join(FOREMAN_DIR);
        let toml = ForemanToml::load_or_default(&foreman_dir)?;

        Ok(Self {
            session_file: foreman_dir.join("session.json"),
            silo_dir: foreman_dir.join("silo"),
            audit_dir: foreman_dir.join("audits"),
            log_dir: foreman_dir.join("logs"),
            foreman_dir,
            project_dir,
            toml,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.foreman_dir, &self.silo_dir, &self.audit_dir, &self.log_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }
        ensure_gitignore(&self.foreman_dir)
    }

    pub fn is_initialized(project_dir: &Path) -> bool {
        project_dir.join(FOREMAN_DIR).is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_full_config() {
        let cfg = ForemanToml::parse(
            r#"
[agent]
provider = "codex"
safe_mode = true

[settings]
max_concurrent_issues = 2
require_human_review = true

[settings.audits]
security = true

[verification]
test = "npm test"

[tracker]
command = "beads"
"#,
        )
        .unwrap();

        assert_eq!(cfg.agent.provider, "codex");
        assert!(cfg.agent.safe_mode);
        assert_eq!(cfg.agent.permission_mode, "bypassPermissions");
        assert_eq!(cfg.settings.max_concurrent_issues, 2);
        assert!(cfg.settings.require_human_review);
        assert!(cfg.settings.audits.security);
        assert_eq!(cfg.verification.test.as_deref(), Some("npm test"));
        assert!(cfg.verification.lint.is_none());
        assert_eq!(cfg.tracker.command, "beads");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = ForemanToml::parse("").unwrap();
        assert_eq!(cfg.agent.provider, "claude");
        assert_eq!(cfg.tracker.command, "bd");
        assert_eq!(cfg.settings, Settings::default());
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let mut cfg = ForemanToml::default();
        cfg.agent.provider = "llama".into();
        // Only meaningful when the env override is not set in the test environment.
        if std::env::var("FOREMAN_PROVIDER").is_err() {
            assert!(matches!(
                cfg.provider(),
                Err(ConfigError::UnknownProvider(name)) if name == "llama"
            ));
        }
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreman.toml");
        let mut cfg = ForemanToml::default();
        cfg.settings.max_retries = 5;
        cfg.verification.build = Some("make".into());
        cfg.save(&path).unwrap();

        let loaded = ForemanToml::load(&path).unwrap();
        assert_eq!(loaded.settings.max_retries, 5);
        assert_eq!(loaded.verification.build.as_deref(), Some("make"));
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreman.toml");
        std::fs::write(&path, "[settings\nbroken").unwrap();
        let err = ForemanToml::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("foreman.toml"));
    }

    #[test]
    fn test_config_paths_live_under_foreman_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path()).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert_eq!(config.session_file, root.join(".foreman/session.json"));
        assert_eq!(config.silo_dir, root.join(".foreman/silo"));
        assert_eq!(config.audit_dir, root.join(".foreman/audits"));

        assert!(!Config::is_initialized(&root));
        config.ensure_directories().unwrap();
        assert!(Config::is_initialized(&root));
        assert!(config.log_dir.is_dir());
        let ignore = std::fs::read_to_string(config.foreman_dir.join(".gitignore")).unwrap();
        assert_eq!(ignore.trim(), "*");
    }
}
