//! CLI command implementations.
//!
//! | Module    | Commands handled             |
//! |-----------|------------------------------|
//! | `init`    | `Init`                       |
//! | `run`     | `Run`                        |
//! | `session` | `Status`, `Queue`, `Reset`   |
//! | `review`  | `Review`                     |
//! | `broker`  | `Broker`                     |

pub mod broker;
pub mod init;
pub mod review;
pub mod run;
pub mod session;

pub use broker::cmd_broker;
pub use init::cmd_init;
pub use review::cmd_review;
pub use run::{RunOptions, cmd_run};
pub use session::{cmd_queue, cmd_reset, cmd_status};

use anyhow::{Context, Result};
use foreman::activity::ActivityLog;
use foreman::agent::{AgentBridge, ProviderKind, build_provider};
use foreman::branch::GitRepo;
use foreman::config::Config;
use foreman::issue::CliTracker;
use foreman::orchestrator::{Orchestrator, OrchestratorDeps};
use foreman::review::FileAuditStore;
use foreman::session::FileSessionStore;
use foreman::silo::FileSiloStore;
use foreman::verify::CommandVerifier;
use foreman::verify::command::StageCommands;
use std::sync::Arc;

/// Wire the production collaborators for a project.
///
/// `provider` overrides the configured agent provider.
pub(crate) fn open_orchestrator(config: &Config, provider: Option<&str>) -> Result<Orchestrator> {
    let toml = &config.toml;
    let kind: ProviderKind = match provider {
        Some(name) => name.parse()?,
        None => toml.provider()?,
    };
    let command = toml.agent_command(kind);

    let log = Arc::new(ActivityLog::new());
    let bridge = AgentBridge::new(build_provider(kind, &command), &config.project_dir, log.clone())
        .with_permission_mode(toml.agent.permission_mode.clone(), toml.agent.safe_mode);
    let stages = StageCommands::resolve(&toml.verification, &config.project_dir);

    let deps = OrchestratorDeps {
        bridge: Arc::new(bridge),
        tracker: Arc::new(CliTracker::new(toml.tracker.command.clone(), &config.project_dir)),
        verification: Arc::new(CommandVerifier::new(&config.project_dir, stages)),
        vcs: Arc::new(GitRepo::new(&config.project_dir)),
        silo: Arc::new(FileSiloStore::new(&config.silo_dir)),
        audits: Arc::new(FileAuditStore::new(&config.audit_dir)),
        store: Arc::new(FileSessionStore::new(&config.session_file)),
    };

    let (program, args) = broker_command(config)?;
    Ok(Orchestrator::new(&config.project_dir, deps, log).with_broker_command(program, args))
}

/// Configured broker command, or this executable's `broker` subcommand.
fn broker_command(config: &Config) -> Result<(String, Vec<String>)> {
    if let Some(line) = &config.toml.coordination.broker_command {
        let mut parts = line.split_whitespace().map(str::to_string);
        if let Some(program) = parts.next() {
            return Ok((program, parts.collect()));
        }
    }
    let exe = std::env::current_exe().context("Failed to locate the foreman executable")?;
    Ok((
        exe.to_string_lossy().to_string(),
        vec!["broker".into(), "--port".into(), "0".into()],
    ))
}
