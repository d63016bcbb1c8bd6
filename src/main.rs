use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cmd;

#[derive(Parser)]
#[command(name = "foreman")]
#[command(version, about = "Autonomous build orchestrator for AI coding agents")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new foreman project
    Init,
    /// Start or resume the agent loop
    Run {
        /// Issue ids to queue before starting
        issues: Vec<String>,

        /// Number of concurrent workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Fix attempts after the first verification failure
        #[arg(long)]
        retries: Option<u32>,

        /// Park finished issues for human review instead of closing them
        #[arg(long)]
        review: bool,

        /// Run every audit category after self-review
        #[arg(long)]
        audit: bool,

        /// Work on per-epic feature branches
        #[arg(long)]
        branches: bool,

        /// Open a pull request for each feature branch at the end (implies --branches)
        #[arg(long)]
        pr: bool,

        /// Agent provider: claude, codex or gemini
        #[arg(long)]
        provider: Option<String>,

        /// Serve the remote control endpoint on this port
        #[arg(long)]
        control_port: Option<u16>,
    },
    /// Show the persisted session
    Status,
    /// Edit the backlog
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Approve or send back issues awaiting human review
    Review {
        #[command(subcommand)]
        command: Option<ReviewCommands>,
    },
    /// Run the advisory file-lock broker
    Broker {
        /// Port to listen on (0 picks a free port)
        #[arg(short, long, default_value = "0")]
        port: u16,
    },
    /// Discard the persisted session
    Reset {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Clone)]
pub enum QueueCommands {
    /// Append issues to the queue
    Add {
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Remove an issue from the queue
    Remove { id: String },
    /// List queued issues in order
    List,
    /// Empty the queue
    Clear,
}

#[derive(Subcommand, Clone)]
pub enum ReviewCommands {
    /// Accept the work and close the issue
    Approve { id: String },
    /// Send the issue back with notes for another pass
    Refactor {
        id: String,
        /// What should change
        #[arg(short, long)]
        notes: String,
    },
}

/// Console diagnostics plus a daily file under `.foreman/logs` once initialized.
///
/// Activity entries are printed by the terminal UI, so the console layer
/// leaves out their `tracing` mirror.
fn init_tracing(
    verbose: bool,
    project_dir: &Path,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("foreman=debug,foreman::activity=off")
        } else {
            EnvFilter::new("foreman=warn,foreman::activity=off")
        }
    });
    let console = fmt::layer()
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let log_dir = project_dir.join(foreman::config::FOREMAN_DIR).join("logs");
    if !log_dir.is_dir() {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, "foreman.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(EnvFilter::new("foreman=debug"));
    tracing_subscriber::registry().with(console).with(file).init();
    Some(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _guard = init_tracing(cli.verbose, &project_dir);

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::Run {
            issues,
            workers,
            retries,
            review,
            audit,
            branches,
            pr,
            provider,
            control_port,
        } => {
            let opts = cmd::RunOptions {
                workers: *workers,
                retries: *retries,
                review: *review,
                branches: *branches,
                pr: *pr,
                audits: *audit,
                provider: provider.clone(),
                control_port: *control_port,
                issues: issues.clone(),
            };
            cmd::cmd_run(&project_dir, opts).await?;
        }
        Commands::Status => cmd::cmd_status(&project_dir).await?,
        Commands::Queue { command } => cmd::cmd_queue(&project_dir, command)?,
        Commands::Review { command } => cmd::cmd_review(&project_dir, command.as_ref()).await?,
        Commands::Broker { port } => cmd::cmd_broker(*port).await?,
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, *force)?,
    }

    Ok(())
}
