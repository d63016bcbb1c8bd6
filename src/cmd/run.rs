//! The `run` command: start or resume the agent loop in the foreground.

use super::open_orchestrator;
use anyhow::Result;
use console::style;
use foreman::config::Config;
use foreman::orchestrator::{RemoteControl, RunSummary};
use foreman::settings::AuditSelection;
use foreman::ui;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

/// Flags that override the session / file settings for this run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub workers: Option<usize>,
    pub retries: Option<u32>,
    pub review: bool,
    pub branches: bool,
    pub pr: bool,
    pub audits: bool,
    pub provider: Option<String>,
    pub control_port: Option<u16>,
    pub issues: Vec<String>,
}

pub async fn cmd_run(project_dir: &Path, opts: RunOptions) -> Result<()> {
    let config = Config::new(project_dir)?;
    config.ensure_directories()?;

    let orchestrator = Arc::new(open_orchestrator(&config, opts.provider.as_deref())?);
    let mut entries = orchestrator.log().subscribe();

    let mut settings = match orchestrator.restore_session() {
        Some(_) => orchestrator.state().settings(),
        None => config.toml.settings.clone(),
    };
    if let Some(n) = opts.workers {
        settings = settings.with_max_concurrent_issues(n);
    }
    if let Some(n) = opts.retries {
        settings = settings.with_max_retries(n);
    }
    if opts.review {
        settings = settings.with_human_review(true);
    }
    if opts.audits {
        settings = settings.with_audits(AuditSelection::all());
    }
    if opts.branches || opts.pr {
        let auto_pr = opts.pr || settings.auto_create_pr;
        settings = settings.with_feature_branches(true, auto_pr);
    }
    orchestrator.update_settings(settings)?;

    for id in &opts.issues {
        if let Err(e) = orchestrator.add_to_queue(id) {
            orchestrator.log().warning(e.to_string());
        }
    }

    let _remote = match opts.control_port {
        Some(port) => Some(RemoteControl::start(orchestrator.clone(), port).await?),
        None => None,
    };

    let mut runs = orchestrator.subscribe_runs();
    let run = orchestrator.run();
    tokio::pin!(run);
    let mut stop_sent = false;
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            entry = entries.recv() => print_received(entry),
            _ = tokio::signal::ctrl_c(), if !stop_sent => {
                stop_sent = true;
                println!();
                println!("{}", style("Stopping after the current phase...").yellow());
                orchestrator.stop();
            }
        }
    };
    while let Ok(entry) = entries.try_recv() {
        ui::print_entry(&entry);
    }

    let mut summary = result?;
    print_summary(&summary);
    // The first summary was also broadcast.
    let _ = runs.try_recv();
    if opts.control_port.is_none() {
        return Ok(());
    }

    // Stay reachable for a remote start until the session ends.
    if summary.paused {
        print_waiting();
    }
    while summary.paused {
        summary = tokio::select! {
            finished = runs.recv() => match finished {
                Ok(summary) => summary,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            },
            entry = entries.recv() => {
                print_received(entry);
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                if orchestrator.state().read(|s| s.run_active()) {
                    println!("{}", style("Stopping after the current phase...").yellow());
                    orchestrator.stop();
                    continue;
                }
                break;
            }
        };
        while let Ok(entry) = entries.try_recv() {
            ui::print_entry(&entry);
        }
        print_summary(&summary);
        if summary.paused {
            print_waiting();
        }
    }
    Ok(())
}

fn print_waiting() {
    println!("{}", style("Waiting for a remote start; Ctrl-C exits").dim());
}

fn print_received(entry: Result<foreman::activity::LogEntry, RecvError>) {
    match entry {
        Ok(entry) => ui::print_entry(&entry),
        Err(RecvError::Lagged(n)) => {
            tracing::debug!("Terminal printer skipped {} entries", n);
        }
        Err(RecvError::Closed) => {}
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    if summary.stopped {
        println!("{}", style("Run stopped").yellow().bold());
    } else if summary.paused {
        println!(
            "{}",
            style("Run paused; `foreman run` resumes it").yellow().bold()
        );
    }
    println!(
        "Completed: {}  Awaiting review: {}  Blocked: {}",
        style(summary.completed.len()).green(),
        style(summary.review.len()).cyan(),
        style(summary.blocked.len()).red()
    );
    for id in &summary.blocked {
        println!("  {} {}", style("blocked").red(), id);
    }
    for id in &summary.review {
        println!("  {} {}", style("review").cyan(), id);
    }
}
