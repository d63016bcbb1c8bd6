//! Status, queue editing and reset against the persisted session.

use super::super::QueueCommands;
use super::open_orchestrator;
use anyhow::Result;
use console::style;
use foreman::config::Config;
use foreman::issue::{CliTracker, IssueCache, IssueTracker};
use foreman::session::{FileSessionStore, SessionStore};
use foreman::ui;
use std::path::Path;

pub async fn cmd_status(project_dir: &Path) -> Result<()> {
    let config = Config::new(project_dir)?;
    let store = FileSessionStore::new(&config.session_file);
    let Some(snapshot) = store.load()? else {
        println!();
        println!("No session found. Run `foreman queue add <issue-id>` or `foreman run` to start one.");
        println!();
        return Ok(());
    };

    // Titles are cosmetic; a missing tracker just shows bare ids.
    let tracker = CliTracker::new(config.toml.tracker.command.clone(), &config.project_dir);
    let cache = match tracker.list_issues().await {
        Ok(issues) => IssueCache::from_issues(issues),
        Err(e) => {
            tracing::debug!("Tracker unavailable for status: {}", e);
            IssueCache::new()
        }
    };

    ui::print_status(&snapshot, &cache);
    Ok(())
}

pub fn cmd_queue(project_dir: &Path, command: &QueueCommands) -> Result<()> {
    let config = Config::new(project_dir)?;
    config.ensure_directories()?;
    let orchestrator = open_orchestrator(&config, None)?;
    if orchestrator.restore_session().is_none() {
        orchestrator.update_settings(config.toml.settings.clone())?;
    }

    match command {
        QueueCommands::Add { ids } => {
            let mut failed = 0;
            for id in ids {
                match orchestrator.add_to_queue(id) {
                    Ok(()) => println!("{} {}", style("queued").green(), id),
                    Err(e) => {
                        eprintln!("{} {}", style("skipped").yellow(), e);
                        failed += 1;
                    }
                }
            }
            if failed == ids.len() && failed > 0 {
                anyhow::bail!("No issues were queued");
            }
        }
        QueueCommands::Remove { id } => {
            orchestrator.remove_from_queue(id)?;
            println!("{} {}", style("removed").green(), id);
        }
        QueueCommands::List => {
            let snapshot = orchestrator.state().snapshot();
            if snapshot.queue.is_empty() {
                println!("Queue is empty");
            }
            for (i, id) in snapshot.queue.ids().iter().enumerate() {
                println!("{:>3}. {}", i + 1, id);
            }
        }
        QueueCommands::Clear => {
            let cleared = orchestrator.state().mutate(|s| {
                let n = s.queue.len();
                s.queue.clear();
                n
            });
            println!("Cleared {} queued issue(s)", cleared);
        }
    }
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, force: bool) -> Result<()> {
    use dialoguer::Confirm;

    let config = Config::new(project_dir)?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will discard the queue and review list. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    FileSessionStore::new(&config.session_file).clear()?;
    println!("Reset complete");
    Ok(())
}
