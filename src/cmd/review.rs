//! Human review of issues parked after a successful pipeline.

use super::super::ReviewCommands;
use super::open_orchestrator;
use anyhow::{Result, bail};
use foreman::config::Config;
use foreman::orchestrator::ReviewDecision;
use std::path::Path;

pub async fn cmd_review(project_dir: &Path, command: Option<&ReviewCommands>) -> Result<()> {
    let config = Config::new(project_dir)?;
    config.ensure_directories()?;
    let orchestrator = open_orchestrator(&config, None)?;
    if orchestrator.restore_session().is_none() {
        println!("No session found; nothing awaiting review");
        return Ok(());
    }
    orchestrator.refresh_issues().await;

    let (issue_id, decision) = match command {
        Some(ReviewCommands::Approve { id }) => (id.clone(), ReviewDecision::Approve),
        Some(ReviewCommands::Refactor { id, notes }) => (
            id.clone(),
            ReviewDecision::Refactor {
                notes: notes.clone(),
            },
        ),
        None => {
            let pending = orchestrator.state().read(|s| {
                s.human_review
                    .iter()
                    .map(|id| (id.clone(), s.cache.title_for(id).to_string()))
                    .collect::<Vec<_>>()
            });
            if pending.is_empty() {
                println!("Nothing awaiting review");
                return Ok(());
            }
            pick_interactively(&pending)?
        }
    };

    orchestrator.complete_review(&issue_id, decision).await?;
    for entry in orchestrator.log().entries() {
        foreman::ui::print_entry(&entry);
    }
    Ok(())
}

fn pick_interactively(pending: &[(String, String)]) -> Result<(String, ReviewDecision)> {
    use dialoguer::{Input, Select, theme::ColorfulTheme};

    let theme = ColorfulTheme::default();
    let items: Vec<String> = pending
        .iter()
        .map(|(id, title)| {
            if id == title {
                id.clone()
            } else {
                format!("{}  {}", id, title)
            }
        })
        .collect();

    let picked = Select::with_theme(&theme)
        .with_prompt("Issue to review")
        .items(&items)
        .default(0)
        .interact()?;
    let issue_id = pending[picked].0.clone();

    let actions = ["Approve", "Request refactor"];
    let action = Select::with_theme(&theme)
        .with_prompt("Decision")
        .items(&actions)
        .default(0)
        .interact()?;

    let decision = match action {
        0 => ReviewDecision::Approve,
        1 => {
            let notes: String = Input::with_theme(&theme)
                .with_prompt("What should change?")
                .interact_text()?;
            ReviewDecision::Refactor { notes }
        }
        _ => bail!("Unknown review action"),
    };
    Ok((issue_id, decision))
}
