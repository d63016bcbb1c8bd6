//! Project initialization.

use anyhow::Result;
use foreman::config::{Config, ForemanToml};
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    let was_initialized = Config::is_initialized(project_dir);
    let config = Config::new(project_dir)?;
    config.ensure_directories()?;

    let toml_path = config.foreman_dir.join("foreman.toml");
    if !toml_path.exists() {
        ForemanToml::default().save(&toml_path)?;
    }

    if was_initialized {
        println!(
            "Foreman project already initialized at {}",
            config.foreman_dir.display()
        );
        println!("Directory structure verified.");
        return Ok(());
    }

    println!("Initialized foreman project at {}", config.foreman_dir.display());
    println!();
    println!("Created directory structure:");
    println!("  .foreman/");
    println!("  ├── foreman.toml  # Agent, settings, verification and tracker config");
    println!("  ├── silo/         # Per-issue context carried between attempts");
    println!("  ├── audits/       # Audit reports written by agents");
    println!("  └── logs/         # Daily trace logs");
    println!();
    println!("Next steps:");
    println!("  1. Edit .foreman/foreman.toml to pick a provider and commands");
    println!("  2. Run `foreman queue add <issue-id>` to build the backlog");
    println!("  3. Run `foreman run` to start the agent loop");
    Ok(())
}
