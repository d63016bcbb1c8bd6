//! Terminal rendering for activity entries and session status.

pub mod icons;

use crate::activity::{LogEntry, LogLevel};
use crate::issue::IssueCache;
use crate::session::{SessionSnapshot, SessionStatus};
use console::style;
use icons::{BRANCH, CHECK, CROSS, IDLE, INFO, PAUSED, QUEUE, REVIEW, RUNNING, TOOL, WARN};

/// One line for an activity entry, without styling.
pub fn format_entry(entry: &LogEntry) -> String {
    let mut line = entry.timestamp.format("%H:%M:%S").to_string();
    if let Some(worker) = entry.worker_id {
        line.push_str(&format!(" [w{}]", worker));
    }
    if let Some(issue) = &entry.issue_id {
        line.push_str(&format!(" {}", issue));
    }
    line.push_str(&format!(" {}", entry.message));
    line
}

pub fn print_entry(entry: &LogEntry) {
    let line = format_entry(entry);
    match entry.level {
        LogLevel::Info => println!("{}{}", INFO, line),
        LogLevel::Success => println!("{}{}", CHECK, style(line).green()),
        LogLevel::Warning => println!("{}{}", WARN, style(line).yellow()),
        LogLevel::Error => eprintln!("{}{}", CROSS, style(line).red().bold()),
        LogLevel::Agent => println!("{}{}", TOOL, style(line).dim()),
    }
}

fn status_label(status: SessionStatus) -> String {
    match status {
        SessionStatus::Running => format!("{}{}", RUNNING, style("running").green().bold()),
        SessionStatus::Paused => format!("{}{}", PAUSED, style("paused").yellow().bold()),
        SessionStatus::Idle => format!("{}{}", IDLE, style("idle").dim()),
        SessionStatus::Error => format!("{}{}", CROSS, style("error").red().bold()),
    }
}

fn describe(id: &str, cache: &IssueCache) -> String {
    match cache.get(id) {
        Some(issue) if issue.title != issue.id => format!("{}  {}", id, issue.title),
        _ => id.to_string(),
    }
}

pub fn print_status(snapshot: &SessionSnapshot, cache: &IssueCache) {
    println!();
    println!("Session: {}", status_label(snapshot.status));
    println!(
        "Saved:   {}",
        style(snapshot.saved_at.format("%Y-%m-%d %H:%M:%S UTC")).dim()
    );

    if let Some(current) = &snapshot.current_issue {
        println!(
            "Working: {} ({}, retry {})",
            describe(current, cache),
            snapshot.current_phase,
            snapshot.retry_count
        );
    }
    if let Some(branch) = &snapshot.branch.current_branch {
        println!("{}Branch: {}", BRANCH, branch);
    }

    println!();
    println!("{}{} ({})", QUEUE, style("Queue").bold(), snapshot.queue.len());
    if snapshot.queue.is_empty() {
        println!("  {}", style("(empty)").dim());
    }
    for id in snapshot.queue.ids() {
        println!("  {}", describe(id, cache));
    }

    if !snapshot.human_review.is_empty() {
        println!();
        println!(
            "{}{} ({})",
            REVIEW,
            style("Awaiting review").bold(),
            snapshot.human_review.len()
        );
        for id in &snapshot.human_review {
            println!("  {}", describe(id, cache));
        }
    }

    if !snapshot.completed.is_empty() {
        println!();
        println!("{}{}", CHECK, style("Recently completed").bold());
        for id in snapshot.completed.iter() {
            println!("  {}", style(describe(id, cache)).dim());
        }
    }
    println!();
}
