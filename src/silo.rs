//! SILO context: per-issue markdown notes that carry progress between
//! pipeline phases and across runs.
//!
//! The orchestrator treats stored content as opaque text. [`SiloContext`]
//! only exists to render a fresh file after the implementation phase.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

pub trait SiloStore: Send + Sync {
    fn read(&self, issue_id: &str) -> Result<Option<String>>;

    fn write(&self, issue_id: &str, content: &str) -> Result<()>;

    /// Append a section to an existing file, creating it if needed.
    fn append(&self, issue_id: &str, section: &str) -> Result<()> {
        let mut content = self.read(issue_id)?.unwrap_or_default();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        content.push_str(section);
        self.write(issue_id, &content)
    }
}

/// One markdown file per issue under `.foreman/silo/`.
pub struct FileSiloStore {
    dir: PathBuf,
}

impl FileSiloStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, issue_id: &str) -> PathBuf {
        let safe: String = issue_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.md", safe))
    }
}

impl SiloStore for FileSiloStore {
    fn read(&self, issue_id: &str) -> Result<Option<String>> {
        let path = self.path_for(issue_id);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .with_context(|| format!("Failed to read SILO file: {}", path.display()))
    }

    fn write(&self, issue_id: &str, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.path_for(issue_id);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write SILO file: {}", path.display()))
    }
}

#[derive(Debug, Clone)]
pub struct SiloContext {
    pub issue_id: String,
    pub title: String,
    pub files_modified: Vec<String>,
    pub summary: String,
    pub notes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl SiloContext {
    pub fn new(issue_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            issue_id: issue_id.into(),
            title: title.into(),
            files_modified: Vec::new(),
            summary: String::new(),
            notes: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = format!("# SILO: {} ({})\n\n", self.title, self.issue_id);
        out.push_str(&format!("_Last updated: {}_\n\n", self.updated_at.to_rfc3339()));

        out.push_str("## Files Modified\n\n");
        if self.files_modified.is_empty() {
            out.push_str("- (none recorded)\n");
        }
        for f in &self.files_modified {
            out.push_str(&format!("- `{}`\n", f));
        }

        if !self.summary.trim().is_empty() {
            out.push_str("\n## Summary\n\n");
            out.push_str(self.summary.trim());
            out.push('\n');
        }

        if !self.notes.is_empty() {
            out.push_str("\n## Notes\n\n");
            for n in &self.notes {
                out.push_str(&format!("- {}\n", n));
            }
        }
        out
    }
}

/// Section appended to a SILO file when a reviewer requests a refactor.
pub fn refactor_notes_section(notes: &str, at: DateTime<Utc>) -> String {
    format!(
        "\n## Refactor Requested ({})\n\n{}\n",
        at.to_rfc3339(),
        notes.trim()
    )
}
