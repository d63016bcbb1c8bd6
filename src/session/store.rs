//! Session persistence boundary.

use super::SessionSnapshot;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Save/load/clear for session snapshots. Implementations must be cheap
/// enough to call on every state transition.
pub trait SessionStore: Send + Sync {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    fn load(&self) -> Result<Option<SessionSnapshot>>;

    fn clear(&self) -> Result<()>;
}

/// Stores the snapshot as pretty JSON at a fixed path.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content =
            serde_json::to_string_pretty(snapshot).context("Failed to serialize session")?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<SessionSnapshot>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::settings::{AuditSelection, Settings};
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip_restores_lists_and_settings() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join(".foreman/session.json"));

        let mut snap = SessionSnapshot {
            status: SessionStatus::Running,
            settings: Settings::default()
                .with_max_concurrent_issues(3)
                .with_audits(AuditSelection::all()),
            ..Default::default()
        };
        snap.queue.add("bd-3");
        snap.queue.add("bd-1");
        snap.completed.push("bd-0");
        snap.human_review.push("bd-2".into());
        snap.branch.epic_branches.insert("bd-9".into(), "foreman/epic-bd-9".into());

        store.save(&snap).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snap);

        // Saving the loaded snapshot again produces identical bytes.
        let first = std::fs::read(store.path()).unwrap();
        store.save(&loaded).unwrap();
        assert_eq!(std::fs::read(store.path()).unwrap(), first);
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));
        store.save(&SessionSnapshot::default()).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileSessionStore::new(&path);
        assert!(store.load().is_err());
    }
}
