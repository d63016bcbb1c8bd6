//! Activity log: the operator-facing record of what the orchestrator did.
//!
//! The log is append-only and keeps the most recent [`MAX_ENTRIES`] entries.
//! Every entry is mirrored to `tracing` and broadcast to subscribers (the
//! terminal printer, the remote-control endpoint) as it is recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Entries retained in memory before the oldest is evicted.
pub const MAX_ENTRIES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    /// Tool activity reported by an agent session
    Agent,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Agent => "agent",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            worker_id: None,
            issue_id: None,
        }
    }

    pub fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_issue(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }
}

pub struct ActivityLog {
    entries: Mutex<VecDeque<LogEntry>>,
    tx: broadcast::Sender<LogEntry>,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityLog {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(MAX_ENTRIES)),
            tx,
        }
    }

    pub fn record(&self, entry: LogEntry) {
        let scope = match (&entry.worker_id, &entry.issue_id) {
            (Some(w), Some(i)) => format!("[worker {} {}] ", w, i),
            (Some(w), None) => format!("[worker {}] ", w),
            (None, Some(i)) => format!("[{}] ", i),
            (None, None) => String::new(),
        };
        match entry.level {
            LogLevel::Error => tracing::error!("{}{}", scope, entry.message),
            LogLevel::Warning => tracing::warn!("{}{}", scope, entry.message),
            LogLevel::Agent => tracing::debug!("{}{}", scope, entry.message),
            LogLevel::Info | LogLevel::Success => tracing::info!("{}{}", scope, entry.message),
        }

        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            if entries.len() >= MAX_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        // No receivers is fine; the log is still retained.
        let _ = self.tx.send(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Info, message));
    }

    pub fn success(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Success, message));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Warning, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogEntry::new(LogLevel::Error, message));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    /// Snapshot of retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn count_where(&self, pred: impl Fn(&LogEntry) -> bool) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}
