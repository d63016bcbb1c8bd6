//! Agent session bridge: one awaitable delegation per agent session.
//!
//! A delegation subscribes to the provider's event stream, starts a session,
//! sends the prompt, and waits for the terminal result under a hard
//! wall-clock timeout. Resolution happens exactly once: the stream listener,
//! a start failure, and the timeout all race to complete the same one-shot
//! channel through [`Resolver`], and only the first caller wins.

use super::{AgentEvent, AgentProvider, StartOptions, describe_tool, is_file_modifying_tool, tool_file_path};
use crate::activity::{ActivityLog, LogEntry, LogLevel};
use crate::errors::DelegationError;
use chrono::Utc;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};

/// Implementation and fix delegations.
pub const IMPLEMENT_TIMEOUT: Duration = Duration::from_secs(600);
pub const SELF_REVIEW_TIMEOUT: Duration = Duration::from_secs(300);
pub const AUDIT_TIMEOUT: Duration = Duration::from_secs(480);

/// Files modified by agent tools, shared between the bridge and a worker.
pub type TouchedFiles = Arc<Mutex<BTreeSet<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationKind {
    Implement,
    SelfReview,
    Audit,
    AuditFix,
    Fix,
}

impl DelegationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationKind::Implement => "implement",
            DelegationKind::SelfReview => "self-review",
            DelegationKind::Audit => "audit",
            DelegationKind::AuditFix => "audit-fix",
            DelegationKind::Fix => "fix",
        }
    }
}

impl fmt::Display for DelegationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelegationTimeouts {
    pub implement: Duration,
    pub self_review: Duration,
    pub audit: Duration,
}

impl Default for DelegationTimeouts {
    fn default() -> Self {
        Self {
            implement: IMPLEMENT_TIMEOUT,
            self_review: SELF_REVIEW_TIMEOUT,
            audit: AUDIT_TIMEOUT,
        }
    }
}

impl DelegationTimeouts {
    /// The same limit for every kind.
    pub fn uniform(limit: Duration) -> Self {
        Self {
            implement: limit,
            self_review: limit,
            audit: limit,
        }
    }

    pub fn for_kind(&self, kind: DelegationKind) -> Duration {
        match kind {
            DelegationKind::Implement | DelegationKind::Fix | DelegationKind::AuditFix => {
                self.implement
            }
            DelegationKind::SelfReview => self.self_review,
            DelegationKind::Audit => self.audit,
        }
    }
}

/// Successful delegation.
#[derive(Debug, Clone, PartialEq)]
pub struct DelegationOutcome {
    pub session_id: String,
    /// Final text reported by the agent
    pub content: String,
    /// Files this delegation modified, in first-touched order
    pub files_modified: Vec<String>,
}

/// Who an individual delegation is for; used to scope activity log entries.
#[derive(Debug, Clone)]
pub struct DelegationScope {
    pub issue_id: String,
    pub worker_id: usize,
}

type Resolution = Result<String, DelegationError>;

/// Completes a one-shot channel at most once.
struct Resolver {
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Resolution>>>,
}

impl Resolver {
    fn new(tx: oneshot::Sender<Resolution>) -> Self {
        Self {
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        }
    }

    /// Returns true if this call performed the resolution.
    fn resolve(&self, value: Resolution) -> bool {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return false;
        }
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = tx {
            let _ = tx.send(value);
        }
        true
    }
}

/// `<kind>-<issue>-<millis>-<suffix>`; the suffix separates sessions
/// started within the same millisecond.
pub fn session_id_for(kind: impl fmt::Display, issue_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}-{}-{}",
        kind,
        issue_id,
        Utc::now().timestamp_millis(),
        &suffix[..6]
    )
}

pub struct AgentBridge {
    provider: Arc<dyn AgentProvider>,
    cwd: PathBuf,
    permission_mode: String,
    safe_mode: bool,
    timeouts: DelegationTimeouts,
    log: Arc<ActivityLog>,
}

impl AgentBridge {
    pub fn new(provider: Arc<dyn AgentProvider>, cwd: impl Into<PathBuf>, log: Arc<ActivityLog>) -> Self {
        Self {
            provider,
            cwd: cwd.into(),
            permission_mode: "bypassPermissions".to_string(),
            safe_mode: false,
            timeouts: DelegationTimeouts::default(),
            log,
        }
    }

    pub fn with_permission_mode(mut self, mode: impl Into<String>, safe_mode: bool) -> Self {
        self.permission_mode = mode.into();
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_timeouts(mut self, timeouts: DelegationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.kind().as_str()
    }

    /// Run one delegation to completion.
    ///
    /// Files modified by the agent are added to `touched` as they are seen,
    /// so the caller has them even when the delegation fails.
    pub async fn delegate(
        &self,
        kind: DelegationKind,
        scope: &DelegationScope,
        prompt: &str,
        touched: &TouchedFiles,
    ) -> Result<DelegationOutcome, DelegationError> {
        let session_id = session_id_for(kind, &scope.issue_id);
        let limit = self.timeouts.for_kind(kind);

        // Subscribe first so the terminal event cannot be missed.
        let rx = self.provider.subscribe();
        let (tx, mut result_rx) = oneshot::channel();
        let resolver = Arc::new(Resolver::new(tx));
        let files = Arc::new(Mutex::new(Vec::<String>::new()));

        let listener = tokio::spawn(listen(
            rx,
            session_id.clone(),
            resolver.clone(),
            self.log.clone(),
            scope.clone(),
            self.cwd.clone(),
            touched.clone(),
            files.clone(),
        ));

        tracing::info!(session = %session_id, provider = self.provider_name(), "Starting delegation");

        let opts = StartOptions {
            cwd: self.cwd.clone(),
            session_id: session_id.clone(),
            permission_mode: self.permission_mode.clone(),
            safe_mode: self.safe_mode,
        };
        if let Err(e) = self.provider.start(opts).await {
            resolver.resolve(Err(e));
        } else if let Err(e) = self.provider.send_input(&session_id, prompt).await {
            if resolver.resolve(Err(e)) {
                self.provider.terminate(&session_id).await;
            }
        }

        let resolution = match tokio::time::timeout(limit, &mut result_rx).await {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Err(DelegationError::StreamClosed(session_id.clone())),
            Err(_) => {
                let timeout = DelegationError::Timeout {
                    kind: kind.to_string(),
                    secs: limit.as_secs(),
                };
                if resolver.resolve(Err(DelegationError::Timeout {
                    kind: kind.to_string(),
                    secs: limit.as_secs(),
                })) {
                    self.log.record(
                        LogEntry::new(
                            LogLevel::Error,
                            format!("{} timed out after {}s", kind, limit.as_secs()),
                        )
                        .with_worker(scope.worker_id)
                        .with_issue(&scope.issue_id),
                    );
                    listener.abort();
                    self.provider.terminate(&session_id).await;
                    Err(timeout)
                } else {
                    // The stream resolved right at the deadline; take its value.
                    match result_rx.await {
                        Ok(resolution) => resolution,
                        Err(_) => Err(timeout),
                    }
                }
            }
        };
        listener.abort();

        let files_modified = files.lock().unwrap_or_else(|e| e.into_inner()).clone();
        resolution.map(|content| DelegationOutcome {
            session_id,
            content,
            files_modified,
        })
    }
}

/// Project-relative form of a tool path.
fn normalize_path(cwd: &Path, path: &str) -> String {
    let p = Path::new(path);
    p.strip_prefix(cwd)
        .map(|rel| rel.to_string_lossy().into_owned())
        .unwrap_or_else(|_| path.trim_start_matches("./").to_string())
}

#[allow(clippy::too_many_arguments)]
async fn listen(
    mut rx: broadcast::Receiver<super::SessionEvent>,
    session_id: String,
    resolver: Arc<Resolver>,
    log: Arc<ActivityLog>,
    scope: DelegationScope,
    cwd: PathBuf,
    touched: TouchedFiles,
    files: Arc<Mutex<Vec<String>>>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(ev) if ev.session_id == session_id => ev.event,
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(session = %session_id, "Dropped {} agent events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => {
                resolver.resolve(Err(DelegationError::StreamClosed(session_id.clone())));
                return;
            }
        };

        match event {
            AgentEvent::ToolStart { tool, input } => {
                let args: serde_json::Value =
                    serde_json::from_str(&input).unwrap_or(serde_json::Value::Null);
                log.record(
                    LogEntry::new(LogLevel::Agent, describe_tool(&tool, &args))
                        .with_worker(scope.worker_id)
                        .with_issue(&scope.issue_id),
                );
                if is_file_modifying_tool(&tool)
                    && let Some(path) = tool_file_path(&args)
                {
                    let rel = normalize_path(&cwd, path);
                    touched
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(rel.clone());
                    let mut files = files.lock().unwrap_or_else(|e| e.into_inner());
                    if !files.contains(&rel) {
                        files.push(rel);
                    }
                }
            }
            AgentEvent::ToolResult { content, is_error } => {
                if is_error {
                    tracing::debug!(session = %session_id, "Tool error: {}", crate::util::truncate_chars(&content, 200));
                }
            }
            AgentEvent::Result { success, content } => {
                let value = if success {
                    Ok(content)
                } else {
                    Err(DelegationError::AgentError(crate::util::truncate_chars(&content, 2000)))
                };
                resolver.resolve(value);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedProvider, Script};

    fn scope() -> DelegationScope {
        DelegationScope {
            issue_id: "bd-1".into(),
            worker_id: 0,
        }
    }

    fn bridge(provider: Arc<ScriptedProvider>, log: Arc<ActivityLog>) -> AgentBridge {
        AgentBridge::new(provider, "/work/project", log)
            .with_timeouts(DelegationTimeouts::uniform(Duration::from_millis(200)))
    }

    #[test]
    fn test_resolver_resolves_once() {
        let (tx, mut rx) = oneshot::channel();
        let r = Resolver::new(tx);
        assert!(r.resolve(Ok("first".into())));
        assert!(!r.resolve(Ok("second".into())));
        assert_eq!(rx.try_recv().unwrap().unwrap(), "first");
    }

    #[test]
    fn test_timeouts_per_kind() {
        let t = DelegationTimeouts::default();
        assert_eq!(t.for_kind(DelegationKind::Implement), Duration::from_secs(600));
        assert_eq!(t.for_kind(DelegationKind::Fix), Duration::from_secs(600));
        assert_eq!(t.for_kind(DelegationKind::SelfReview), Duration::from_secs(300));
        assert_eq!(t.for_kind(DelegationKind::Audit), Duration::from_secs(480));
    }

    #[test]
    fn test_normalize_path() {
        let cwd = Path::new("/work/project");
        assert_eq!(normalize_path(cwd, "/work/project/src/a.rs"), "src/a.rs");
        assert_eq!(normalize_path(cwd, "./src/b.rs"), "src/b.rs");
        assert_eq!(normalize_path(cwd, "/elsewhere/c.rs"), "/elsewhere/c.rs");
    }

    #[tokio::test]
    async fn test_success_tracks_files_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::succeed_editing(&[
            "/work/project/src/a.rs",
            "src/a.rs",
            "src/b.rs",
        ])]));
        let log = Arc::new(ActivityLog::new());
        let touched = TouchedFiles::default();

        let outcome = bridge(provider.clone(), log.clone())
            .delegate(DelegationKind::Implement, &scope(), "do it", &touched)
            .await
            .unwrap();

        assert_eq!(outcome.files_modified, vec!["src/a.rs", "src/b.rs"]);
        assert!(outcome.session_id.starts_with("implement-bd-1-"));
        let millis = outcome.session_id["implement-bd-1-".len()..].split('-').next().unwrap();
        assert!(millis.parse::<i64>().unwrap() > 1_600_000_000_000);
        assert_eq!(touched.lock().unwrap().len(), 2);
        assert_eq!(provider.prompts(), vec!["do it".to_string()]);
        assert!(log.count_where(|e| e.level == LogLevel::Agent) >= 3);
    }

    #[tokio::test]
    async fn test_agent_failure_is_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Fail("no can do".into())]));
        let log = Arc::new(ActivityLog::new());
        let err = bridge(provider, log)
            .delegate(DelegationKind::Fix, &scope(), "fix", &TouchedFiles::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::AgentError(m) if m == "no can do"));
    }

    #[tokio::test]
    async fn test_start_failure_resolves_without_timeout() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::StartError]));
        let log = Arc::new(ActivityLog::new());
        let started = std::time::Instant::now();
        let err = bridge(provider, log)
            .delegate(DelegationKind::Implement, &scope(), "x", &TouchedFiles::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DelegationError::StartFailed { .. }));
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_timeout_logs_once_and_terminates() {
        let provider = Arc::new(ScriptedProvider::new(vec![Script::Hang]));
        let log = Arc::new(ActivityLog::new());
        let err = bridge(provider.clone(), log.clone())
            .delegate(DelegationKind::SelfReview, &scope(), "review", &TouchedFiles::default())
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(
            log.count_where(|e| e.level == LogLevel::Error && e.message.contains("timed out")),
            1
        );
        assert_eq!(provider.terminated().len(), 1);
        assert!(provider.terminated()[0].starts_with("self-review-bd-1-"));
    }

    #[test]
    fn test_session_ids_carry_timestamp_and_differ() {
        let before = Utc::now().timestamp_millis();
        let a = session_id_for("review", "bd-7");
        let b = session_id_for("review", "bd-7");
        assert_ne!(a, b);
        let parts: Vec<&str> = a.rsplitn(3, '-').collect();
        assert_eq!(parts[0].len(), 6);
        assert!(parts[1].parse::<i64>().unwrap() >= before);
        assert_eq!(parts[2], "review-bd-7");
    }
}
