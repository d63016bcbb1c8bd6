//! The per-issue phase pipeline.
//!
//! `working → self-reviewing → [auditing ⇄ audit-fixing] → testing ⇄ fixing
//! → [committing] → reviewing | completed`, with an escape to `blocked` from
//! any phase. Every external failure is converted into a log entry and an
//! [`IssueOutcome`]; nothing propagates out of [`IssuePipeline::run`].

use super::prompts::{self, PromptContext};
use super::{IssueOutcome, WorkerPhase};
use crate::activity::{ActivityLog, LogEntry, LogLevel};
use crate::agent::bridge::{DelegationScope, TouchedFiles};
use crate::agent::{AgentBridge, DelegationKind};
use crate::branch::Vcs;
use crate::coordination::FileCoordinator;
use crate::errors::DelegationError;
use crate::issue::Issue;
use crate::review::findings::format_blocking;
use crate::review::{AuditCategory, AuditReport, AuditStore};
use crate::settings::Settings;
use crate::silo::{SiloContext, SiloStore};
use crate::util::{tail_chars, truncate_chars};
use crate::verify::Verifier;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Audit-fix delegations per issue. Independent of `max_retries`.
pub const MAX_AUDIT_FIX_ATTEMPTS: u32 = 2;

/// Per-stage output kept in a fix prompt.
const ERROR_REPORT_CHARS: usize = 4000;

/// Prior SILO text carried into the rewritten file.
const PRIOR_SILO_CHARS: usize = 4000;

/// Collaborators shared by every worker in a run.
pub struct PipelineContext {
    pub bridge: Arc<AgentBridge>,
    pub verifier: Arc<Verifier>,
    pub coordinator: Arc<dyn FileCoordinator>,
    pub silo: Arc<dyn SiloStore>,
    pub audits: Arc<dyn AuditStore>,
    /// Commit primitive; `None` disables in-pipeline commits
    pub vcs: Option<Arc<dyn Vcs>>,
    pub log: Arc<ActivityLog>,
}

/// Where a pipeline reports progress, and how it learns about stop requests.
pub trait PhaseSink: Send + Sync {
    fn update(&self, worker_id: usize, phase: WorkerPhase, retry_count: u32, files: &BTreeSet<String>);

    fn stop_requested(&self) -> bool;
}

pub fn commit_message(issue: &Issue) -> String {
    format!("{}: {}\n\nIssue: {}", issue.commit_prefix(), issue.title, issue.id)
}

fn delegation_failure(kind: DelegationKind, err: &DelegationError) -> String {
    if err.is_timeout() {
        format!("{} delegation exceeded its time limit", kind)
    } else {
        format!("{} failed: {}", kind, err)
    }
}

pub struct IssuePipeline<'a> {
    ctx: &'a PipelineContext,
    sink: &'a dyn PhaseSink,
    settings: &'a Settings,
    worker_id: usize,
    issue: Issue,
    touched: TouchedFiles,
    retry_count: u32,
    phase: WorkerPhase,
    silo_text: Option<String>,
    coordination: Option<String>,
}

impl<'a> IssuePipeline<'a> {
    pub fn new(
        ctx: &'a PipelineContext,
        sink: &'a dyn PhaseSink,
        settings: &'a Settings,
        worker_id: usize,
        issue: Issue,
    ) -> Self {
        Self {
            ctx,
            sink,
            settings,
            worker_id,
            issue,
            touched: TouchedFiles::default(),
            retry_count: 0,
            phase: WorkerPhase::Idle,
            silo_text: None,
            coordination: None,
        }
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.ctx.log.record(
            LogEntry::new(level, message)
                .with_worker(self.worker_id)
                .with_issue(&self.issue.id),
        );
    }

    fn touched_files(&self) -> BTreeSet<String> {
        self.touched.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn enter(&mut self, phase: WorkerPhase) {
        self.phase = phase;
        tracing::debug!(worker = self.worker_id, issue = %self.issue.id, %phase, "Phase change");
        self.sink
            .update(self.worker_id, phase, self.retry_count, &self.touched_files());
    }

    fn block(&mut self, reason: String) -> IssueOutcome {
        self.log(LogLevel::Error, format!("Blocked: {}", reason));
        self.enter(WorkerPhase::Blocked);
        IssueOutcome::Blocked(reason)
    }

    fn interrupted(&self) -> bool {
        if self.sink.stop_requested() {
            self.log(
                LogLevel::Warning,
                format!("Stopped during {}; issue stays queued", self.phase),
            );
            return true;
        }
        false
    }

    fn prompt_context(&self) -> PromptContext<'_> {
        PromptContext {
            issue: &self.issue,
            silo: self.silo_text.as_deref(),
            coordination: self.coordination.as_deref(),
        }
    }

    async fn delegate(&self, kind: DelegationKind, prompt: &str) -> Result<String, String> {
        let scope = DelegationScope {
            issue_id: self.issue.id.clone(),
            worker_id: self.worker_id,
        };
        self.ctx
            .bridge
            .delegate(kind, &scope, prompt, &self.touched)
            .await
            .map(|outcome| outcome.content)
            .map_err(|e| delegation_failure(kind, &e))
    }

    /// Drive the issue to a terminal outcome.
    pub async fn run(mut self) -> IssueOutcome {
        self.silo_text = match self.ctx.silo.read(&self.issue.id) {
            Ok(text) => text,
            Err(e) => {
                self.log(LogLevel::Warning, format!("Could not read SILO context: {}", e));
                None
            }
        };
        self.coordination = self.ctx.coordinator.instructions(&self.issue.id);

        // Implementation
        self.enter(WorkerPhase::Working);
        self.log(
            LogLevel::Info,
            format!("Starting {}: {}", self.issue.id, self.issue.title),
        );
        let prompt = prompts::implement_prompt(&self.prompt_context());
        let summary = match self.delegate(DelegationKind::Implement, &prompt).await {
            Ok(summary) => summary,
            Err(reason) => return self.block(reason),
        };
        self.write_silo(&summary);
        if self.interrupted() {
            return IssueOutcome::Interrupted;
        }

        // Self-review
        self.enter(WorkerPhase::SelfReviewing);
        let files: Vec<String> = self.touched_files().into_iter().collect();
        let prompt = prompts::self_review_prompt(&self.prompt_context(), &files);
        if let Err(reason) = self.delegate(DelegationKind::SelfReview, &prompt).await {
            return self.block(reason);
        }
        if self.interrupted() {
            return IssueOutcome::Interrupted;
        }

        // Audits
        let categories = AuditCategory::enabled(&self.settings.audits);
        if !categories.is_empty() {
            if self.touched_files().is_empty() {
                self.log(LogLevel::Info, "No files modified; skipping audits");
            } else if let Err(reason) = self.run_audits(&categories).await {
                return self.block(reason);
            }
            if self.interrupted() {
                return IssueOutcome::Interrupted;
            }
        }

        // Verification and fix loop
        loop {
            self.enter(WorkerPhase::Testing);
            let files = self.touched_files();
            let report = self.ctx.verifier.run_verification(&files, self.settings).await;
            for stage in &report.downgraded {
                self.log(
                    LogLevel::Warning,
                    format!("Ignoring {} failure unrelated to modified files", stage.as_str()),
                );
            }
            if report.success {
                self.log(LogLevel::Success, "Verification passed");
                break;
            }

            let failed: Vec<&str> = report.failed_stages().iter().map(|s| s.as_str()).collect();
            if self.retry_count >= self.settings.max_retries {
                return self.block(format!(
                    "verification still failing ({}) after {} attempts",
                    failed.join(", "),
                    self.retry_count + 1
                ));
            }
            self.retry_count += 1;
            self.log(
                LogLevel::Warning,
                format!(
                    "Verification failed ({}); fix attempt {}/{}",
                    failed.join(", "),
                    self.retry_count,
                    self.settings.max_retries
                ),
            );
            if self.interrupted() {
                return IssueOutcome::Interrupted;
            }

            self.enter(WorkerPhase::Fixing);
            let prompt = prompts::fix_prompt(
                &self.prompt_context(),
                &report.error_report(ERROR_REPORT_CHARS),
                self.retry_count,
                self.settings.max_retries,
            );
            if let Err(reason) = self.delegate(DelegationKind::Fix, &prompt).await {
                return self.block(reason);
            }
        }

        // Commit
        if self.settings.commits_in_pipeline() {
            self.enter(WorkerPhase::Committing);
            self.commit().await;
        }

        if self.settings.require_human_review {
            self.enter(WorkerPhase::Reviewing);
            self.log(LogLevel::Info, "Ready for human review");
            IssueOutcome::Review
        } else {
            self.enter(WorkerPhase::Completed);
            IssueOutcome::Completed
        }
    }

    fn write_silo(&self, summary: &str) {
        let mut silo = SiloContext::new(&self.issue.id, &self.issue.title);
        silo.files_modified = self.touched_files().into_iter().collect();
        silo.summary = truncate_chars(summary.trim(), 2000);
        silo.notes.push(format!(
            "Implemented via {} on worker {}",
            self.ctx.bridge.provider_name(),
            self.worker_id
        ));
        let mut content = silo.render();
        if let Some(prior) = self.silo_text.as_deref().filter(|s| !s.trim().is_empty()) {
            content.push_str("\n## Previous Context\n\n");
            content.push_str(tail_chars(prior.trim(), PRIOR_SILO_CHARS));
            content.push('\n');
        }
        if let Err(e) = self.ctx.silo.write(&self.issue.id, &content) {
            self.log(LogLevel::Warning, format!("Could not write SILO context: {}", e));
        }
    }

    fn read_audit_reports(&self, categories: &[AuditCategory]) -> Result<Vec<AuditReport>, String> {
        self.ctx
            .audits
            .read_reports(&self.issue.id, categories)
            .map_err(|e| format!("could not read audit results: {:#}", e))
    }

    async fn run_audits(&mut self, categories: &[AuditCategory]) -> Result<(), String> {
        self.enter(WorkerPhase::Auditing);
        let id = self.issue.id.clone();
        if let Err(e) = self.ctx.audits.clear(&id) {
            self.log(LogLevel::Warning, format!("Could not clear old audit reports: {}", e));
        }

        let passes: Vec<_> = categories
            .iter()
            .map(|&c| (c, self.ctx.audits.report_path(&id, c)))
            .collect();
        let files: Vec<String> = self.touched_files().into_iter().collect();
        let prompt = prompts::audit_prompt(&self.prompt_context(), &files, &passes);
        self.delegate(DelegationKind::Audit, &prompt).await?;

        let mut reports = self.read_audit_reports(categories)?;
        for &category in categories {
            if !reports.iter().any(|r| r.category == category) {
                self.log(
                    LogLevel::Warning,
                    format!("No {} audit report was written", category),
                );
            }
        }

        let report_paths: Vec<_> = passes.iter().map(|(_, p)| p.clone()).collect();
        let mut attempt = 0;
        loop {
            let blocking = format_blocking(&reports);
            if blocking.is_empty() {
                self.log(LogLevel::Success, "Audits passed");
                return Ok(());
            }
            let count = blocking.lines().count();
            if attempt >= MAX_AUDIT_FIX_ATTEMPTS {
                return Err(format!("{} audit finding(s) unresolved", count));
            }
            attempt += 1;
            self.log(
                LogLevel::Warning,
                format!(
                    "{} blocking audit finding(s); fix attempt {}/{}",
                    count, attempt, MAX_AUDIT_FIX_ATTEMPTS
                ),
            );

            self.enter(WorkerPhase::AuditFixing);
            let prompt = prompts::audit_fix_prompt(
                &self.prompt_context(),
                &blocking,
                &report_paths,
                attempt,
                MAX_AUDIT_FIX_ATTEMPTS,
            );
            self.delegate(DelegationKind::AuditFix, &prompt).await?;
            reports = self.read_audit_reports(categories)?;
        }
    }

    async fn commit(&self) {
        let Some(vcs) = &self.ctx.vcs else {
            return;
        };
        match vcs.commit_all(&commit_message(&self.issue)).await {
            Ok(Some(sha)) => self.log(LogLevel::Success, format!("Committed {}", sha)),
            Ok(None) => self.log(LogLevel::Info, "Nothing to commit"),
            Err(e) => self.log(LogLevel::Warning, format!("Commit failed: {:#}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::bridge::DelegationTimeouts;
    use crate::coordination::NoCoordination;
    use crate::review::{AuditFinding, FileAuditStore, FindingSeverity};
    use crate::settings::AuditSelection;
    use crate::silo::FileSiloStore;
    use crate::testing::{FakeVcs, Script, ScriptedProvider, ScriptedVerifier};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        phases: Mutex<Vec<(WorkerPhase, u32)>>,
        stop: AtomicBool,
    }

    impl RecordingSink {
        fn phases(&self) -> Vec<WorkerPhase> {
            self.phases.lock().unwrap().iter().map(|(p, _)| *p).collect()
        }
    }

    impl PhaseSink for RecordingSink {
        fn update(&self, _worker: usize, phase: WorkerPhase, retry: u32, _files: &BTreeSet<String>) {
            self.phases.lock().unwrap().push((phase, retry));
        }

        fn stop_requested(&self) -> bool {
            self.stop.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        dir: TempDir,
        provider: Arc<ScriptedProvider>,
        verifier: Arc<ScriptedVerifier>,
        vcs: Arc<FakeVcs>,
        log: Arc<ActivityLog>,
        ctx: PipelineContext,
    }

    fn harness(scripts: Vec<Script>, verifier: ScriptedVerifier) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::new(scripts));
        let verifier = Arc::new(verifier);
        let vcs = Arc::new(FakeVcs::on_branch("main"));
        let log = Arc::new(ActivityLog::new());
        let bridge = AgentBridge::new(provider.clone(), dir.path(), log.clone())
            .with_timeouts(DelegationTimeouts::uniform(Duration::from_millis(150)));
        let ctx = PipelineContext {
            bridge: Arc::new(bridge),
            verifier: Arc::new(Verifier::new(verifier.clone(), dir.path())),
            coordinator: Arc::new(NoCoordination),
            silo: Arc::new(FileSiloStore::new(dir.path().join("silo"))),
            audits: Arc::new(FileAuditStore::new(dir.path().join("audits"))),
            vcs: Some(vcs.clone()),
            log: log.clone(),
        };
        Harness {
            dir,
            provider,
            verifier,
            vcs,
            log,
            ctx,
        }
    }

    fn issue() -> Issue {
        Issue::new("bd-1", "Add cache")
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_commits() {
        let h = harness(
            vec![Script::succeed_editing(&["src/cache.rs"])],
            ScriptedVerifier::passing(),
        );
        let sink = RecordingSink::default();
        let settings = Settings::default();

        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;

        assert_eq!(outcome, IssueOutcome::Completed);
        assert_eq!(
            sink.phases(),
            vec![
                WorkerPhase::Working,
                WorkerPhase::SelfReviewing,
                WorkerPhase::Testing,
                WorkerPhase::Committing,
                WorkerPhase::Completed,
            ]
        );
        assert_eq!(h.verifier.calls(), 1);
        assert!(h.vcs.ops()[0].starts_with("commit feat: Add cache"));

        let silo = std::fs::read_to_string(h.dir.path().join("silo/bd-1.md")).unwrap();
        assert!(silo.contains("- `src/cache.rs`"));
    }

    #[tokio::test]
    async fn test_fix_loop_blocks_after_max_retries_plus_one() {
        let h = harness(
            vec![Script::succeed_editing(&["src/cache.rs"])],
            ScriptedVerifier::failing_tests("src/cache.rs:10 assertion failed"),
        );
        let sink = RecordingSink::default();
        let settings = Settings::default().with_max_retries(2);

        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;

        assert!(matches!(outcome, IssueOutcome::Blocked(ref r) if r.contains("after 3 attempts")));
        assert_eq!(h.verifier.calls(), 3);
        let fixes = h
            .provider
            .prompts()
            .iter()
            .filter(|p| p.starts_with("Verification failed"))
            .count();
        assert_eq!(fixes, 2);
        assert!(sink.phases.lock().unwrap().iter().all(|(_, retry)| *retry <= 2));
        assert_eq!(sink.phases().last(), Some(&WorkerPhase::Blocked));
        assert!(h.vcs.ops().is_empty());
    }

    #[tokio::test]
    async fn test_fix_then_pass() {
        let failing = crate::verify::RawVerification {
            lint: crate::verify::StageResult::failed("cache.rs: unused import"),
            ..crate::verify::RawVerification::passing()
        };
        let h = harness(
            vec![Script::succeed_editing(&["src/cache.rs"])],
            ScriptedVerifier::sequence(vec![failing], crate::verify::RawVerification::passing()),
        );
        let sink = RecordingSink::default();
        let settings = Settings::default();
        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;
        assert_eq!(outcome, IssueOutcome::Completed);
        assert_eq!(h.verifier.calls(), 2);
        assert!(h.provider.prompts()[2].contains("## lint failed"));
    }

    #[tokio::test]
    async fn test_human_review_parks_without_commit() {
        let h = harness(vec![], ScriptedVerifier::passing());
        let sink = RecordingSink::default();
        let settings = Settings::default().with_human_review(true);
        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;
        assert_eq!(outcome, IssueOutcome::Review);
        assert_eq!(sink.phases().last(), Some(&WorkerPhase::Reviewing));
        assert!(h.vcs.ops().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_blocks_with_single_timeout_entry() {
        let h = harness(vec![Script::Hang], ScriptedVerifier::passing());
        let sink = RecordingSink::default();
        let settings = Settings::default();

        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;

        assert!(matches!(outcome, IssueOutcome::Blocked(_)));
        assert_eq!(
            h.log.count_where(|e| e.message.contains("timed out")),
            1
        );
        assert_eq!(h.provider.terminated().len(), 1);
        assert_eq!(h.verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_self_review_failure_blocks() {
        let h = harness(
            vec![Script::ok(), Script::Fail("review crashed".into())],
            ScriptedVerifier::passing(),
        );
        let sink = RecordingSink::default();
        let settings = Settings::default();
        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;
        assert!(matches!(outcome, IssueOutcome::Blocked(ref r) if r.contains("review crashed")));
        assert_eq!(h.verifier.calls(), 0);
    }

    fn write_report(path: std::path::PathBuf, resolved: bool) {
        let mut finding = AuditFinding::new(FindingSeverity::Error, "src/cache.rs", "key logged");
        finding.resolved = resolved;
        let report = AuditReport::new(AuditCategory::Security).add_finding(finding);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string(&report).unwrap()).unwrap();
    }

    fn audit_settings() -> Settings {
        Settings::default().with_audits(AuditSelection {
            security: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_audit_fix_resolves_findings() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = FileAuditStore::new(dir.path()).report_path("bd-1", AuditCategory::Security);
        let (p1, p2) = (report_path.clone(), report_path.clone());

        let mut h = harness(
            vec![
                Script::succeed_editing(&["src/cache.rs"]),
                Script::ok(),
                Script::Effect(Arc::new(move || write_report(p1.clone(), false))),
                Script::Effect(Arc::new(move || write_report(p2.clone(), true))),
            ],
            ScriptedVerifier::passing(),
        );
        h.ctx.audits = Arc::new(FileAuditStore::new(dir.path()));
        let sink = RecordingSink::default();
        let settings = audit_settings();

        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;

        assert_eq!(outcome, IssueOutcome::Completed);
        let phases = sink.phases();
        assert!(phases.contains(&WorkerPhase::Auditing));
        assert!(phases.contains(&WorkerPhase::AuditFixing));
        assert!(h.provider.prompts()[3].contains("key logged"));
    }

    #[tokio::test]
    async fn test_unresolved_audit_blocks_after_two_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let report_path = FileAuditStore::new(dir.path()).report_path("bd-1", AuditCategory::Security);

        let mut h = harness(
            vec![
                Script::succeed_editing(&["src/cache.rs"]),
                Script::ok(),
                Script::Effect(Arc::new(move || write_report(report_path.clone(), false))),
            ],
            ScriptedVerifier::passing(),
        );
        h.ctx.audits = Arc::new(FileAuditStore::new(dir.path()));
        let sink = RecordingSink::default();
        let settings = audit_settings().with_max_retries(0);

        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;

        assert!(matches!(outcome, IssueOutcome::Blocked(ref r) if r.contains("unresolved")));
        let fixes = h
            .provider
            .prompts()
            .iter()
            .filter(|p| p.starts_with("The audit found"))
            .count();
        assert_eq!(fixes, 2);
        assert_eq!(h.verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_audits_skipped_without_modified_files() {
        let h = harness(vec![], ScriptedVerifier::passing());
        let sink = RecordingSink::default();
        let settings = audit_settings();
        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;
        assert_eq!(outcome, IssueOutcome::Completed);
        assert!(!sink.phases().contains(&WorkerPhase::Auditing));
        assert_eq!(h.provider.sessions().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_between_phases_interrupts() {
        let h = harness(vec![], ScriptedVerifier::passing());
        let sink = RecordingSink::default();
        sink.stop.store(true, Ordering::SeqCst);
        let settings = Settings::default();
        let outcome = IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;
        assert_eq!(outcome, IssueOutcome::Interrupted);
        assert_eq!(sink.phases(), vec![WorkerPhase::Working]);
        assert_eq!(h.provider.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_prior_silo_is_fed_to_prompt() {
        let h = harness(vec![], ScriptedVerifier::passing());
        h.ctx.silo.write("bd-1", "earlier attempt notes").unwrap();
        let sink = RecordingSink::default();
        let settings = Settings::default();
        IssuePipeline::new(&h.ctx, &sink, &settings, 0, issue()).run().await;
        assert!(h.provider.prompts()[0].contains("earlier attempt notes"));
        let silo = h.ctx.silo.read("bd-1").unwrap().unwrap();
        assert!(silo.contains("## Previous Context\n\nearlier attempt notes"));
    }

    #[test]
    fn test_commit_message_uses_type_prefix() {
        let bug = Issue::new("bd-2", "Crash on empty input").with_type("bug");
        assert_eq!(commit_message(&bug), "fix: Crash on empty input\n\nIssue: bd-2");
    }
}
