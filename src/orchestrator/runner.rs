//! The agent loop: spawns workers, drains the queue, finalizes the run.

use super::state::{OrchestratorState, SharedState};
use crate::activity::{ActivityLog, LogEntry, LogLevel};
use crate::agent::AgentBridge;
use crate::branch::{BranchManager, Vcs, branch_key};
use crate::coordination::{BROKER_START_DEADLINE, BrokerCoordinator, FileCoordinator, NoCoordination};
use crate::errors::{ConfigError, QueueError};
use crate::issue::{Issue, IssueStatus, IssueTracker, NewIssue};
use crate::queue::scheduler::sorted_ids;
use crate::review::AuditStore;
use crate::session::{SessionStatus, SessionStore};
use crate::settings::Settings;
use crate::silo::{SiloStore, refactor_notes_section};
use crate::verify::{VerificationRunner, Verifier};
use crate::worker::pipeline::{IssuePipeline, PipelineContext, commit_message};
use crate::worker::{IssueOutcome, WorkerSlot};
use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlCommand {
    Start,
    Pause,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Refactor { notes: String },
}

/// What a finished run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: Vec<String>,
    pub review: Vec<String>,
    pub blocked: Vec<String>,
    pub stopped: bool,
    pub paused: bool,
}

/// External collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub bridge: Arc<AgentBridge>,
    pub tracker: Arc<dyn IssueTracker>,
    pub verification: Arc<dyn VerificationRunner>,
    pub vcs: Arc<dyn Vcs>,
    pub silo: Arc<dyn SiloStore>,
    pub audits: Arc<dyn AuditStore>,
    pub store: Arc<dyn SessionStore>,
}

pub struct Orchestrator {
    project_dir: PathBuf,
    state: SharedState,
    log: Arc<ActivityLog>,
    bridge: Arc<AgentBridge>,
    tracker: Arc<dyn IssueTracker>,
    verifier: Arc<Verifier>,
    vcs: Arc<dyn Vcs>,
    silo: Arc<dyn SiloStore>,
    audits: Arc<dyn AuditStore>,
    broker_command: Option<(String, Vec<String>)>,
    finished: broadcast::Sender<RunSummary>,
}

impl Orchestrator {
    pub fn new(project_dir: impl Into<PathBuf>, deps: OrchestratorDeps, log: Arc<ActivityLog>) -> Self {
        let project_dir = project_dir.into();
        let state = SharedState::new(OrchestratorState::default(), deps.store, log.clone());
        let (finished, _) = broadcast::channel(16);
        Self {
            verifier: Arc::new(Verifier::new(deps.verification, project_dir.clone())),
            project_dir,
            state,
            log,
            bridge: deps.bridge,
            tracker: deps.tracker,
            vcs: deps.vcs,
            silo: deps.silo,
            audits: deps.audits,
            broker_command: None,
            finished,
        }
    }

    /// Program and arguments that start a lock broker for multi-worker runs.
    pub fn with_broker_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.broker_command = Some((program.into(), args));
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    pub fn log(&self) -> &Arc<ActivityLog> {
        &self.log
    }

    /// Summaries of runs as they end, including runs started remotely.
    pub fn subscribe_runs(&self) -> broadcast::Receiver<RunSummary> {
        self.finished.subscribe()
    }

    /// Load the persisted session. Returns its status when one existed.
    pub fn restore_session(&self) -> Option<SessionStatus> {
        let snapshot = match self.state.store().load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return None,
            Err(e) => {
                self.log
                    .warning(format!("Failed to load session, starting fresh: {:#}", e));
                return None;
            }
        };
        let status = snapshot.status;
        let restored = OrchestratorState::from_snapshot(snapshot);
        self.state.mutate(|s| {
            let cache = std::mem::take(&mut s.cache);
            *s = restored;
            s.cache = cache;
            // Only a run flips the status back to running.
            if s.status == SessionStatus::Running {
                s.status = SessionStatus::Paused;
            }
        });
        if status.is_resumable() {
            let (queued, review) = self.state.read(|s| (s.queue.len(), s.human_review.len()));
            self.log.info(format!(
                "Resuming interrupted session: {} queued, {} awaiting review",
                queued, review
            ));
        }
        Some(status)
    }

    /// Reload issue metadata from the tracker. Returns the issue count.
    pub async fn refresh_issues(&self) -> usize {
        match self.tracker.list_issues().await {
            Ok(issues) => {
                let n = issues.len();
                self.state.mutate(|s| s.cache.replace_all(issues));
                n
            }
            Err(e) => {
                self.log
                    .warning(format!("Could not load issues from tracker: {}", e));
                self.state.read(|s| s.cache.len())
            }
        }
    }

    pub fn update_settings(&self, settings: Settings) -> Result<(), ConfigError> {
        settings.validate()?;
        self.state.mutate(|s| s.settings = settings);
        Ok(())
    }

    pub fn add_to_queue(&self, id: &str) -> Result<(), QueueError> {
        self.state.add_to_queue(id)?;
        self.log.info(format!("Queued {}", id));
        Ok(())
    }

    pub fn remove_from_queue(&self, id: &str) -> Result<(), QueueError> {
        self.state.remove_from_queue(id)?;
        self.log.info(format!("Removed {} from queue", id));
        Ok(())
    }

    /// Stop claiming new issues; in-flight pipelines finish.
    pub fn pause(&self) {
        let paused = self.state.mutate(|s| {
            if s.status == SessionStatus::Running {
                s.status = SessionStatus::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            self.log.warning("Pause requested; workers finish their current issue");
        }
    }

    /// Abort between phases and discard the persisted session at run end.
    /// With no run in flight the session is discarded right away.
    pub fn stop(&self) {
        let in_flight = self.state.mutate(|s| {
            if s.status == SessionStatus::Running || s.run_active() {
                s.stop_requested = true;
                return true;
            }
            s.status = SessionStatus::Idle;
            s.stop_requested = false;
            false
        });
        if in_flight {
            self.log.warning("Stop requested");
            return;
        }
        self.state.clear_persisted();
        self.log.warning("Session stopped; session cleared");
        let _ = self.finished.send(RunSummary {
            stopped: true,
            ..Default::default()
        });
    }

    /// Apply a remote or CLI control command.
    pub fn control(self: &Arc<Self>, command: ControlCommand) {
        match command {
            ControlCommand::Pause => self.pause(),
            ControlCommand::Stop => self.stop(),
            ControlCommand::Start => {
                let (running, active) = self
                    .state
                    .read(|s| (s.status == SessionStatus::Running, s.run_active()));
                if running {
                    self.log.info("Already running");
                    return;
                }
                if active {
                    self.log.info("Paused run is still finishing its current issues");
                    return;
                }
                let orchestrator = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.run().await {
                        orchestrator.log.error(format!("Run failed: {:#}", e));
                    }
                });
            }
        }
    }

    /// Drain the queue with a pool of workers.
    pub async fn run(&self) -> Result<RunSummary> {
        let summary = self.drain_queue().await?;
        let _ = self.finished.send(summary.clone());
        Ok(summary)
    }

    async fn drain_queue(&self) -> Result<RunSummary> {
        let settings = self.state.settings();
        settings.validate()?;

        let already_running = self.state.mutate(|s| {
            if s.status == SessionStatus::Running || s.run_active() {
                return true;
            }
            s.status = SessionStatus::Running;
            s.stop_requested = false;
            s.outcomes.clear();
            s.workers = (0..settings.max_concurrent_issues).map(WorkerSlot::new).collect();
            false
        });
        if already_running {
            bail!("A run is already in progress");
        }

        self.refresh_issues().await;

        if self.state.read(|s| s.queue.is_empty()) {
            self.log.info("Queue is empty; nothing to do");
            self.state.mutate(|s| {
                s.status = SessionStatus::Idle;
                s.workers.clear();
            });
            return Ok(RunSummary::default());
        }

        let branches = if settings.use_feature_branches {
            match self.prepare_branches(&settings).await {
                Ok(manager) => Some(manager),
                Err(e) => {
                    self.log.error(format!("Branch setup failed: {:#}", e));
                    self.state.mutate(|s| {
                        s.status = SessionStatus::Error;
                        s.workers.clear();
                    });
                    return Err(e);
                }
            }
        } else {
            None
        };

        let coordinator = self.start_coordination(&settings).await;
        let ctx = Arc::new(PipelineContext {
            bridge: self.bridge.clone(),
            verifier: self.verifier.clone(),
            coordinator: coordinator.clone(),
            silo: self.silo.clone(),
            audits: self.audits.clone(),
            vcs: Some(self.vcs.clone()),
            log: self.log.clone(),
        });

        self.log.info(format!(
            "Starting {} worker(s) with {}",
            settings.max_concurrent_issues,
            self.bridge.provider_name()
        ));

        let single_worker_branches = branches.clone().filter(|_| settings.max_concurrent_issues == 1);
        let mut workers = JoinSet::new();
        for worker_id in 0..settings.max_concurrent_issues {
            let lane = WorkerLane {
                id: worker_id,
                state: self.state.clone(),
                ctx: ctx.clone(),
                tracker: self.tracker.clone(),
                log: self.log.clone(),
                branches: single_worker_branches.clone(),
            };
            workers.spawn(lane.run());
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                self.log.error(format!("Worker task failed: {}", e));
            }
        }

        coordinator.shutdown().await;
        Ok(self.finalize(&settings, branches.as_deref()).await)
    }

    async fn prepare_branches(&self, settings: &Settings) -> Result<Arc<BranchManager>> {
        let manager = Arc::new(BranchManager::new(self.vcs.clone(), settings.branch_prefix.clone()));
        let (mut branch, head) = self.state.read(|s| {
            let head = sorted_ids(&s.queue, &s.cache)
                .first()
                .map(|id| s.cache.get(id).cloned().unwrap_or_else(|| Issue::new(*id, *id)));
            (s.branch.clone(), head)
        });

        if let Some(warning) = manager.check_resume(&branch).await {
            self.log.warning(warning);
        }
        let head = head.context("Queue is empty")?;
        let name = manager.begin_session(&head, &mut branch).await?;
        self.state.mutate(|s| s.branch = branch);
        self.log.info(format!("Working on branch {}", name));
        if settings.max_concurrent_issues > 1 {
            self.log.warning(format!(
                "{} workers share one working tree; all issues stay on {}",
                settings.max_concurrent_issues, name
            ));
        }
        Ok(manager)
    }

    async fn start_coordination(&self, settings: &Settings) -> Arc<dyn FileCoordinator> {
        if !settings.coordination_enabled() {
            return Arc::new(NoCoordination);
        }
        let Some((program, args)) = &self.broker_command else {
            self.log
                .warning("No lock broker configured; workers run without file coordination");
            return Arc::new(NoCoordination);
        };
        match BrokerCoordinator::launch(program, args, BROKER_START_DEADLINE).await {
            Ok(broker) => {
                self.log
                    .info(format!("File coordination on port {}", broker.port()));
                Arc::new(broker)
            }
            Err(e) => {
                self.log.warning(format!(
                    "Lock broker failed to start ({:#}); continuing without file coordination",
                    e
                ));
                Arc::new(NoCoordination)
            }
        }
    }

    async fn finalize(&self, settings: &Settings, branches: Option<&BranchManager>) -> RunSummary {
        let (outcomes, stopped, paused, drained) = self.state.read(|s| {
            (
                s.outcomes.clone(),
                s.stop_requested,
                s.status == SessionStatus::Paused,
                s.queue.is_empty() && s.human_review.is_empty(),
            )
        });

        let mut summary = RunSummary {
            stopped,
            paused: paused && !stopped,
            ..Default::default()
        };
        for (id, outcome) in outcomes {
            match outcome {
                IssueOutcome::Completed => summary.completed.push(id),
                IssueOutcome::Review => summary.review.push(id),
                IssueOutcome::Blocked(_) => summary.blocked.push(id),
                IssueOutcome::Interrupted => {}
            }
        }

        if stopped {
            self.state.mutate(|s| {
                s.status = SessionStatus::Idle;
                s.stop_requested = false;
                s.workers.clear();
            });
            self.state.clear_persisted();
            self.log.warning("Run stopped; session cleared");
            return summary;
        }

        if let Some(manager) = branches
            && drained
        {
            self.finish_branches(manager, settings).await;
        }

        self.state.mutate(|s| {
            if s.status == SessionStatus::Running {
                s.status = SessionStatus::Idle;
            }
            s.workers.clear();
        });
        self.log.success(format!(
            "Run finished: {} completed, {} in review, {} blocked",
            summary.completed.len(),
            summary.review.len(),
            summary.blocked.len()
        ));
        summary
    }

    async fn finish_branches(&self, manager: &BranchManager, settings: &Settings) {
        let (mut branch, titles) = self.state.read(|s| {
            let titles: HashMap<String, String> = s
                .branch
                .epic_branches
                .keys()
                .filter_map(|k| s.cache.get(k).map(|i| (k.clone(), i.title.clone())))
                .collect();
            (s.branch.clone(), titles)
        });
        match manager
            .finish_session(&mut branch, settings.auto_create_pr, &titles)
            .await
        {
            Ok(report) => {
                for w in &report.warnings {
                    self.log.warning(w.clone());
                }
                for url in &report.pull_requests {
                    self.log.success(format!("Opened pull request {}", url));
                }
                if let Some(original) = &report.returned_to {
                    self.log.info(format!("Returned to {}", original));
                }
            }
            Err(e) => self.log.error(format!("Could not finish branch session: {}", e)),
        }
        self.state.mutate(|s| s.branch = branch);
    }

    /// Resolve an issue parked in human review.
    pub async fn complete_review(&self, issue_id: &str, decision: ReviewDecision) -> Result<()> {
        let (issue, settings) = self.state.mutate(|s| {
            let before = s.human_review.len();
            s.human_review.retain(|i| i != issue_id);
            let issue = s
                .cache
                .get(issue_id)
                .cloned()
                .unwrap_or_else(|| Issue::new(issue_id, issue_id));
            ((s.human_review.len() < before).then_some(issue), s.settings.clone())
        });
        let Some(issue) = issue else {
            return Err(QueueError::NotInReview(issue_id.to_string()).into());
        };

        match decision {
            ReviewDecision::Approve => {
                if let Err(e) = self.tracker.update_status(issue_id, IssueStatus::Closed).await {
                    self.log
                        .warning(format!("Could not close {} in tracker: {}", issue_id, e));
                }
                if settings.auto_commit {
                    match self.vcs.commit_all(&commit_message(&issue)).await {
                        Ok(Some(sha)) => self.log.success(format!("Committed {} as {}", issue_id, sha)),
                        Ok(None) => self.log.info("Nothing to commit"),
                        Err(e) => self.log.warning(format!("Commit failed: {:#}", e)),
                    }
                }
                self.state.mutate(|s| s.completed.push(issue_id));
                self.log.success(format!("Approved {}", issue_id));
            }
            ReviewDecision::Refactor { notes } => {
                let new = NewIssue {
                    title: format!("Refactor: {}", issue.title),
                    description: notes.clone(),
                    issue_type: "task".to_string(),
                    priority: issue.priority,
                    parent_id: Some(issue_id.to_string()),
                };
                match self.tracker.create_issue(&new).await {
                    Ok(created) => {
                        self.log
                            .info(format!("Created {} for refactor of {}", created.id, issue_id));
                        self.state.mutate(|s| s.cache.insert(created));
                    }
                    Err(e) => self
                        .log
                        .warning(format!("Could not create refactor issue: {}", e)),
                }
                if let Err(e) = self
                    .silo
                    .append(issue_id, &refactor_notes_section(&notes, Utc::now()))
                {
                    self.log.warning(format!("Could not update SILO: {:#}", e));
                }
                self.state.mutate(|s| s.queue.push_front(issue_id));
                self.log
                    .info(format!("{} sent back to the front of the queue", issue_id));
            }
        }
        Ok(())
    }
}

/// One worker's claim-run-report loop.
struct WorkerLane {
    id: usize,
    state: SharedState,
    ctx: Arc<PipelineContext>,
    tracker: Arc<dyn IssueTracker>,
    log: Arc<ActivityLog>,
    branches: Option<Arc<BranchManager>>,
}

impl WorkerLane {
    fn log(&self, level: LogLevel, issue: &str, message: impl Into<String>) {
        self.log
            .record(LogEntry::new(level, message).with_worker(self.id).with_issue(issue));
    }

    async fn run(self) {
        loop {
            let (running, stop) = self
                .state
                .read(|s| (s.status == SessionStatus::Running, s.stop_requested));
            if !running || stop {
                break;
            }
            let Some(issue) = self.state.claim_next(self.id) else {
                break;
            };
            self.log(LogLevel::Info, &issue.id, format!("Worker {} claimed {}", self.id, issue.id));

            if let Err(e) = self.tracker.update_status(&issue.id, IssueStatus::InProgress).await {
                self.log(LogLevel::Warning, &issue.id, format!("Tracker update failed: {}", e));
            }

            if let Some(manager) = &self.branches
                && let Err(reason) = self.switch_branch(manager, &issue).await
            {
                self.report(&issue.id, IssueOutcome::Blocked(reason)).await;
                continue;
            }

            let settings = self.state.settings();
            let outcome = IssuePipeline::new(&self.ctx, &self.state, &settings, self.id, issue.clone())
                .run()
                .await;
            let interrupted = outcome == IssueOutcome::Interrupted;
            self.report(&issue.id, outcome).await;
            if interrupted {
                break;
            }
        }
    }

    async fn switch_branch(&self, manager: &BranchManager, issue: &Issue) -> Result<(), String> {
        let (mut branch, expected) = self.state.read(|s| {
            (s.branch.clone(), s.branch.epic_branches.get(branch_key(issue)).cloned())
        });
        if expected.is_some() && expected == branch.current_branch {
            return Ok(());
        }
        let result = manager.switch_for(issue, &mut branch).await;
        self.state.mutate(|s| s.branch = branch);
        match result {
            Ok(name) => {
                self.log(LogLevel::Info, &issue.id, format!("Switched to {}", name));
                Ok(())
            }
            Err(e) => {
                self.log(LogLevel::Error, &issue.id, e.to_string());
                Err(format!("could not switch branch: {}", e))
            }
        }
    }

    async fn report(&self, issue_id: &str, outcome: IssueOutcome) {
        match &outcome {
            IssueOutcome::Completed => {
                if let Err(e) = self.tracker.update_status(issue_id, IssueStatus::Closed).await {
                    self.log(LogLevel::Warning, issue_id, format!("Tracker update failed: {}", e));
                }
                self.log(LogLevel::Success, issue_id, format!("Completed {}", issue_id));
            }
            IssueOutcome::Review => {}
            IssueOutcome::Blocked(_) => {
                if let Err(e) = self.tracker.update_status(issue_id, IssueStatus::Blocked).await {
                    self.log(LogLevel::Warning, issue_id, format!("Tracker update failed: {}", e));
                }
            }
            IssueOutcome::Interrupted => {
                if let Err(e) = self.tracker.update_status(issue_id, IssueStatus::Open).await {
                    self.log(LogLevel::Warning, issue_id, format!("Tracker update failed: {}", e));
                }
            }
        }
        self.state.finish_issue(self.id, issue_id, outcome);
    }
}
