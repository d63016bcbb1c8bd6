//! In-crate test doubles for the external boundaries.

use crate::agent::{AgentEvent, AgentProvider, ProviderKind, SessionEvent, StartOptions};
use crate::branch::Vcs;
use crate::errors::{DelegationError, TrackerError};
use crate::issue::{Issue, IssueStatus, IssueTracker, NewIssue};
use crate::session::{SessionSnapshot, SessionStore};
use crate::settings::StageSelection;
use crate::verify::{RawVerification, StageResult, VerificationRunner};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// What a scripted agent session does once it receives its prompt.
#[derive(Clone)]
pub enum Script {
    /// Edit the given paths, then succeed
    Succeed { files: Vec<String> },
    Fail(String),
    /// Never emit a terminal event
    Hang,
    /// Fail `start` itself
    StartError,
    /// Run a side effect, then succeed without edits
    Effect(Arc<dyn Fn() + Send + Sync>),
    Delay(Duration, Box<Script>),
}

impl Script {
    pub fn ok() -> Self {
        Script::Succeed { files: Vec::new() }
    }

    pub fn succeed_editing(files: &[&str]) -> Self {
        Script::Succeed {
            files: files.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub struct ScriptedProvider {
    tx: broadcast::Sender<SessionEvent>,
    scripts: Mutex<VecDeque<Script>>,
    pending: Mutex<HashMap<String, Script>>,
    prompts: Mutex<Vec<String>>,
    sessions: Mutex<Vec<String>>,
    terminated: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// Scripts are consumed in start order; once exhausted every session succeeds.
    pub fn new(scripts: Vec<Script>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            scripts: Mutex::new(scripts.into()),
            pending: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<String> {
        self.sessions.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.terminated.lock().unwrap().clone()
    }
}

fn emit(tx: broadcast::Sender<SessionEvent>, session_id: String, script: Script) {
    tokio::spawn(async move {
        let mut script = script;
        while let Script::Delay(d, inner) = script {
            tokio::time::sleep(d).await;
            script = *inner;
        }
        let send = |event| {
            let _ = tx.send(SessionEvent {
                session_id: session_id.clone(),
                event,
            });
        };
        match script {
            Script::Succeed { files } => {
                for f in files {
                    send(AgentEvent::ToolStart {
                        tool: "Edit".into(),
                        input: json!({ "file_path": f }).to_string(),
                    });
                }
                send(AgentEvent::Result {
                    success: true,
                    content: "done".into(),
                });
            }
            Script::Fail(msg) => send(AgentEvent::Result {
                success: false,
                content: msg,
            }),
            Script::Effect(f) => {
                f();
                send(AgentEvent::Result {
                    success: true,
                    content: "done".into(),
                });
            }
            Script::Hang | Script::StartError | Script::Delay(..) => {}
        }
    });
}

#[async_trait]
impl AgentProvider for ScriptedProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    async fn start(&self, opts: StartOptions) -> Result<(), DelegationError> {
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_else(Script::ok);
        if matches!(script, Script::StartError) {
            return Err(DelegationError::StartFailed {
                provider: "scripted".into(),
                session_id: opts.session_id,
                message: "refused".into(),
            });
        }
        self.sessions.lock().unwrap().push(opts.session_id.clone());
        self.pending.lock().unwrap().insert(opts.session_id, script);
        Ok(())
    }

    async fn send_input(&self, session_id: &str, text: &str) -> Result<(), DelegationError> {
        self.prompts.lock().unwrap().push(text.to_string());
        let script = self.pending.lock().unwrap().remove(session_id).ok_or_else(|| {
            DelegationError::InputFailed {
                session_id: session_id.into(),
                message: "unknown session".into(),
            }
        })?;
        emit(self.tx.clone(), session_id.to_string(), script);
        Ok(())
    }

    async fn terminate(&self, session_id: &str) {
        self.terminated.lock().unwrap().push(session_id.to_string());
    }
}

/// Verification runner returning a fixed per-stage result, counting calls.
pub struct ScriptedVerifier {
    results: Mutex<VecDeque<RawVerification>>,
    fallback: RawVerification,
    calls: AtomicUsize,
}

impl ScriptedVerifier {
    pub fn always(result: RawVerification) -> Self {
        Self {
            results: Mutex::new(VecDeque::new()),
            fallback: result,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn passing() -> Self {
        Self::always(RawVerification::passing())
    }

    /// Test stage fails with `output` on every run.
    pub fn failing_tests(output: &str) -> Self {
        Self::always(RawVerification {
            tests: StageResult::failed(output),
            ..RawVerification::passing()
        })
    }

    pub fn sequence(results: Vec<RawVerification>, then: RawVerification) -> Self {
        Self {
            results: Mutex::new(results.into()),
            fallback: then,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VerificationRunner for ScriptedVerifier {
    async fn run(&self, _stages: StageSelection) -> RawVerification {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Default)]
pub struct MemoryTracker {
    pub issues: Mutex<Vec<Issue>>,
    pub status_updates: Mutex<Vec<(String, IssueStatus)>>,
    pub created: Mutex<Vec<NewIssue>>,
    next_id: AtomicUsize,
}

impl MemoryTracker {
    pub fn with_issues(issues: Vec<Issue>) -> Self {
        Self {
            issues: Mutex::new(issues),
            ..Default::default()
        }
    }

    pub fn statuses_for(&self, id: &str) -> Vec<IssueStatus> {
        self.status_updates
            .lock()
            .unwrap()
            .iter()
            .filter(|(i, _)| i == id)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl IssueTracker for MemoryTracker {
    async fn list_issues(&self) -> Result<Vec<Issue>, TrackerError> {
        Ok(self.issues.lock().unwrap().clone())
    }

    async fn create_issue(&self, new: &NewIssue) -> Result<Issue, TrackerError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut issue = Issue::new(format!("new-{}", n), new.title.clone()).with_type(new.issue_type.clone());
        issue.description = new.description.clone();
        issue.priority = new.priority;
        issue.parent_id = new.parent_id.clone();
        self.created.lock().unwrap().push(new.clone());
        self.issues.lock().unwrap().push(issue.clone());
        Ok(issue)
    }

    async fn update_status(&self, id: &str, status: IssueStatus) -> Result<(), TrackerError> {
        // Suspend like a real tracker call so concurrent callers interleave.
        tokio::task::yield_now().await;
        self.status_updates
            .lock()
            .unwrap()
            .push((id.to_string(), status));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    pub snapshot: Mutex<Option<SessionSnapshot>>,
    pub saves: AtomicUsize,
}

impl SessionStore for MemorySessionStore {
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        *self.snapshot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<SessionSnapshot>> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn clear(&self) -> Result<()> {
        *self.snapshot.lock().unwrap() = None;
        Ok(())
    }
}

/// In-memory repository recording every operation.
pub struct FakeVcs {
    pub current: Mutex<String>,
    pub branches: Mutex<Vec<String>>,
    pub dirty: Mutex<bool>,
    pub ops: Mutex<Vec<String>>,
    pub fail_checkout: Mutex<bool>,
    pub fail_commands: Mutex<bool>,
}

impl FakeVcs {
    pub fn on_branch(name: &str) -> Self {
        Self {
            current: Mutex::new(name.to_string()),
            branches: Mutex::new(vec![name.to_string()]),
            dirty: Mutex::new(false),
            ops: Mutex::new(Vec::new()),
            fail_checkout: Mutex::new(false),
            fail_commands: Mutex::new(false),
        }
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn current_branch(&self) -> Result<String> {
        Ok(self.current.lock().unwrap().clone())
    }

    async fn has_changes(&self) -> Result<bool> {
        Ok(*self.dirty.lock().unwrap())
    }

    async fn stash(&self, message: &str) -> Result<()> {
        self.record(format!("stash {}", message));
        *self.dirty.lock().unwrap() = false;
        Ok(())
    }

    async fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.branches.lock().unwrap().iter().any(|b| b == name))
    }

    async fn create_branch(&self, name: &str) -> Result<()> {
        self.record(format!("create {}", name));
        self.branches.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn checkout(&self, name: &str) -> Result<()> {
        if *self.fail_checkout.lock().unwrap() {
            anyhow::bail!("checkout refused");
        }
        self.record(format!("checkout {}", name));
        *self.current.lock().unwrap() = name.to_string();
        Ok(())
    }

    async fn commit_all(&self, message: &str) -> Result<Option<String>> {
        self.record(format!("commit {}", message));
        Ok(Some("abc1234".into()))
    }

    async fn push(&self, branch: &str) -> Result<()> {
        self.record(format!("push {}", branch));
        Ok(())
    }

    async fn run_command(&self, program: &str, args: &[String]) -> Result<String> {
        if *self.fail_commands.lock().unwrap() {
            anyhow::bail!("{} failed", program);
        }
        self.record(format!("{} {}", program, args.join(" ")));
        Ok(String::new())
    }
}
