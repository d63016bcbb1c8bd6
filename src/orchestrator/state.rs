//! The single orchestrator state container.
//!
//! All workers share one [`SharedState`]. Every read-decide-write sequence
//! (claiming, queue edits, completions) happens inside one critical section,
//! and every mutation persists a [`SessionSnapshot`] before the lock is
//! released. Persistence failures are logged and otherwise ignored.

use crate::activity::ActivityLog;
use crate::errors::QueueError;
use crate::issue::{Issue, IssueCache};
use crate::queue::scheduler::pick_next;
use crate::queue::{CompletedRing, Queue};
use crate::session::{BranchState, SessionSnapshot, SessionStatus, SessionStore};
use crate::settings::Settings;
use crate::worker::pipeline::PhaseSink;
use crate::worker::{IssueOutcome, WorkerPhase, WorkerSlot};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct OrchestratorState {
    pub status: SessionStatus,
    pub queue: Queue,
    pub completed: CompletedRing,
    pub human_review: Vec<String>,
    pub settings: Settings,
    pub branch: BranchState,
    pub workers: Vec<WorkerSlot>,
    pub cache: IssueCache,
    pub stop_requested: bool,
    /// Outcomes of the current run, in completion order
    pub outcomes: Vec<(String, IssueOutcome)>,
}

impl OrchestratorState {
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            status: snapshot.status,
            queue: snapshot.queue,
            completed: snapshot.completed,
            human_review: snapshot.human_review,
            settings: snapshot.settings,
            branch: snapshot.branch,
            ..Default::default()
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let lead = self.workers.first();
        SessionSnapshot {
            status: self.status,
            queue: self.queue.clone(),
            completed: self.completed.clone(),
            human_review: self.human_review.clone(),
            current_issue: lead.and_then(|w| w.issue_id.clone()),
            current_phase: lead.map(|w| w.phase).unwrap_or_default(),
            retry_count: lead.map(|w| w.retry_count).unwrap_or(0),
            settings: self.settings.clone(),
            branch: self.branch.clone(),
            saved_at: Utc::now(),
        }
    }

    fn location_of(&self, id: &str) -> Option<&'static str> {
        if self.queue.contains(id) {
            Some("queue")
        } else if self.human_review.iter().any(|i| i == id) {
            Some("human review")
        } else {
            None
        }
    }

    fn worker_holding(&self, id: &str) -> Option<usize> {
        self.workers
            .iter()
            .find(|w| w.issue_id.as_deref() == Some(id))
            .map(|w| w.id)
    }

    pub fn add_to_queue(&mut self, id: &str) -> Result<(), QueueError> {
        if let Some(location) = self.location_of(id) {
            return Err(QueueError::AlreadyPresent {
                id: id.to_string(),
                location,
            });
        }
        self.completed.remove(id);
        self.queue.add(id);
        Ok(())
    }

    pub fn remove_from_queue(&mut self, id: &str) -> Result<(), QueueError> {
        if let Some(worker) = self.worker_holding(id) {
            return Err(QueueError::InProgress {
                id: id.to_string(),
                worker,
            });
        }
        if !self.queue.remove(id) {
            return Err(QueueError::NotQueued(id.to_string()));
        }
        Ok(())
    }

    /// Pick and claim in one step.
    pub fn claim_next(&mut self, worker_id: usize) -> Option<Issue> {
        let id = pick_next(&self.queue, &self.cache, &self.workers, worker_id)?;
        let slot = self.workers.iter_mut().find(|w| w.id == worker_id)?;
        slot.claim(id.clone());
        Some(
            self.cache
                .get(&id)
                .cloned()
                .unwrap_or_else(|| Issue::new(id.clone(), id)),
        )
    }

    /// Apply a worker's terminal outcome and free the worker.
    pub fn finish_issue(&mut self, worker_id: usize, issue_id: &str, outcome: IssueOutcome) {
        match &outcome {
            IssueOutcome::Completed => {
                self.queue.remove(issue_id);
                self.completed.push(issue_id);
            }
            IssueOutcome::Review => {
                self.queue.remove(issue_id);
                if !self.human_review.iter().any(|i| i == issue_id) {
                    self.human_review.push(issue_id.to_string());
                }
            }
            IssueOutcome::Blocked(_) => {
                self.queue.remove(issue_id);
            }
            IssueOutcome::Interrupted => {}
        }
        if let Some(slot) = self.workers.iter_mut().find(|w| w.id == worker_id) {
            slot.reset();
        }
        self.outcomes.push((issue_id.to_string(), outcome));
    }

    /// Whether a run still owns worker slots, even after a pause.
    pub fn run_active(&self) -> bool {
        !self.workers.is_empty()
    }

    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_idle()).count()
    }
}

#[derive(Clone)]
pub struct SharedState {
    inner: Arc<Mutex<OrchestratorState>>,
    store: Arc<dyn SessionStore>,
    log: Arc<ActivityLog>,
}

impl SharedState {
    pub fn new(state: OrchestratorState, store: Arc<dyn SessionStore>, log: Arc<ActivityLog>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
            store,
            log,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn read<R>(&self, f: impl FnOnce(&OrchestratorState) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate and persist within one critical section.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut OrchestratorState) -> R) -> R {
        let mut guard = self.lock();
        let result = f(&mut guard);
        self.persist(&guard);
        result
    }

    fn persist(&self, state: &OrchestratorState) {
        if let Err(e) = self.store.save(&state.snapshot()) {
            self.log.warning(format!("Failed to save session: {:#}", e));
        }
    }

    /// Remove the persisted session; in-memory state is kept.
    pub fn clear_persisted(&self) {
        if let Err(e) = self.store.clear() {
            self.log.warning(format!("Failed to clear session: {:#}", e));
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.read(|s| s.status)
    }

    pub fn settings(&self) -> Settings {
        self.read(|s| s.settings.clone())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.read(|s| s.snapshot())
    }

    pub fn claim_next(&self, worker_id: usize) -> Option<Issue> {
        self.mutate(|s| s.claim_next(worker_id))
    }

    pub fn add_to_queue(&self, id: &str) -> Result<(), QueueError> {
        let mut guard = self.lock();
        guard.add_to_queue(id)?;
        self.persist(&guard);
        Ok(())
    }

    pub fn remove_from_queue(&self, id: &str) -> Result<(), QueueError> {
        let mut guard = self.lock();
        guard.remove_from_queue(id)?;
        self.persist(&guard);
        Ok(())
    }

    pub fn finish_issue(&self, worker_id: usize, issue_id: &str, outcome: IssueOutcome) {
        self.mutate(|s| s.finish_issue(worker_id, issue_id, outcome));
    }
}

impl PhaseSink for SharedState {
    fn update(&self, worker_id: usize, phase: WorkerPhase, retry_count: u32, files: &BTreeSet<String>) {
        self.mutate(|s| {
            if let Some(slot) = s.workers.iter_mut().find(|w| w.id == worker_id) {
                slot.phase = phase;
                slot.retry_count = retry_count;
                slot.files_touched = files.clone();
            }
        });
    }

    fn stop_requested(&self) -> bool {
        self.read(|s| s.stop_requested)
    }
}
