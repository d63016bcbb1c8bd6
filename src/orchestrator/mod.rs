pub mod remote;
pub mod runner;
pub mod state;

pub use remote::{RemoteAction, RemoteCommand, RemoteControl};
pub use runner::{ControlCommand, Orchestrator, OrchestratorDeps, ReviewDecision, RunSummary};
pub use state::{OrchestratorState, SharedState};
