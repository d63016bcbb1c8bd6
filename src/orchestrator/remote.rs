//! Remote control endpoint for companion clients.
//!
//! `POST /command` with a JSON body naming the project path and an action.
//! Commands for another project are acknowledged with `202` and
//! `applied: false` so several orchestrators can share one relay.

use super::runner::{ControlCommand, Orchestrator};
use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteAction {
    AddToQueue { issue_id: String },
    RemoveFromQueue { issue_id: String },
    Control { command: ControlCommand },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub project_path: PathBuf,
    pub action: RemoteAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub applied: bool,
    pub message: String,
}

impl RemoteResponse {
    fn new(applied: bool, message: impl Into<String>) -> Self {
        Self {
            applied,
            message: message.into(),
        }
    }
}

/// Same project if the paths are equal after canonicalization.
fn same_project(a: &Path, b: &Path) -> bool {
    let canon = |p: &Path| p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
    canon(a) == canon(b)
}

pub(crate) fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/command", post(command_handler))
        .with_state(orchestrator)
}

async fn command_handler(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(cmd): Json<RemoteCommand>,
) -> (StatusCode, Json<RemoteResponse>) {
    if !same_project(&cmd.project_path, orchestrator.project_dir()) {
        tracing::debug!(path = %cmd.project_path.display(), "Ignoring command for another project");
        return (
            StatusCode::ACCEPTED,
            Json(RemoteResponse::new(false, "project path does not match")),
        );
    }

    tracing::info!(action = ?cmd.action, "Remote command");
    let result = match &cmd.action {
        RemoteAction::AddToQueue { issue_id } => orchestrator.add_to_queue(issue_id),
        RemoteAction::RemoveFromQueue { issue_id } => orchestrator.remove_from_queue(issue_id),
        RemoteAction::Control { command } => {
            orchestrator.control(*command);
            Ok(())
        }
    };
    match result {
        Ok(()) => (StatusCode::OK, Json(RemoteResponse::new(true, "ok"))),
        Err(e) => (
            StatusCode::CONFLICT,
            Json(RemoteResponse::new(false, e.to_string())),
        ),
    }
}

/// Running remote-control server.
pub struct RemoteControl {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RemoteControl {
    pub async fn start(orchestrator: Arc<Orchestrator>, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .context("Failed to bind remote control port")?;
        let addr = listener
            .local_addr()
            .context("Failed to get remote control address")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let app = build_router(orchestrator);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!("Remote control server error: {}", e);
            }
        });
        tracing::info!(%addr, "Remote control listening");

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for RemoteControl {
    fn drop(&mut self) {
        self.stop();
    }
}
