//! Advisory file-lock broker.
//!
//! A tiny HTTP service agents call (via curl) to claim a file before editing
//! it. Nothing enforces the locks; the broker only records who holds what.
//!
//! ## Endpoints
//!
//! | Method | Path      | Body                   | Response                                   |
//! |--------|-----------|------------------------|--------------------------------------------|
//! | GET    | `/health` |                        | `ok`                                       |
//! | POST   | `/lock`   | `{path, issue_id}`     | 200 `{granted: true, token}` / 409 `{granted: false, holder}` |
//! | POST   | `/unlock` | `{path, issue_id}`     | 200 `{released}`                           |
//! | GET    | `/locks`  |                        | `[{path, issue_id, token, acquired_at}]`   |

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{RwLock, oneshot};

/// Line the standalone broker prints once it is listening.
pub const PORT_ANNOUNCEMENT: &str = "FOREMAN_BROKER_PORT=";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    pub path: String,
    pub issue_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockResponse {
    pub granted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlockResponse {
    pub released: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntry {
    pub path: String,
    pub issue_id: String,
    pub token: String,
    pub acquired_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    locks: HashMap<String, LockEntry>,
}

impl LockTable {
    /// Grant the lock or report the current holder. Re-locking your own path
    /// returns the existing token.
    fn acquire(&mut self, req: LockRequest) -> Result<String, String> {
        let path = normalize(&req.path);
        if let Some(entry) = self.locks.get(&path) {
            if entry.issue_id == req.issue_id {
                return Ok(entry.token.clone());
            }
            return Err(entry.issue_id.clone());
        }
        let token = uuid::Uuid::new_v4().to_string();
        self.locks.insert(
            path.clone(),
            LockEntry {
                path,
                issue_id: req.issue_id,
                token: token.clone(),
                acquired_at: Utc::now(),
            },
        );
        Ok(token)
    }

    fn release(&mut self, req: &LockRequest) -> bool {
        let path = normalize(&req.path);
        match self.locks.get(&path) {
            Some(entry) if entry.issue_id == req.issue_id => {
                self.locks.remove(&path);
                true
            }
            _ => false,
        }
    }
}

fn normalize(path: &str) -> String {
    path.trim().trim_start_matches("./").to_string()
}

type SharedTable = Arc<RwLock<LockTable>>;

pub(crate) fn build_router(state: SharedTable) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/lock", post(lock_handler))
        .route("/unlock", post(unlock_handler))
        .route("/locks", get(list_handler))
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn lock_handler(
    State(state): State<SharedTable>,
    Json(req): Json<LockRequest>,
) -> (StatusCode, Json<LockResponse>) {
    let issue = req.issue_id.clone();
    let path = req.path.clone();
    match state.write().await.acquire(req) {
        Ok(token) => {
            tracing::debug!(%path, %issue, "Lock granted");
            (
                StatusCode::OK,
                Json(LockResponse {
                    granted: true,
                    token: Some(token),
                    holder: None,
                }),
            )
        }
        Err(holder) => (
            StatusCode::CONFLICT,
            Json(LockResponse {
                granted: false,
                token: None,
                holder: Some(holder),
            }),
        ),
    }
}

async fn unlock_handler(
    State(state): State<SharedTable>,
    Json(req): Json<LockRequest>,
) -> Json<UnlockResponse> {
    let released = state.write().await.release(&req);
    Json(UnlockResponse { released })
}

async fn list_handler(State(state): State<SharedTable>) -> Json<Vec<LockEntry>> {
    let mut locks: Vec<LockEntry> = state.read().await.locks.values().cloned().collect();
    locks.sort_by(|a, b| a.path.cmp(&b.path));
    Json(locks)
}

/// In-process broker server bound to localhost.
pub struct LockBroker {
    state: SharedTable,
    shutdown_tx: Option<oneshot::Sender<()>>,
    addr: Option<SocketAddr>,
}

impl Default for LockBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl LockBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(LockTable::default())),
            shutdown_tx: None,
            addr: None,
        }
    }

    /// Bind and serve in the background. Port 0 picks a free port.
    pub async fn start(&mut self, port: u16) -> Result<SocketAddr> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .context("Failed to bind lock broker")?;
        let addr = listener
            .local_addr()
            .context("Failed to get broker address")?;
        self.addr = Some(addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let app = build_router(self.state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                tracing::error!("Lock broker error: {}", e);
            }
        });

        Ok(addr)
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.addr = None;
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        self.addr
    }

    pub async fn lock_count(&self) -> usize {
        self.state.read().await.locks.len()
    }
}
