//! Cross-worker file coordination.
//!
//! Coordination is advisory: the orchestrator launches a lock broker and
//! embeds instructions for using it into every prompt. Agents that ignore
//! the instructions cause file conflicts, never orchestrator failures.

pub mod broker;

pub use broker::{LockBroker, PORT_ANNOUNCEMENT};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// How long to wait for a launched broker to announce its port.
pub const BROKER_START_DEADLINE: Duration = Duration::from_secs(5);

#[async_trait]
pub trait FileCoordinator: Send + Sync {
    /// Prompt section telling the agent how to coordinate, if coordination
    /// is active.
    fn instructions(&self, issue_id: &str) -> Option<String>;

    async fn shutdown(&self);
}

/// Used for single-worker runs and when the broker failed to start.
pub struct NoCoordination;

#[async_trait]
impl FileCoordinator for NoCoordination {
    fn instructions(&self, _issue_id: &str) -> Option<String> {
        None
    }

    async fn shutdown(&self) {}
}

/// Render the lock protocol for an agent prompt.
pub fn lock_instructions(port: u16, issue_id: &str) -> String {
    let base = format!("http://127.0.0.1:{}", port);
    format!(
        r#"## File Coordination

Other agents are editing this repository at the same time. Before you modify
any file, acquire a lock on it:

```bash
curl -s -X POST {base}/lock -H 'Content-Type: application/json' \
  -d '{{"path": "<relative/file/path>", "issue_id": "{issue}"}}'
```

A response with `"granted": true` means you may edit the file. A `409`
response with `"granted": false` names the issue holding it: work on other
files, then retry after 15-30 seconds. Do not edit a file you have not locked.

When you are done with a file, release it:

```bash
curl -s -X POST {base}/unlock -H 'Content-Type: application/json' \
  -d '{{"path": "<relative/file/path>", "issue_id": "{issue}"}}'
```

Release every lock you hold before finishing.
"#,
        base = base,
        issue = issue_id
    )
}

/// Coordinator backed by an external broker process.
pub struct BrokerCoordinator {
    port: u16,
    child: Mutex<Option<Child>>,
}

impl BrokerCoordinator {
    /// Spawn `program args..` and wait for its port announcement.
    pub async fn launch(program: &str, args: &[String], deadline: Duration) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn lock broker: {}", program))?;

        let stdout = child.stdout.take().context("Lock broker stdout not captured")?;
        let mut lines = BufReader::new(stdout).lines();

        let port = tokio::time::timeout(deadline, async {
            while let Some(line) = lines.next_line().await? {
                if let Some(port) = parse_port_line(&line) {
                    return Ok::<u16, anyhow::Error>(port);
                }
            }
            bail!("Lock broker exited before announcing its port")
        })
        .await
        .context("Timed out waiting for lock broker port")??;

        // Drain the rest of the broker's stdout.
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

        tracing::info!(port, "Lock broker started");
        Ok(Self {
            port,
            child: Mutex::new(Some(child)),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

fn parse_port_line(line: &str) -> Option<u16> {
    line.trim().strip_prefix(PORT_ANNOUNCEMENT)?.trim().parse().ok()
}

#[async_trait]
impl FileCoordinator for BrokerCoordinator {
    fn instructions(&self, issue_id: &str) -> Option<String> {
        Some(lock_instructions(self.port, issue_id))
    }

    async fn shutdown(&self) {
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to stop lock broker: {}", e);
            }
        }
    }
}

/// Run a broker in this process until Ctrl-C, announcing the port on stdout.
pub async fn serve_standalone(port: u16) -> Result<()> {
    let mut broker = LockBroker::new();
    let addr = broker.start(port).await?;
    println!("{}{}", PORT_ANNOUNCEMENT, addr.port());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    broker.stop();
    Ok(())
}
