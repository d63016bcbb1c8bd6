//! Generic process host for agent CLIs.
//!
//! A [`CliProvider`] spawns one child process per session, streams its
//! stdout line by line through a provider [`Dialect`], and publishes the
//! resulting events. If the process exits without emitting a terminal
//! result, one is synthesized from the exit status.

use super::{AgentEvent, AgentProvider, ProviderKind, SessionEvent, StartOptions};
use crate::errors::DelegationError;
use crate::util::tail_chars;
use async_trait::async_trait;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex, broadcast};

/// Text accumulated while parsing a stream, used as the result content when
/// the terminal event carries none.
#[derive(Debug, Default)]
pub struct ParseState {
    pub last_text: String,
}

/// Per-provider command line and output format.
pub trait Dialect: Send + Sync + 'static {
    const KIND: ProviderKind;

    /// Arguments for a new session. The prompt is always written to stdin.
    fn args(opts: &StartOptions) -> Vec<String>;

    /// Translate one stdout line into zero or more events.
    fn parse_line(line: &str, state: &mut ParseState) -> Vec<AgentEvent>;
}

struct SessionHandle {
    child: Child,
    stdin: Option<ChildStdin>,
}

pub struct CliProvider<D: Dialect> {
    command: String,
    tx: broadcast::Sender<SessionEvent>,
    running: Arc<Mutex<HashMap<String, SessionHandle>>>,
    _dialect: PhantomData<D>,
}

impl<D: Dialect> CliProvider<D> {
    pub fn new(command: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self {
            command: command.into(),
            tx,
            running: Arc::new(Mutex::new(HashMap::new())),
            _dialect: PhantomData,
        }
    }

    pub async fn running_sessions(&self) -> usize {
        self.running.lock().await.len()
    }
}

#[async_trait]
impl<D: Dialect> AgentProvider for CliProvider<D> {
    fn kind(&self) -> ProviderKind {
        D::KIND
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    async fn start(&self, opts: StartOptions) -> Result<(), DelegationError> {
        let args = D::args(&opts);
        tracing::debug!(
            session = %opts.session_id,
            "Spawning: {} {}",
            self.command,
            args.join(" ")
        );

        let mut child = Command::new(&self.command)
            .args(&args)
            .current_dir(&opts.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DelegationError::StartFailed {
                provider: D::KIND.to_string(),
                session_id: opts.session_id.clone(),
                message: format!("{}: {}", self.command, e),
            })?;

        let stdout = child.stdout.take().ok_or_else(|| DelegationError::StartFailed {
            provider: D::KIND.to_string(),
            session_id: opts.session_id.clone(),
            message: "stdout not captured".into(),
        })?;
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        self.running
            .lock()
            .await
            .insert(opts.session_id.clone(), SessionHandle { child, stdin });

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let stderr_task = stderr.map(|stderr| {
            let buf = stderr_buf.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut b = buf.lock().await;
                    b.push_str(&line);
                    b.push('\n');
                    if b.len() > 16 * 1024 {
                        let keep = tail_chars(&b, 8 * 1024).to_string();
                        *b = keep;
                    }
                }
            })
        });

        let tx = self.tx.clone();
        let running = self.running.clone();
        let session_id = opts.session_id;
        tokio::spawn(async move {
            let mut state = ParseState::default();
            let mut saw_result = false;
            let mut lines = BufReader::new(stdout).lines();

            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim().is_empty() {
                    continue;
                }
                for event in D::parse_line(&line, &mut state) {
                    if saw_result {
                        break;
                    }
                    saw_result = matches!(event, AgentEvent::Result { .. });
                    let _ = tx.send(SessionEvent {
                        session_id: session_id.clone(),
                        event,
                    });
                }
            }

            if let Some(task) = stderr_task {
                let _ = task.await;
            }

            // Drop the lock before waiting on the child.
            let handle = running.lock().await.remove(&session_id);
            let status = match handle {
                Some(mut h) => h.child.wait().await.ok(),
                None => None,
            };

            if !saw_result {
                let stderr_text = stderr_buf.lock().await.clone();
                let (success, content) = match status {
                    Some(s) if s.success() => (true, state.last_text),
                    Some(s) => (
                        false,
                        format!(
                            "{} exited with {} before reporting a result: {}",
                            D::KIND,
                            s,
                            tail_chars(stderr_text.trim(), 2000)
                        ),
                    ),
                    None => (false, format!("{} session terminated", D::KIND)),
                };
                let _ = tx.send(SessionEvent {
                    session_id: session_id.clone(),
                    event: AgentEvent::Result { success, content },
                });
            }
            tracing::debug!(session = %session_id, ?status, "Agent process finished");
        });

        Ok(())
    }

    async fn send_input(&self, session_id: &str, text: &str) -> Result<(), DelegationError> {
        let stdin = {
            let mut running = self.running.lock().await;
            let handle = running
                .get_mut(session_id)
                .ok_or_else(|| DelegationError::InputFailed {
                    session_id: session_id.to_string(),
                    message: "no such session".into(),
                })?;
            handle.stdin.take()
        };
        let mut stdin = stdin.ok_or_else(|| DelegationError::InputFailed {
            session_id: session_id.to_string(),
            message: "input already sent".into(),
        })?;

        let input_err = |e: std::io::Error| DelegationError::InputFailed {
            session_id: session_id.to_string(),
            message: e.to_string(),
        };
        stdin.write_all(text.as_bytes()).await.map_err(input_err)?;
        stdin.shutdown().await.map_err(input_err)?;
        Ok(())
    }

    async fn terminate(&self, session_id: &str) {
        let handle = self.running.lock().await.remove(session_id);
        if let Some(mut h) = handle {
            if let Err(e) = h.child.kill().await {
                tracing::warn!(session = %session_id, "Failed to terminate agent process: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Treats every stdout line as a tool start and never emits a result.
    struct EchoDialect;

    impl Dialect for EchoDialect {
        const KIND: ProviderKind = ProviderKind::Claude;

        fn args(_opts: &StartOptions) -> Vec<String> {
            Vec::new()
        }

        fn parse_line(line: &str, state: &mut ParseState) -> Vec<AgentEvent> {
            state.last_text = line.to_string();
            vec![AgentEvent::ToolStart {
                tool: "echo".into(),
                input: line.to_string(),
            }]
        }
    }

    fn opts(id: &str) -> StartOptions {
        StartOptions {
            cwd: std::env::temp_dir(),
            session_id: id.into(),
            permission_mode: "default".into(),
            safe_mode: false,
        }
    }

    async fn next_for(rx: &mut broadcast::Receiver<SessionEvent>) -> AgentEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event in time")
            .expect("channel open")
            .event
    }

    #[tokio::test]
    async fn test_missing_binary_is_start_failure() {
        let provider = CliProvider::<EchoDialect>::new("foreman-no-such-agent");
        let err = provider.start(opts("s1")).await.unwrap_err();
        assert!(matches!(err, DelegationError::StartFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_without_result_synthesizes_one() {
        // `cat` echoes stdin back and exits successfully at EOF.
        let provider = CliProvider::<EchoDialect>::new("cat");
        let mut rx = provider.subscribe();
        provider.start(opts("s2")).await.unwrap();
        provider.send_input("s2", "hello\n").await.unwrap();

        assert_eq!(
            next_for(&mut rx).await,
            AgentEvent::ToolStart {
                tool: "echo".into(),
                input: "hello".into()
            }
        );
        assert_eq!(
            next_for(&mut rx).await,
            AgentEvent::Result {
                success: true,
                content: "hello".into()
            }
        );
        assert_eq!(provider.running_sessions().await, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_second_input_is_rejected() {
        let provider = CliProvider::<EchoDialect>::new("cat");
        provider.start(opts("s3")).await.unwrap();
        provider.send_input("s3", "x\n").await.unwrap();
        let err = provider.send_input("s3", "y\n").await;
        assert!(matches!(err, Err(DelegationError::InputFailed { .. })));
        provider.terminate("s3").await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_reports_failed_result() {
        // `cat` with stdin left open never exits on its own.
        let provider = CliProvider::<EchoDialect>::new("cat");
        let mut rx = provider.subscribe();
        provider.start(opts("s4")).await.unwrap();
        provider.terminate("s4").await;
        match next_for(&mut rx).await {
            AgentEvent::Result { success, .. } => assert!(!success),
            other => panic!("Expected Result, got {:?}", other),
        }
    }
}
