//! Spawn-based agent adapter (§4.6): a child process whose stdout is
//! streamed as chunks and whose stderr is redacted before any use.
//!
//! Grounded on the teacher's `moltis-tools::exec::ExecTool`/`exec_command`
//! for the piped-stdio `tokio::process::Command` setup, friendly ENOENT
//! message, and env assembly shape. Restructured for two independent
//! timers: the teacher's single `wait_with_output()` future can't reset a
//! deadline on a byte of activity, so this reads stdout/stderr incrementally
//! in a `tokio::select!` loop racing idle/absolute deadlines instead.
//! Kill escalation (SIGTERM → grace → SIGKILL) is grounded on
//! `moltis-whatsapp::process::SidecarProcess::stop` (same `nix::sys::signal`
//! call, same `tokio::time::timeout` wait-then-kill shape).

use std::{
    path::PathBuf,
    process::Stdio,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use agentim_protocol::{Chunk, ChunkKind, MAX_BUFFER_SIZE, MAX_STDERR_SIZE};
use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, Command},
    sync::{mpsc, Mutex},
    time::Instant,
};
use tracing::{info, warn};

/// Reads from `pipe` if present, otherwise never resolves — lets a
/// `tokio::select!` branch guarded by the pipe's liveness flag stay well
/// typed without unwrapping an `Option` that the guard already proves `Some`.
async fn read_if_open<R: AsyncRead + Unpin>(pipe: Option<&mut R>, buf: &mut [u8]) -> std::io::Result<usize> {
    match pipe {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

use crate::{
    error::AdapterError,
    redaction::redact,
    safe_env::build_child_env,
    traits::{AdapterEvent, AdapterEvents, AgentAdapter, TurnContext},
};

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

pub const DEFAULT_ABSOLUTE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
pub const MIN_ABSOLUTE_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_ABSOLUTE_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

const KILL_GRACE: Duration = Duration::from_secs(5);
const READ_CHUNK_SIZE: usize = 8192;

#[must_use]
fn clamp(value: Duration, min: Duration, max: Duration) -> Duration {
    value.clamp(min, max)
}

/// Configuration for one [`SpawnAdapter`] instance.
#[derive(Debug, Clone)]
pub struct SpawnAdapterConfig {
    /// Human-readable name used in exit-mapping error messages, e.g. "Claude Code".
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Whitelisted from the gateway process's own environment, then scrubbed
    /// by `SafeEnv` (§4.6, I6).
    pub pass_env: Vec<(String, String)>,
    /// Adapter-specific env, applied after scrubbing (can override a passed key).
    pub adapter_env: Vec<(String, String)>,
    pub idle_timeout: Duration,
    pub absolute_timeout: Duration,
}

impl SpawnAdapterConfig {
    #[must_use]
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            pass_env: Vec::new(),
            adapter_env: Vec::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            absolute_timeout: DEFAULT_ABSOLUTE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = clamp(timeout, MIN_IDLE_TIMEOUT, MAX_IDLE_TIMEOUT);
        self
    }

    #[must_use]
    pub fn with_absolute_timeout(mut self, timeout: Duration) -> Self {
        self.absolute_timeout = clamp(timeout, MIN_ABSOLUTE_TIMEOUT, MAX_ABSOLUTE_TIMEOUT);
        self
    }
}

/// A handle the running turn's task holds so `stop()` can signal it without
/// the caller needing the task's `JoinHandle`.
struct RunningTurn {
    stop_tx: mpsc::Sender<()>,
}

/// Spawn-based adapter: invokes `program` as a child process per turn,
/// streams its stdout as text chunks, and enforces idle/absolute timeouts
/// and output-size caps (§4.6).
pub struct SpawnAdapter {
    config: SpawnAdapterConfig,
    running: Arc<Mutex<Option<RunningTurn>>>,
    disposed: AtomicBool,
}

impl SpawnAdapter {
    #[must_use]
    pub fn new(config: SpawnAdapterConfig) -> Self {
        Self { config, running: Arc::new(Mutex::new(None)), disposed: AtomicBool::new(false) }
    }
}

#[async_trait]
impl AgentAdapter for SpawnAdapter {
    async fn send_message(&self, content: &str, context: TurnContext) -> Result<AdapterEvents, AdapterError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(AdapterError::Other("adapter disposed".into()));
        }

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(AdapterError::AlreadyProcessing);
        }

        let env = build_child_env(&self.config.pass_env, &self.config.adapter_env);
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        cmd.env_clear();
        for (k, v) in &env {
            cmd.env(k, v);
        }
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AdapterError::CommandNotFound(self.config.program.clone())
            } else {
                AdapterError::Spawn(e.to_string())
            }
        })?;

        // Write the prompt to stdin and close it so the child sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            let prompt = content.to_string();
            let _ = stdin.write_all(prompt.as_bytes()).await;
            drop(stdin);
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        *running = Some(RunningTurn { stop_tx });
        drop(running);

        let (events_tx, events_rx) = mpsc::channel(256);
        let label = self.config.label.clone();
        let idle_timeout = self.config.idle_timeout;
        let absolute_timeout = self.config.absolute_timeout;
        let running_slot = Arc::clone(&self.running);

        tokio::spawn(run_turn(child, context, label, idle_timeout, absolute_timeout, stop_rx, events_tx, running_slot));

        Ok(events_rx)
    }

    async fn stop(&self) {
        let running = self.running.lock().await;
        if let Some(turn) = running.as_ref() {
            let _ = turn.stop_tx.try_send(());
        }
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop().await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_turn(
    mut child: Child,
    context: TurnContext,
    label: String,
    idle_timeout: Duration,
    absolute_timeout: Duration,
    mut stop_rx: mpsc::Receiver<()>,
    events_tx: mpsc::Sender<AdapterEvent>,
    running_slot: Arc<Mutex<Option<RunningTurn>>>,
) {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let mut stdout_open = stdout.is_some();
    let mut stderr_open = stderr.is_some();
    let mut stdout_buf: Vec<u8> = Vec::new();
    let mut stderr_buf: Vec<u8> = Vec::new();
    let mut idle_deadline = Instant::now() + idle_timeout;
    let absolute_deadline = Instant::now() + absolute_timeout;

    let outcome = loop {
        let mut stdout_chunk = [0u8; READ_CHUNK_SIZE];
        let mut stderr_chunk = [0u8; READ_CHUNK_SIZE];

        tokio::select! {
            biased;

            _ = stop_rx.recv() => {
                kill_with_escalation(&mut child).await;
                break TurnOutcome::Error(AdapterError::KilledBySignal);
            }

            () = tokio::time::sleep_until(absolute_deadline) => {
                kill_with_escalation(&mut child).await;
                break TurnOutcome::Error(AdapterError::AbsoluteTimeout(absolute_timeout.as_secs() / 60));
            }

            () = tokio::time::sleep_until(idle_deadline) => {
                kill_with_escalation(&mut child).await;
                break TurnOutcome::Error(AdapterError::IdleTimeout(idle_timeout.as_secs() / 60));
            }

            result = read_if_open(stdout.as_mut(), &mut stdout_chunk), if stdout_open => {
                match result {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        idle_deadline = Instant::now() + idle_timeout;
                        stdout_buf.extend_from_slice(&stdout_chunk[..n]);
                        if stdout_buf.len() > MAX_BUFFER_SIZE {
                            kill_with_escalation(&mut child).await;
                            break TurnOutcome::Error(AdapterError::OutputTooLarge);
                        }
                        let text = String::from_utf8_lossy(&stdout_chunk[..n]).into_owned();
                        let _ = events_tx.send(AdapterEvent::Chunk(Chunk { kind: ChunkKind::Text, content: text, metadata: None })).await;
                    },
                    Err(error) => {
                        warn!(%error, "error reading child stdout");
                        stdout_open = false;
                    },
                }
            }

            result = read_if_open(stderr.as_mut(), &mut stderr_chunk), if stderr_open => {
                match result {
                    Ok(0) => stderr_open = false,
                    Ok(n) => {
                        idle_deadline = Instant::now() + idle_timeout;
                        stderr_buf.extend_from_slice(&stderr_chunk[..n]);
                        if stderr_buf.len() > MAX_STDERR_SIZE {
                            kill_with_escalation(&mut child).await;
                            break TurnOutcome::Error(AdapterError::OutputTooLarge);
                        }
                    },
                    Err(error) => {
                        warn!(%error, "error reading child stderr");
                        stderr_open = false;
                    },
                }
            }

            status = child.wait(), if !stdout_open && !stderr_open => {
                break map_exit(status, &label, &stdout_buf);
            }
        }
    };

    let outcome = match outcome {
        TurnOutcome::Error(err) => {
            let stderr_text = redact(&String::from_utf8_lossy(&stderr_buf));
            if !stderr_text.trim().is_empty() {
                info!(room_id = %context.room_id, agent_id = %context.agent_id, stderr = %stderr_text, "child stderr at failure");
            }
            AdapterEvent::Error { message: err.to_string() }
        },
        TurnOutcome::Complete(full_content) => AdapterEvent::Complete { full_content },
    };
    // Clear the running slot before handing the terminal event to the
    // caller, so a `send_message` racing right behind the Complete/Error
    // observation is never rejected as still-processing.
    *running_slot.lock().await = None;
    let _ = events_tx.send(outcome).await;
}

enum TurnOutcome {
    Complete(String),
    Error(AdapterError),
}

fn map_exit(status: std::io::Result<std::process::ExitStatus>, label: &str, stdout_buf: &[u8]) -> TurnOutcome {
    let full_content = String::from_utf8_lossy(stdout_buf).into_owned();
    match status {
        Ok(status) if status.success() => TurnOutcome::Complete(full_content),
        Ok(status) => match status.code() {
            Some(code) => TurnOutcome::Error(AdapterError::NonZeroExit { label: label.to_string(), code }),
            None => TurnOutcome::Error(AdapterError::KilledBySignal),
        },
        Err(error) => TurnOutcome::Error(AdapterError::Other(error.to_string())),
    }
}

/// SIGTERM → 5s grace → SIGKILL (§4.6, S7). `nix::sys::signal::kill` is the
/// same call the teacher's `SidecarProcess::stop` uses.
async fn kill_with_escalation(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::{
            sys::signal::{kill, Signal},
            unistd::Pid,
        };
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.kill().await;
    }

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(_) => {},
        Err(_) => {
            let _ = child.kill().await;
        },
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn ctx() -> TurnContext {
        TurnContext { room_id: "r1".into(), agent_id: "a1".into(), message_id: "m1".into() }
    }

    async fn drain(mut rx: AdapterEvents) -> Vec<AdapterEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn completes_with_full_stdout_on_exit_zero() {
        let config = SpawnAdapterConfig::new("echo", "sh").with_idle_timeout(StdDuration::from_secs(30));
        let mut config = config;
        config.args = vec!["-c".into(), "cat; echo".into()];
        let adapter = SpawnAdapter::new(config);
        let rx = adapter.send_message("hello there", ctx()).await.unwrap();
        let events = drain(rx).await;
        match events.last() {
            Some(AdapterEvent::Complete { full_content }) => assert!(full_content.contains("hello there")),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_reports_code() {
        let mut config = SpawnAdapterConfig::new("false-exit", "sh");
        config.args = vec!["-c".into(), "exit 7".into()];
        let adapter = SpawnAdapter::new(config);
        let rx = adapter.send_message("x", ctx()).await.unwrap();
        let events = drain(rx).await;
        match events.last() {
            Some(AdapterEvent::Error { message }) => assert!(message.contains("exited with code 7")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn command_not_found_is_friendly() {
        let config = SpawnAdapterConfig::new("missing", "definitely-not-a-real-binary-xyz");
        let adapter = SpawnAdapter::new(config);
        let err = adapter.send_message("x", ctx()).await.unwrap_err();
        assert!(matches!(err, AdapterError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn second_send_message_fails_fast_while_running() {
        let mut config = SpawnAdapterConfig::new("slow", "sh");
        config.args = vec!["-c".into(), "sleep 0.3".into()];
        let adapter = Arc::new(SpawnAdapter::new(config));
        let _rx = adapter.send_message("x", ctx()).await.unwrap();
        let second = adapter.send_message("y", ctx()).await;
        assert!(matches!(second, Err(AdapterError::AlreadyProcessing)));
    }

    #[tokio::test]
    async fn absolute_timeout_kills_and_reports() {
        let mut config = SpawnAdapterConfig::new("sleeper", "sh");
        config.args = vec!["-c".into(), "sleep 5".into()];
        config.absolute_timeout = StdDuration::from_millis(100);
        config.idle_timeout = StdDuration::from_secs(30);
        // Bypass the public clamp to exercise a realistically short timeout in tests.
        let adapter = SpawnAdapter::new(config);
        let rx = adapter.send_message("x", ctx()).await.unwrap();
        let events = drain(rx).await;
        match events.last() {
            Some(AdapterEvent::Error { message }) => assert!(message.contains("absolute timeout")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_kills_running_child() {
        let mut config = SpawnAdapterConfig::new("sleeper", "sh");
        config.args = vec!["-c".into(), "sleep 5".into()];
        let adapter = Arc::new(SpawnAdapter::new(config));
        let rx = adapter.send_message("x", ctx()).await.unwrap();
        adapter.stop().await;
        let events = drain(rx).await;
        match events.last() {
            Some(AdapterEvent::Error { message }) => assert!(message.contains("killed by signal")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn clamp_enforces_idle_bounds() {
        let too_small = clamp(Duration::from_secs(1), MIN_IDLE_TIMEOUT, MAX_IDLE_TIMEOUT);
        assert_eq!(too_small, MIN_IDLE_TIMEOUT);
        let too_large = clamp(Duration::from_secs(999_999), MIN_IDLE_TIMEOUT, MAX_IDLE_TIMEOUT);
        assert_eq!(too_large, MAX_IDLE_TIMEOUT);
    }
}
