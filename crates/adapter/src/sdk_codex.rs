//! Codex-style SDK adapter (§4.6): wraps an in-process agent SDK that
//! speaks a typed event stream instead of line-oriented stdio, and
//! resumes a conversation by an opaque thread id instead of re-sending
//! history.
//!
//! No teacher module wraps a thread-resumable SDK directly; the async
//! event-stream shape is grounded on `moltis-agents::model::LlmProvider`'s
//! boxed `Stream` of provider events, adapted here to the fixed SDK event
//! vocabulary this adapter maps from (session-started, agent message,
//! reasoning, shell command, file change, MCP tool call, web search, todo
//! list, error).

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use agentim_protocol::{Chunk, ChunkKind};
use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::{
    error::AdapterError,
    traits::{AdapterEvent, AdapterEvents, AgentAdapter, TurnContext},
};

/// The SDK's permission callback does not exist yet (§4.6); this is the
/// two-value substitute the spec settles on until the SDK grows one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    Never,
    OnRequest,
}

/// Mirrors the hub's coarse permission level (§4, permission prompts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionLevel {
    Bypass,
    Prompt,
}

impl ApprovalPolicy {
    /// Resolved per the Open Question decision: `bypass` forces `never`;
    /// anything else gets `on-request`, with a one-time warning logged by
    /// the caller the first time that happens (see [`CodexAdapter::new`]).
    #[must_use]
    pub fn from_permission_level(level: PermissionLevel) -> Self {
        match level {
            PermissionLevel::Bypass => Self::Never,
            PermissionLevel::Prompt => Self::OnRequest,
        }
    }
}

/// A single event as emitted by the underlying SDK's session stream. The
/// real SDK binding produces a richer type; this is the subset this
/// adapter maps into [`AdapterEvent`]s.
#[derive(Debug, Clone)]
pub enum SdkEvent {
    SessionStarted { thread_id: String },
    AgentMessage { text: String },
    Reasoning { text: String },
    ShellCommand { command: String, aggregated_output: String },
    FileChange { summary: String },
    McpToolCall { tool: String, arguments: serde_json::Value },
    WebSearch { query: String },
    TodoList { items: Vec<(String, bool)> },
    Error { message: String },
    Completed,
}

/// Spawns a session and drives its event stream. Implemented by the real
/// SDK binding; faked in tests.
#[async_trait]
pub trait CodexSession: Send + Sync {
    /// Starts a new turn, optionally resuming `thread_id` from a prior one.
    /// Returns a channel of [`SdkEvent`]s terminated by `Completed` or `Error`.
    async fn start_turn(
        &self,
        prompt: &str,
        thread_id: Option<String>,
        approval_policy: ApprovalPolicy,
    ) -> Result<mpsc::Receiver<SdkEvent>, AdapterError>;

    /// Best-effort: asks the SDK to stop emitting further events for the
    /// current turn, if it supports doing so. The SDK has no cancellation
    /// primitive today (§4.6), so implementations may no-op.
    async fn cancel(&self);
}

/// Adapts a [`CodexSession`] to the common [`AgentAdapter`] contract.
pub struct CodexAdapter<S: CodexSession> {
    session: Arc<S>,
    approval_policy: ApprovalPolicy,
    thread_id: Arc<Mutex<Option<String>>>,
    busy: Arc<AtomicBool>,
    warned_on_request: AtomicBool,
}

impl<S: CodexSession> CodexAdapter<S> {
    #[must_use]
    pub fn new(session: Arc<S>, permission_level: PermissionLevel) -> Self {
        let approval_policy = ApprovalPolicy::from_permission_level(permission_level);
        Self {
            session,
            approval_policy,
            thread_id: Arc::new(Mutex::new(None)),
            busy: Arc::new(AtomicBool::new(false)),
            warned_on_request: AtomicBool::new(false),
        }
    }

    fn warn_on_request_once(&self) {
        if self.approval_policy == ApprovalPolicy::OnRequest && !self.warned_on_request.swap(true, Ordering::SeqCst) {
            warn!("Codex SDK has no permission callback; falling back to approvalPolicy=on-request, which will block a non-interactive runtime on the first prompt");
        }
    }
}

#[async_trait]
impl<S: CodexSession + 'static> AgentAdapter for CodexAdapter<S> {
    async fn send_message(&self, content: &str, _context: TurnContext) -> Result<AdapterEvents, AdapterError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyProcessing);
        }
        self.warn_on_request_once();

        let thread_id = self.thread_id.lock().await.clone();
        let sdk_events = match self.session.start_turn(content, thread_id, self.approval_policy).await {
            Ok(rx) => rx,
            Err(err) => {
                self.busy.store(false, Ordering::SeqCst);
                return Err(err);
            },
        };

        let (events_tx, events_rx) = mpsc::channel(256);
        // Relay runs on its own task so `send_message` returns the receiver
        // immediately — draining a turn with more events than the channel's
        // capacity would otherwise deadlock waiting for a reader that can't
        // exist yet (nothing has the receiver until this call returns).
        tokio::spawn(relay_turn(sdk_events, events_tx, Arc::clone(&self.thread_id), Arc::clone(&self.busy)));

        Ok(events_rx)
    }

    async fn stop(&self) {
        // Discards interest in further events but keeps the captured thread
        // id so the next `send_message` can still resume (§4.6).
        self.session.cancel().await;
        self.busy.store(false, Ordering::SeqCst);
    }

    async fn dispose(&self) {
        self.stop().await;
        *self.thread_id.lock().await = None;
    }
}

fn text_chunk(kind: ChunkKind, content: String) -> Chunk {
    Chunk { kind, content, metadata: None }
}

/// Drains one turn's SDK event stream, relaying each as an [`AdapterEvent`]
/// and updating the shared thread-id/busy state, until a terminal event or
/// the SDK stream closes unexpectedly.
async fn relay_turn(
    mut sdk_events: mpsc::Receiver<SdkEvent>,
    events_tx: mpsc::Sender<AdapterEvent>,
    thread_id: Arc<Mutex<Option<String>>>,
    busy: Arc<AtomicBool>,
) {
    let mut full_content = String::new();
    while let Some(event) = sdk_events.recv().await {
        match event {
            SdkEvent::SessionStarted { thread_id: new_thread_id } => {
                *thread_id.lock().await = Some(new_thread_id);
            },
            SdkEvent::AgentMessage { text } => {
                full_content.push_str(&text);
                let _ = events_tx.send(AdapterEvent::Chunk(text_chunk(ChunkKind::Text, text))).await;
            },
            SdkEvent::Reasoning { text } => {
                let _ = events_tx.send(AdapterEvent::Chunk(text_chunk(ChunkKind::Thinking, text))).await;
            },
            SdkEvent::ShellCommand { command, aggregated_output } => {
                let content = format!("$ {command}\n{aggregated_output}");
                let _ = events_tx.send(AdapterEvent::Chunk(text_chunk(ChunkKind::ToolUse, content))).await;
            },
            SdkEvent::FileChange { summary } => {
                let _ = events_tx.send(AdapterEvent::Chunk(text_chunk(ChunkKind::ToolResult, summary))).await;
            },
            SdkEvent::McpToolCall { tool, arguments } => {
                let chunk = Chunk { kind: ChunkKind::ToolUse, content: tool.clone(), metadata: Some(json!({ "tool": tool, "arguments": arguments })) };
                let _ = events_tx.send(AdapterEvent::Chunk(chunk)).await;
            },
            SdkEvent::WebSearch { query } => {
                let _ = events_tx.send(AdapterEvent::Chunk(text_chunk(ChunkKind::ToolUse, format!("web search: {query}")))).await;
            },
            SdkEvent::TodoList { items } => {
                let rendered = items
                    .into_iter()
                    .map(|(label, done)| format!("- [{}] {label}", if done { "x" } else { " " }))
                    .collect::<Vec<_>>()
                    .join("\n");
                let _ = events_tx.send(AdapterEvent::Chunk(text_chunk(ChunkKind::Text, rendered))).await;
            },
            SdkEvent::Error { message } => {
                busy.store(false, Ordering::SeqCst);
                let _ = events_tx.send(AdapterEvent::Error { message }).await;
                return;
            },
            SdkEvent::Completed => {
                busy.store(false, Ordering::SeqCst);
                let _ = events_tx.send(AdapterEvent::Complete { full_content: full_content.clone() }).await;
                return;
            },
        }
    }

    // The SDK stream closed without an explicit terminal event.
    busy.store(false, Ordering::SeqCst);
    let _ = events_tx.send(AdapterEvent::Complete { full_content }).await;
}
