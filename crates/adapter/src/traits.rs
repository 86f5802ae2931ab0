//! The adapter base contract shared by every agent type (§4.6).
//!
//! `send_message`/`stop`/`dispose` map the source's async-callback
//! (`onChunk`/`onComplete`/`onError`) triad onto a bounded channel per turn
//! (§9 translation notes): the returned [`AdapterEvents`] receiver yields
//! chunks until it closes on [`AdapterEvent::Complete`] or
//! [`AdapterEvent::Error`].

use agentim_protocol::Chunk;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::AdapterError;

/// Everything an adapter needs to know about the turn it is about to run.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub room_id: String,
    pub agent_id: String,
    pub message_id: String,
}

/// One event in a turn's chunk stream.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Chunk(Chunk),
    /// Terminal: the full accumulated text of the turn.
    Complete { full_content: String },
    /// Terminal: the turn failed; no further events follow.
    Error { message: String },
}

pub type AdapterEvents = mpsc::Receiver<AdapterEvent>;

/// The contract every agent-type adapter implements (§4.6).
///
/// At most one `send_message` call may be in flight per adapter instance;
/// a second call while one is running must fail fast with
/// [`AdapterError::AlreadyProcessing`] without side effects (§5 "Shared
/// resource policy").
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Starts a turn, returning a channel the caller drains for chunks
    /// until it observes (or the channel implies) [`AdapterEvent::Complete`]
    /// or [`AdapterEvent::Error`].
    async fn send_message(&self, content: &str, context: TurnContext) -> Result<AdapterEvents, AdapterError>;

    /// Best-effort cancellation of the in-flight turn, if any.
    async fn stop(&self);

    /// Terminal cleanup. Idempotent — safe to call more than once.
    async fn dispose(&self);
}
