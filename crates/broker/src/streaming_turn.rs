//! Per-(room, agent) streaming turn state machine (§3 `StreamingTurn`, §4.4).
//!
//! ```text
//!   none → streaming [first chunk]
//!   streaming → streaming [further chunks]
//!   streaming → done [message_complete]
//!   streaming → failed [turn.failed or gateway disconnect]
//!   done / failed are terminal; further chunks with the same key are dropped.
//! ```
//!
//! The "none" state is represented by the key's absence from the registry —
//! there is no explicit variant for it.

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Streaming,
    Done,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StreamingTurn {
    pub message_id: String,
    /// The gateway socket this turn is streaming through, so a gateway
    /// disconnect can fail every turn it owned.
    pub gateway_conn_id: String,
    pub state: TurnState,
    pub last_chunk_at_ms: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// What a caller should do with an incoming chunk/completion/failure after
/// consulting the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// First chunk — a new turn was opened; forward the chunk.
    Opened,
    /// A later chunk on an already-open turn; forward the chunk.
    Continued,
    /// The turn had already reached a terminal state; drop silently (§4.4).
    Dropped,
}

#[derive(Default)]
pub struct StreamingTurnRegistry {
    turns: RwLock<HashMap<(String, String), StreamingTurn>>,
}

impl StreamingTurnRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a chunk for `(room_id, agent_id)`. Returns [`TurnOutcome`]
    /// telling the caller whether to forward it.
    pub async fn on_chunk(&self, room_id: &str, agent_id: &str, gateway_conn_id: &str, message_id: &str) -> TurnOutcome {
        let key = (room_id.to_string(), agent_id.to_string());
        let mut turns = self.turns.write().await;
        match turns.get_mut(&key) {
            None => {
                turns.insert(key, StreamingTurn {
                    message_id: message_id.to_string(),
                    gateway_conn_id: gateway_conn_id.to_string(),
                    state: TurnState::Streaming,
                    last_chunk_at_ms: now_ms(),
                });
                TurnOutcome::Opened
            },
            Some(turn) if turn.state == TurnState::Streaming => {
                turn.last_chunk_at_ms = now_ms();
                TurnOutcome::Continued
            },
            Some(_) => TurnOutcome::Dropped,
        }
    }

    /// Closes a turn on `message_complete`. Returns `true` if it was open
    /// (the common case) so the caller knows to actually persist/fan out.
    pub async fn on_complete(&self, room_id: &str, agent_id: &str) -> bool {
        let key = (room_id.to_string(), agent_id.to_string());
        let mut turns = self.turns.write().await;
        match turns.get_mut(&key) {
            Some(turn) if turn.state == TurnState::Streaming => {
                turn.state = TurnState::Done;
                true
            },
            _ => false,
        }
    }

    /// Marks a turn failed (explicit `turn.failed` or a gateway disconnect).
    pub async fn fail(&self, room_id: &str, agent_id: &str) {
        let key = (room_id.to_string(), agent_id.to_string());
        if let Some(turn) = self.turns.write().await.get_mut(&key) {
            turn.state = TurnState::Failed;
        }
    }

    /// Fails every open turn owned by `gateway_conn_id` (gateway disconnect cascade).
    pub async fn fail_all_for_gateway(&self, gateway_conn_id: &str) {
        let mut turns = self.turns.write().await;
        for turn in turns.values_mut() {
            if turn.gateway_conn_id == gateway_conn_id && turn.state == TurnState::Streaming {
                turn.state = TurnState::Failed;
            }
        }
    }

    /// Drops a terminal entry, freeing its memory once the caller has
    /// finished reacting to it (e.g. after forwarding `message_complete`).
    pub async fn clear(&self, room_id: &str, agent_id: &str) {
        let key = (room_id.to_string(), agent_id.to_string());
        self.turns.write().await.remove(&key);
    }

    pub async fn state(&self, room_id: &str, agent_id: &str) -> Option<TurnState> {
        let key = (room_id.to_string(), agent_id.to_string());
        self.turns.read().await.get(&key).map(|t| t.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_chunk_opens_then_further_chunks_continue() {
        let registry = StreamingTurnRegistry::new();
        assert_eq!(registry.on_chunk("r1", "a1", "g1", "m1").await, TurnOutcome::Opened);
        assert_eq!(registry.on_chunk("r1", "a1", "g1", "m1").await, TurnOutcome::Continued);
        assert_eq!(registry.state("r1", "a1").await, Some(TurnState::Streaming));
    }

    #[tokio::test]
    async fn chunks_after_completion_are_dropped() {
        let registry = StreamingTurnRegistry::new();
        registry.on_chunk("r1", "a1", "g1", "m1").await;
        assert!(registry.on_complete("r1", "a1").await);
        assert_eq!(registry.on_chunk("r1", "a1", "g1", "m1").await, TurnOutcome::Dropped);
    }

    #[tokio::test]
    async fn gateway_disconnect_fails_only_its_own_open_turns() {
        let registry = StreamingTurnRegistry::new();
        registry.on_chunk("r1", "a1", "g1", "m1").await;
        registry.on_chunk("r2", "a2", "g2", "m2").await;
        registry.fail_all_for_gateway("g1").await;
        assert_eq!(registry.state("r1", "a1").await, Some(TurnState::Failed));
        assert_eq!(registry.state("r2", "a2").await, Some(TurnState::Streaming));
    }

    #[tokio::test]
    async fn at_most_one_turn_per_room_agent_key() {
        let registry = StreamingTurnRegistry::new();
        registry.on_chunk("r1", "a1", "g1", "m1").await;
        // A second "open" attempt for the same key while streaming continues, not re-opens.
        assert_eq!(registry.on_chunk("r1", "a1", "g1", "m1-dup").await, TurnOutcome::Continued);
    }
}
