//! The Broker/Router: single dispatch function per inbound frame, room
//! fan-out, the streaming-turn state machine, and the permission store
//! (§4.4, §4.7).

pub mod dispatch;
pub mod error;
pub mod outbound;
pub mod permission_store;
pub mod persistence;
pub mod streaming_turn;

pub use dispatch::Broker;
pub use error::BrokerError;
pub use outbound::Outbound;
pub use permission_store::{PermissionError, PermissionStore, MAX_PENDING};
pub use persistence::{MemberType, Persistence, RoomInfo, RoomMember};
pub use streaming_turn::{StreamingTurnRegistry, TurnOutcome, TurnState};
