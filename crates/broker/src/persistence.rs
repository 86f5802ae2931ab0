//! The persistence/membership collaborator the Broker delegates to (§1, §4.4).
//!
//! Message storage, room membership, and presence records are explicitly out
//! of scope as *functionality* — this trait is the seam the Broker consults
//! instead of owning that state itself. Production wiring (a database-backed
//! implementation) is an external-collaborator concern; the core only
//! depends on this trait so the dispatch logic stays testable against a
//! fake.

use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    User,
    Agent,
}

#[derive(Debug, Clone)]
pub struct RoomMember {
    pub member_id: String,
    pub member_type: MemberType,
    #[allow(dead_code)]
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub members: Vec<RoomMember>,
    pub broadcast_mode: bool,
}

#[async_trait]
pub trait Persistence: Send + Sync {
    /// Appends a user-authored message to room history, returning the
    /// assigned message id.
    async fn append_user_message(
        &self,
        room_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
        content: &str,
    ) -> Result<agentim_protocol::Message, String>;

    /// Appends a completed agent message once its streaming turn closes.
    async fn append_agent_message(
        &self,
        room_id: &str,
        agent_id: &str,
        message_id: &str,
        full_content: &str,
    ) -> Result<agentim_protocol::Message, String>;

    /// Current membership and broadcast-mode flag for a room.
    async fn room_info(&self, room_id: &str) -> Result<RoomInfo, String>;

    /// Whether `user_id` is a member of `room_id`, consulted by join/leave.
    async fn verify_membership(&self, room_id: &str, user_id: &str) -> Result<bool, String>;

    async fn mark_agent_online(&self, agent_id: &str, online: bool) -> Result<(), String>;

    async fn update_agent_status(&self, agent_id: &str, status: &str) -> Result<(), String>;
}
