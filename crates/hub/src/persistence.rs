//! In-memory stand-in for the [`Persistence`] collaborator (§1, §4.4).
//!
//! Message history, room membership, and agent presence are explicitly out
//! of scope as *functionality* — a real deployment wires the [`Persistence`]
//! trait to a database. This implementation exists only so the hub binary
//! runs standalone: rooms are created implicitly on first join, every room
//! is broadcast-mode, and every currently-registered agent is considered a
//! member of every room. None of this survives a restart.

use std::{
    collections::{HashMap, HashSet},
    sync::atomic::{AtomicU64, Ordering},
};

use agentim_broker::{MemberType, Persistence, RoomInfo, RoomMember};
use agentim_protocol::{Message, SenderType};
use async_trait::async_trait;
use tokio::sync::RwLock;

#[derive(Default)]
struct Room {
    user_members: HashSet<String>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct InMemoryPersistence {
    rooms: RwLock<HashMap<String, Room>>,
    online_agents: RwLock<HashSet<String>>,
    next_message_id: AtomicU64,
}

impl InMemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        let n = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        format!("msg-{n}")
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn append_user_message(
        &self,
        room_id: &str,
        sender_id: &str,
        sender_name: Option<&str>,
        content: &str,
    ) -> Result<Message, String> {
        let message = agentim_broker::dispatch::stamp_message(
            self.next_id(),
            room_id.to_string(),
            sender_id.to_string(),
            SenderType::User,
            sender_name.map(str::to_string),
            content.to_string(),
        );
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_default();
        room.user_members.insert(sender_id.to_string());
        room.messages.push(message.clone());
        Ok(message)
    }

    async fn append_agent_message(
        &self,
        room_id: &str,
        agent_id: &str,
        message_id: &str,
        full_content: &str,
    ) -> Result<Message, String> {
        let message = agentim_broker::dispatch::stamp_message(
            message_id.to_string(),
            room_id.to_string(),
            agent_id.to_string(),
            SenderType::Agent,
            None,
            full_content.to_string(),
        );
        self.rooms.write().await.entry(room_id.to_string()).or_default().messages.push(message.clone());
        Ok(message)
    }

    async fn room_info(&self, room_id: &str) -> Result<RoomInfo, String> {
        let rooms = self.rooms.read().await;
        let user_members = rooms.get(room_id).map(|r| r.user_members.clone()).unwrap_or_default();
        let online_agents = self.online_agents.read().await;

        let mut members: Vec<RoomMember> = user_members
            .into_iter()
            .map(|member_id| RoomMember { member_id, member_type: MemberType::User, role: "member".into() })
            .collect();
        members.extend(online_agents.iter().map(|agent_id| RoomMember {
            member_id: agent_id.clone(),
            member_type: MemberType::Agent,
            role: "agent".into(),
        }));

        Ok(RoomInfo { members, broadcast_mode: true })
    }

    async fn verify_membership(&self, room_id: &str, user_id: &str) -> Result<bool, String> {
        self.rooms.write().await.entry(room_id.to_string()).or_default().user_members.insert(user_id.to_string());
        Ok(true)
    }

    async fn mark_agent_online(&self, agent_id: &str, online: bool) -> Result<(), String> {
        let mut online_agents = self.online_agents.write().await;
        if online {
            online_agents.insert(agent_id.to_string());
        } else {
            online_agents.remove(agent_id);
        }
        Ok(())
    }

    async fn update_agent_status(&self, _agent_id: &str, _status: &str) -> Result<(), String> {
        Ok(())
    }
}
