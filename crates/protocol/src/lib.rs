//! Hub WebSocket wire protocol.
//!
//! All frames are JSON objects with a mandatory `type` field, tagged
//! `"<direction>:<verb>"`. Two closed envelope sets exist for inbound frames
//! (`ClientFrame`, `GatewayFrame`) and two for outbound frames
//! (`ServerToClientFrame`, `ServerToGatewayFrame`).

use serde::{Deserialize, Serialize};

pub mod limits;

pub use limits::{check_frame_size, check_nested_value, LimitError};

// ── Constants ────────────────────────────────────────────────────────────────

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_BUFFER_SIZE: usize = 64 * 1024; // 64 KiB
pub const MAX_STDERR_SIZE: usize = 5 * 1024 * 1024; // 5 MiB
pub const MAX_JSON_DEPTH: usize = 32;
pub const MAX_COLLECTION_SIZE: usize = 1000;

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const MESSAGE_TOO_LARGE: &str = "MESSAGE_TOO_LARGE";
    pub const PROTOCOL_VERSION_MISMATCH: &str = "PROTOCOL_VERSION_MISMATCH";
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const TOKEN_REVOKED: &str = "TOKEN_REVOKED";
    pub const INVALID_TOKEN_TYPE: &str = "INVALID_TOKEN_TYPE";
    pub const ALREADY_PROCESSING: &str = "ALREADY_PROCESSING";
}

// ── Shared payload types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderType {
    User,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "roomId")]
    pub room_id: String,
    #[serde(rename = "senderId")]
    pub sender_id: String,
    #[serde(rename = "senderType")]
    pub sender_type: SenderType,
    #[serde(rename = "senderName", skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    #[serde(rename = "createdAtMs")]
    pub created_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDecision {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub id: String,
    pub name: String,
    #[serde(rename = "agentType")]
    pub agent_type: String,
    #[serde(rename = "workingDir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

// ── Client → server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "client:auth")]
    Auth { token: String },

    #[serde(rename = "client:join_room")]
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "client:leave_room")]
    LeaveRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "client:send_message")]
    SendMessage {
        #[serde(rename = "roomId")]
        room_id: String,
        content: String,
        #[serde(default)]
        mentions: Vec<String>,
    },

    #[serde(rename = "client:stop_generation")]
    StopGeneration {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
    },

    #[serde(rename = "client:permission_response")]
    PermissionResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        decision: PermissionDecision,
    },
}

// ── Gateway → server ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GatewayFrame {
    #[serde(rename = "gateway:auth")]
    Auth {
        token: String,
        #[serde(rename = "gatewayId")]
        gateway_id: String,
        #[serde(rename = "protocolVersion")]
        protocol_version: u32,
        #[serde(rename = "deviceInfo", skip_serializing_if = "Option::is_none")]
        device_info: Option<DeviceInfo>,
        #[serde(default)]
        ephemeral: bool,
    },

    #[serde(rename = "gateway:register_agent")]
    RegisterAgent { agent: AgentRegistration },

    #[serde(rename = "gateway:unregister_agent")]
    UnregisterAgent {
        #[serde(rename = "agentId")]
        agent_id: String,
    },

    #[serde(rename = "gateway:agent_status")]
    AgentStatus {
        #[serde(rename = "agentId")]
        agent_id: String,
        status: String,
    },

    #[serde(rename = "gateway:message_chunk")]
    MessageChunk {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "messageId")]
        message_id: String,
        chunk: Chunk,
    },

    #[serde(rename = "gateway:message_complete")]
    MessageComplete {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "fullContent")]
        full_content: String,
    },

    #[serde(rename = "gateway:permission_request")]
    PermissionRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
        summary: String,
        #[serde(rename = "expiresAtMs")]
        expires_at_ms: u64,
    },
}

// ── Server → client ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerToClientFrame {
    #[serde(rename = "server:auth_result")]
    AuthResult {
        ok: bool,
        #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "server:new_message")]
    NewMessage { message: Message },

    #[serde(rename = "server:message_chunk")]
    MessageChunk {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "messageId")]
        message_id: String,
        chunk: Chunk,
    },

    #[serde(rename = "server:message_complete")]
    MessageComplete { message: Message },

    #[serde(rename = "server:room_removed")]
    RoomRemoved {
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "server:permission_request")]
    PermissionRequest {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
        summary: String,
        #[serde(rename = "expiresAtMs")]
        expires_at_ms: u64,
    },

    #[serde(rename = "server:error")]
    Error { code: String, message: String },
}

// ── Server → gateway ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerToGatewayFrame {
    #[serde(rename = "server:gateway_auth_result")]
    GatewayAuthResult {
        ok: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    #[serde(rename = "server:send_to_agent")]
    SendToAgent {
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "messageId")]
        message_id: String,
        content: String,
    },

    #[serde(rename = "server:stop_agent")]
    StopAgent {
        #[serde(rename = "agentId")]
        agent_id: String,
        #[serde(rename = "roomId")]
        room_id: String,
    },

    #[serde(rename = "server:remove_agent")]
    RemoveAgent {
        #[serde(rename = "agentId")]
        agent_id: String,
    },

    #[serde(rename = "server:room_context")]
    RoomContext {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
        system_prompt: Option<String>,
    },

    #[serde(rename = "server:permission_response")]
    PermissionResponse {
        #[serde(rename = "requestId")]
        request_id: String,
        decision: PermissionDecision,
    },

    #[serde(rename = "server:agent_command")]
    AgentCommand {
        #[serde(rename = "agentId")]
        agent_id: String,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        args: Option<serde_json::Value>,
    },

    #[serde(rename = "server:query_agent_info")]
    QueryAgentInfo {
        #[serde(rename = "agentId")]
        agent_id: String,
    },

    #[serde(rename = "server:spawn_agent")]
    SpawnAgent { agent: AgentRegistration },

    #[serde(rename = "server:error")]
    Error { code: String, message: String },
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_auth_round_trips() {
        let frame = ClientFrame::Auth {
            token: "tok".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"client:auth\""));
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        matches!(back, ClientFrame::Auth { token } if token == "tok");
    }

    #[test]
    fn send_message_defaults_mentions() {
        let json = r#"{"type":"client:send_message","roomId":"r1","content":"hi"}"#;
        let frame: ClientFrame = serde_json::from_str(json).unwrap();
        match frame {
            ClientFrame::SendMessage { mentions, .. } => assert!(mentions.is_empty()),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn gateway_auth_defaults_ephemeral_false() {
        let json = r#"{"type":"gateway:auth","token":"t","gatewayId":"g1","protocolVersion":1}"#;
        let frame: GatewayFrame = serde_json::from_str(json).unwrap();
        match frame {
            GatewayFrame::Auth { ephemeral, .. } => assert!(!ephemeral),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let json = r#"{"type":"client:bogus"}"#;
        let result: Result<ClientFrame, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn server_error_round_trips() {
        let frame = ServerToClientFrame::Error {
            code: error_codes::MESSAGE_TOO_LARGE.into(),
            message: "too big".into(),
        };
        let json = serde_json::to_string(&frame).unwrap();
        let back: ServerToClientFrame = serde_json::from_str(&json).unwrap();
        match back {
            ServerToClientFrame::Error { code, .. } => assert_eq!(code, error_codes::MESSAGE_TOO_LARGE),
            _ => panic!("wrong variant"),
        }
    }
}
