//! Single dispatch function per inbound frame (§4.4).

use std::sync::Arc;

use agentim_auth::{TokenType, TokenVerifier};
use agentim_protocol::{
    error_codes, Chunk, ClientFrame, GatewayFrame, Message, PermissionDecision, SenderType,
    ServerToClientFrame, ServerToGatewayFrame, MAX_BUFFER_SIZE,
};
use agentim_registry::ConnectionRegistry;
use tracing::{info, warn};

use crate::{
    error::BrokerError,
    outbound::Outbound,
    permission_store::PermissionStore,
    persistence::{MemberType, Persistence},
    streaming_turn::{StreamingTurnRegistry, TurnOutcome},
};

/// The Broker/Router (§4.4): owns no socket handles itself, only the
/// mechanics of turning one inbound frame into registry mutations and
/// outbound frames. One instance is shared across the whole hub process.
pub struct Broker {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<TokenVerifier>,
    persistence: Arc<dyn Persistence>,
    outbound: Arc<dyn Outbound>,
    turns: StreamingTurnRegistry,
    permissions: Arc<PermissionStore>,
}

impl Broker {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        verifier: Arc<TokenVerifier>,
        persistence: Arc<dyn Persistence>,
        outbound: Arc<dyn Outbound>,
        permissions: Arc<PermissionStore>,
    ) -> Self {
        Self {
            registry,
            verifier,
            persistence,
            outbound,
            turns: StreamingTurnRegistry::new(),
            permissions,
        }
    }

    #[must_use]
    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    // ── Client → server ──────────────────────────────────────────────────

    pub async fn handle_client_frame(&self, conn_id: &str, frame: ClientFrame) {
        let result = match frame {
            ClientFrame::Auth { token } => self.client_auth(conn_id, &token).await,
            ClientFrame::JoinRoom { room_id } => self.join_room(conn_id, &room_id).await,
            ClientFrame::LeaveRoom { room_id } => self.leave_room(conn_id, &room_id).await,
            ClientFrame::SendMessage { room_id, content, mentions } => {
                self.send_message(conn_id, &room_id, &content, &mentions).await
            },
            ClientFrame::StopGeneration { room_id, agent_id } => {
                self.stop_generation(&room_id, &agent_id).await
            },
            ClientFrame::PermissionResponse { request_id, decision } => {
                self.permission_response(&request_id, decision).await
            },
        };

        if let Err(err) = result {
            let (code, message) = err.wire();
            warn!(conn_id, error = %err, "client frame dispatch failed");
            self.outbound
                .send_to_client(conn_id, &ServerToClientFrame::Error { code: code.into(), message });
        }
    }

    async fn client_auth(&self, conn_id: &str, token: &str) -> Result<(), BrokerError> {
        let verified = self.verifier.verify(token, Some(TokenType::Access)).await;
        let frame = match verified {
            Ok(claims) => {
                self.registry
                    .add_client(conn_id.to_string(), claims.sub.clone(), Some(claims.username))
                    .await?;
                ServerToClientFrame::AuthResult { ok: true, user_id: Some(claims.sub), error: None }
            },
            Err(e) => ServerToClientFrame::AuthResult { ok: false, user_id: None, error: Some(e.wire_message().into()) },
        };
        self.outbound.send_to_client(conn_id, &frame);
        Ok(())
    }

    async fn join_room(&self, conn_id: &str, room_id: &str) -> Result<(), BrokerError> {
        let client = self.registry.client(conn_id).await.ok_or(BrokerError::NotBound)?;
        let is_member = self
            .persistence
            .verify_membership(room_id, &client.user_id)
            .await
            .map_err(BrokerError::Persistence)?;
        if !is_member {
            return Err(BrokerError::Persistence("not a member of this room".into()));
        }
        self.registry.join_room(conn_id, room_id).await?;
        Ok(())
    }

    async fn leave_room(&self, conn_id: &str, room_id: &str) -> Result<(), BrokerError> {
        self.registry.leave_room(conn_id, room_id).await?;
        Ok(())
    }

    async fn send_message(&self, conn_id: &str, room_id: &str, content: &str, mentions: &[String]) -> Result<(), BrokerError> {
        if content.len() > MAX_BUFFER_SIZE {
            return Err(BrokerError::MessageTooLarge);
        }
        let client = self.registry.client(conn_id).await.ok_or(BrokerError::NotBound)?;

        let message = self
            .persistence
            .append_user_message(room_id, &client.user_id, client.display_name.as_deref(), content)
            .await
            .map_err(BrokerError::Persistence)?;

        let room = self.persistence.room_info(room_id).await.map_err(BrokerError::Persistence)?;

        let members = self.registry.room_members(room_id).await;
        let frame = ServerToClientFrame::NewMessage { message: message.clone() };
        for member_conn_id in &members {
            if !room.broadcast_mode && member_conn_id == conn_id {
                continue;
            }
            self.outbound.send_to_client(member_conn_id, &frame);
        }

        for member in room.members.iter().filter(|m| m.member_type == MemberType::Agent) {
            let addressed = room.broadcast_mode || mentions.iter().any(|m| m == &member.member_id);
            if !addressed {
                continue;
            }
            let Some(gateway_conn_id) = self.registry.gateway_for_agent(&member.member_id).await else {
                warn!(agent_id = %member.member_id, "addressed agent has no registered gateway");
                continue;
            };
            self.outbound.send_to_gateway(&gateway_conn_id, &ServerToGatewayFrame::SendToAgent {
                agent_id: member.member_id.clone(),
                room_id: room_id.to_string(),
                message_id: message.id.clone(),
                content: content.to_string(),
            });
        }
        Ok(())
    }

    async fn stop_generation(&self, room_id: &str, agent_id: &str) -> Result<(), BrokerError> {
        // §7 "Unknown agent id": ignored silently in the Broker, not surfaced
        // to the sender as a `server:error` — only the adapter-management
        // path (register/unregister) logs unknown-agent conditions loudly.
        let Some(gateway_conn_id) = self.registry.gateway_for_agent(agent_id).await else {
            warn!(agent_id, room_id, "stop_generation for unknown agent");
            return Ok(());
        };
        self.outbound.send_to_gateway(&gateway_conn_id, &ServerToGatewayFrame::StopAgent {
            agent_id: agent_id.to_string(),
            room_id: room_id.to_string(),
        });
        Ok(())
    }

    async fn permission_response(&self, request_id: &str, decision: PermissionDecision) -> Result<(), BrokerError> {
        // The actual forward to the owning gateway happens in the task
        // spawned by `permission_request`, which is awaiting this same
        // oneshot — this just fires it (§4.7 "at-most-once resolution").
        self.permissions
            .resolve(request_id, decision)
            .await
            .map_err(|e| BrokerError::Persistence(e.to_string()))?;
        Ok(())
    }

    // ── Gateway → server ─────────────────────────────────────────────────

    pub async fn handle_gateway_frame(&self, conn_id: &str, frame: GatewayFrame) {
        let result = match frame {
            GatewayFrame::Auth { token, gateway_id, protocol_version, ephemeral, .. } => {
                self.gateway_auth(conn_id, &token, &gateway_id, protocol_version, ephemeral).await
            },
            GatewayFrame::RegisterAgent { agent } => self.register_agent(conn_id, &agent.id).await,
            GatewayFrame::UnregisterAgent { agent_id } => self.unregister_agent(conn_id, &agent_id).await,
            GatewayFrame::AgentStatus { agent_id, status } => {
                self.persistence
                    .update_agent_status(&agent_id, &status)
                    .await
                    .map_err(BrokerError::Persistence)
            },
            GatewayFrame::MessageChunk { room_id, agent_id, message_id, chunk } => {
                self.message_chunk(conn_id, &room_id, &agent_id, &message_id, chunk).await
            },
            GatewayFrame::MessageComplete { room_id, agent_id, message_id, full_content } => {
                self.message_complete(&room_id, &agent_id, &message_id, &full_content).await
            },
            GatewayFrame::PermissionRequest { request_id, agent_id, room_id, summary, expires_at_ms } => {
                self.permission_request(conn_id, request_id, agent_id, room_id, summary, expires_at_ms).await
            },
        };

        if let Err(err) = result {
            let (code, message) = err.wire();
            warn!(conn_id, error = %err, "gateway frame dispatch failed");
            self.outbound
                .send_to_gateway(conn_id, &ServerToGatewayFrame::Error { code: code.into(), message });
        }
    }

    async fn gateway_auth(
        &self,
        conn_id: &str,
        token: &str,
        gateway_id: &str,
        protocol_version: u32,
        ephemeral: bool,
    ) -> Result<(), BrokerError> {
        if protocol_version != agentim_protocol::PROTOCOL_VERSION {
            // Sent here (not via the generic Err path below) so the peer gets
            // the actual version numbers instead of a generic message; the
            // dispatch loop must not also turn this into a second frame.
            self.outbound.send_to_gateway(conn_id, &ServerToGatewayFrame::Error {
                code: error_codes::PROTOCOL_VERSION_MISMATCH.into(),
                message: format!(
                    "protocol mismatch: server={}, gateway={protocol_version}",
                    agentim_protocol::PROTOCOL_VERSION
                ),
            });
            return Ok(());
        }

        let verified = self.verifier.verify(token, Some(TokenType::Access)).await;
        let frame = match verified {
            Ok(claims) => {
                self.registry
                    .add_gateway(conn_id.to_string(), claims.sub, gateway_id.to_string(), ephemeral)
                    .await?;
                ServerToGatewayFrame::GatewayAuthResult { ok: true, error: None }
            },
            Err(e) => ServerToGatewayFrame::GatewayAuthResult { ok: false, error: Some(e.wire_message().into()) },
        };
        self.outbound.send_to_gateway(conn_id, &frame);
        Ok(())
    }

    async fn register_agent(&self, conn_id: &str, agent_id: &str) -> Result<(), BrokerError> {
        self.registry.register_agent(conn_id, agent_id).await?;
        self.persistence.mark_agent_online(agent_id, true).await.map_err(BrokerError::Persistence)
    }

    async fn unregister_agent(&self, conn_id: &str, agent_id: &str) -> Result<(), BrokerError> {
        self.registry.unregister_agent(conn_id, agent_id).await;
        self.persistence.mark_agent_online(agent_id, false).await.map_err(BrokerError::Persistence)
    }

    async fn message_chunk(&self, conn_id: &str, room_id: &str, agent_id: &str, message_id: &str, chunk: Chunk) -> Result<(), BrokerError> {
        let outcome = self.turns.on_chunk(room_id, agent_id, conn_id, message_id).await;
        if outcome == TurnOutcome::Dropped {
            return Ok(());
        }
        let frame = ServerToClientFrame::MessageChunk {
            room_id: room_id.to_string(),
            agent_id: agent_id.to_string(),
            message_id: message_id.to_string(),
            chunk,
        };
        for member_conn_id in self.registry.room_members(room_id).await {
            self.outbound.send_to_client(&member_conn_id, &frame);
        }
        Ok(())
    }

    async fn message_complete(&self, room_id: &str, agent_id: &str, message_id: &str, full_content: &str) -> Result<(), BrokerError> {
        let was_open = self.turns.on_complete(room_id, agent_id).await;
        if !was_open {
            self.turns.clear(room_id, agent_id).await;
            return Ok(());
        }

        let message = self
            .persistence
            .append_agent_message(room_id, agent_id, message_id, full_content)
            .await
            .map_err(BrokerError::Persistence)?;

        let frame = ServerToClientFrame::MessageComplete { message };
        for member_conn_id in self.registry.room_members(room_id).await {
            self.outbound.send_to_client(&member_conn_id, &frame);
        }
        self.turns.clear(room_id, agent_id).await;
        Ok(())
    }

    async fn permission_request(
        &self,
        conn_id: &str,
        request_id: String,
        agent_id: String,
        room_id: String,
        summary: String,
        expires_at_ms: u64,
    ) -> Result<(), BrokerError> {
        let admitted = self
            .permissions
            .create(request_id.clone(), agent_id.clone(), room_id.clone(), conn_id.to_string(), expires_at_ms)
            .await
            .map_err(|_| BrokerError::PermissionRegistryFull)?;

        // Forward whatever decision eventually fires the oneshot — an
        // explicit `client:permission_response` or a sweep-driven timeout —
        // back to the gateway that asked (§4.4, §4.7).
        let outbound = Arc::clone(&self.outbound);
        let gateway_conn_id = conn_id.to_string();
        let forwarded_request_id = request_id.clone();
        tokio::spawn(async move {
            if let Ok(decision) = admitted.receiver.await {
                outbound.send_to_gateway(&gateway_conn_id, &ServerToGatewayFrame::PermissionResponse {
                    request_id: forwarded_request_id,
                    decision,
                });
            }
        });

        let frame = ServerToClientFrame::PermissionRequest {
            request_id,
            agent_id,
            room_id: room_id.clone(),
            summary,
            expires_at_ms,
        };
        for member_conn_id in self.registry.room_members(&room_id).await {
            self.outbound.send_to_client(&member_conn_id, &frame);
        }
        Ok(())
    }

    /// Called by the socket-lifecycle layer on gateway disconnect: fails
    /// every open streaming turn the gateway owned (§4.4 state machine).
    pub async fn on_gateway_disconnected(&self, conn_id: &str) {
        self.turns.fail_all_for_gateway(conn_id).await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::{
            atomic::{AtomicU64, Ordering},
            Mutex as StdMutex,
        },
    };

    use agentim_auth::RevocationRegistry;
    use agentim_protocol::AgentRegistration;
    use async_trait::async_trait;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    use super::*;
    use crate::persistence::{RoomInfo, RoomMember};

    const SECRET: &str = "test-jwt-secret";

    fn token_for(sub: &str, username: &str) -> String {
        let claims = serde_json::json!({
            "sub": sub,
            "username": username,
            "type": "access",
            "iat": 1_700_000_000,
            "exp": 1_700_900_000,
            "iss": "agentim",
            "aud": "agentim",
        });
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[derive(Default)]
    struct FakeOutbound {
        to_clients: StdMutex<Vec<(String, ServerToClientFrame)>>,
        to_gateways: StdMutex<Vec<(String, ServerToGatewayFrame)>>,
    }

    impl Outbound for FakeOutbound {
        fn send_to_client(&self, conn_id: &str, frame: &ServerToClientFrame) {
            self.to_clients.lock().unwrap().push((conn_id.to_string(), frame.clone()));
        }

        fn send_to_gateway(&self, conn_id: &str, frame: &ServerToGatewayFrame) {
            self.to_gateways.lock().unwrap().push((conn_id.to_string(), frame.clone()));
        }
    }

    #[derive(Default)]
    struct FakePersistence {
        rooms: StdMutex<HashMap<String, RoomInfo>>,
        membership: StdMutex<HashMap<String, HashSet<String>>>,
        agent_names: StdMutex<HashMap<String, String>>,
        next_id: AtomicU64,
    }

    impl FakePersistence {
        fn add_room(&self, room_id: &str, broadcast_mode: bool, members: Vec<RoomMember>, user_members: &[&str]) {
            self.rooms.lock().unwrap().insert(room_id.to_string(), RoomInfo { members, broadcast_mode });
            self.membership
                .lock()
                .unwrap()
                .insert(room_id.to_string(), user_members.iter().map(|s| s.to_string()).collect());
        }

        fn name_agent(&self, agent_id: &str, name: &str) {
            self.agent_names.lock().unwrap().insert(agent_id.to_string(), name.to_string());
        }
    }

    #[async_trait]
    impl Persistence for FakePersistence {
        async fn append_user_message(
            &self,
            room_id: &str,
            sender_id: &str,
            sender_name: Option<&str>,
            content: &str,
        ) -> Result<Message, String> {
            let id = format!("m{}", self.next_id.fetch_add(1, Ordering::SeqCst));
            Ok(stamp_message(id, room_id.to_string(), sender_id.to_string(), SenderType::User, sender_name.map(str::to_string), content.to_string()))
        }

        async fn append_agent_message(&self, room_id: &str, agent_id: &str, message_id: &str, full_content: &str) -> Result<Message, String> {
            let name = self.agent_names.lock().unwrap().get(agent_id).cloned();
            Ok(stamp_message(message_id.to_string(), room_id.to_string(), agent_id.to_string(), SenderType::Agent, name, full_content.to_string()))
        }

        async fn room_info(&self, room_id: &str) -> Result<RoomInfo, String> {
            self.rooms.lock().unwrap().get(room_id).cloned().ok_or_else(|| "room not found".to_string())
        }

        async fn verify_membership(&self, room_id: &str, user_id: &str) -> Result<bool, String> {
            Ok(self.membership.lock().unwrap().get(room_id).is_some_and(|m| m.contains(user_id)))
        }

        async fn mark_agent_online(&self, _agent_id: &str, _online: bool) -> Result<(), String> {
            Ok(())
        }

        async fn update_agent_status(&self, _agent_id: &str, _status: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn new_broker() -> (Broker, Arc<ConnectionRegistry>, Arc<FakeOutbound>, Arc<FakePersistence>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let revocation = Arc::new(RevocationRegistry::new(b"hmac-secret".to_vec(), None, 900));
        let verifier = Arc::new(TokenVerifier::new(SECRET, None, revocation));
        let persistence = Arc::new(FakePersistence::default());
        let outbound = Arc::new(FakeOutbound::default());
        let permissions = Arc::new(PermissionStore::new());
        let broker = Broker::new(Arc::clone(&registry), verifier, Arc::clone(&persistence), Arc::clone(&outbound), permissions);
        (broker, registry, outbound, persistence)
    }

    async fn auth_client(broker: &Broker, conn_id: &str, user_id: &str) {
        broker.handle_client_frame(conn_id, ClientFrame::Auth { token: token_for(user_id, user_id) }).await;
    }

    async fn auth_gateway(broker: &Broker, conn_id: &str, user_id: &str, gateway_id: &str) {
        broker
            .handle_gateway_frame(conn_id, GatewayFrame::Auth {
                token: token_for(user_id, user_id),
                gateway_id: gateway_id.to_string(),
                protocol_version: agentim_protocol::PROTOCOL_VERSION,
                device_info: None,
                ephemeral: false,
            })
            .await;
    }

    // S1 — broadcast: non-broadcast room excludes the sender, includes other members.
    #[tokio::test]
    async fn broadcast_excludes_sender_in_non_broadcast_room() {
        let (broker, registry, outbound, persistence) = new_broker();
        auth_client(&broker, "conn-a", "user-a").await;
        auth_client(&broker, "conn-b", "user-b").await;
        persistence.add_room("r1", false, vec![], &["user-a", "user-b"]);
        registry.join_room("conn-a", "r1").await.unwrap();
        registry.join_room("conn-b", "r1").await.unwrap();

        broker
            .handle_client_frame("conn-a", ClientFrame::SendMessage {
                room_id: "r1".into(),
                content: "hello".into(),
                mentions: vec![],
            })
            .await;

        let sent = outbound.to_clients.lock().unwrap();
        let recipients: Vec<&str> = sent.iter().map(|(id, _)| id.as_str()).collect();
        assert!(recipients.contains(&"conn-b"));
        assert!(!recipients.contains(&"conn-a"));
        match &sent.iter().find(|(id, _)| id == "conn-b").unwrap().1 {
            ServerToClientFrame::NewMessage { message } => {
                assert_eq!(message.content, "hello");
                assert_eq!(message.sender_type, SenderType::User);
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    // S2 — agent turn: a mentioned agent gets routed to its gateway, and the
    // eventual `message_complete` fans a `server:message_complete` back out.
    #[tokio::test]
    async fn agent_turn_routes_to_gateway_and_completes() {
        let (broker, registry, outbound, persistence) = new_broker();
        auth_gateway(&broker, "gw-conn", "operator", "gw-1").await;
        broker
            .handle_gateway_frame("gw-conn", GatewayFrame::RegisterAgent {
                agent: AgentRegistration { id: "a1".into(), name: "TestBot".into(), agent_type: "claude".into(), working_dir: None },
            })
            .await;
        persistence.name_agent("a1", "TestBot");
        auth_client(&broker, "conn-c", "user-c").await;
        persistence.add_room(
            "r2",
            false,
            vec![RoomMember { member_id: "a1".into(), member_type: MemberType::Agent, role: "member".into() }],
            &["user-c"],
        );
        registry.join_room("conn-c", "r2").await.unwrap();

        broker
            .handle_client_frame("conn-c", ClientFrame::SendMessage {
                room_id: "r2".into(),
                content: "@TestBot please".into(),
                mentions: vec!["a1".into()],
            })
            .await;

        {
            let sent = outbound.to_gateways.lock().unwrap();
            let (conn_id, frame) = sent.iter().find(|(_, f)| matches!(f, ServerToGatewayFrame::SendToAgent { .. })).unwrap();
            assert_eq!(conn_id, "gw-conn");
            match frame {
                ServerToGatewayFrame::SendToAgent { agent_id, content, .. } => {
                    assert_eq!(agent_id, "a1");
                    assert_eq!(content, "@TestBot please");
                },
                other => panic!("unexpected frame: {other:?}"),
            }
        }

        broker
            .handle_gateway_frame("gw-conn", GatewayFrame::MessageChunk {
                room_id: "r2".into(),
                agent_id: "a1".into(),
                message_id: "msg-1".into(),
                chunk: Chunk { kind: agentim_protocol::ChunkKind::Text, content: "wor".into(), metadata: None },
            })
            .await;
        broker
            .handle_gateway_frame("gw-conn", GatewayFrame::MessageComplete {
                room_id: "r2".into(),
                agent_id: "a1".into(),
                message_id: "msg-1".into(),
                full_content: "done".into(),
            })
            .await;

        let sent = outbound.to_clients.lock().unwrap();
        let (conn_id, frame) = sent
            .iter()
            .find(|(_, f)| matches!(f, ServerToClientFrame::MessageComplete { .. }))
            .expect("message_complete should have fanned out");
        assert_eq!(conn_id, "conn-c");
        match frame {
            ServerToClientFrame::MessageComplete { message } => {
                assert_eq!(message.content, "done");
                assert_eq!(message.sender_type, SenderType::Agent);
                assert_eq!(message.sender_name.as_deref(), Some("TestBot"));
            },
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    // S3 — oversize content is rejected without closing the socket.
    #[tokio::test]
    async fn oversize_message_rejected_with_error_frame() {
        let (broker, registry, outbound, persistence) = new_broker();
        auth_client(&broker, "conn-a", "user-a").await;
        persistence.add_room("r1", true, vec![], &["user-a"]);
        registry.join_room("conn-a", "r1").await.unwrap();

        let content = "x".repeat(MAX_BUFFER_SIZE + 1);
        broker
            .handle_client_frame("conn-a", ClientFrame::SendMessage { room_id: "r1".into(), content, mentions: vec![] })
            .await;

        let sent = outbound.to_clients.lock().unwrap();
        let (conn_id, frame) = sent.last().expect("an error frame should have been sent");
        assert_eq!(conn_id, "conn-a");
        match frame {
            ServerToClientFrame::Error { code, .. } => assert_eq!(code, error_codes::MESSAGE_TOO_LARGE),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn stop_generation_forwards_to_owning_gateway() {
        let (broker, _registry, outbound, _persistence) = new_broker();
        auth_gateway(&broker, "gw-conn", "operator", "gw-1").await;
        broker
            .handle_gateway_frame("gw-conn", GatewayFrame::RegisterAgent {
                agent: AgentRegistration { id: "a1".into(), name: "TestBot".into(), agent_type: "claude".into(), working_dir: None },
            })
            .await;

        broker
            .handle_client_frame("conn-c", ClientFrame::StopGeneration { room_id: "r2".into(), agent_id: "a1".into() })
            .await;

        let sent = outbound.to_gateways.lock().unwrap();
        assert!(sent.iter().any(|(id, f)| id == "gw-conn" && matches!(f, ServerToGatewayFrame::StopAgent { .. })));
    }

    // §7: an unknown agent id is ignored silently, not reported to the sender.
    #[tokio::test]
    async fn stop_generation_for_unknown_agent_is_silently_ignored() {
        let (broker, _registry, outbound, _persistence) = new_broker();
        broker
            .handle_client_frame("conn-c", ClientFrame::StopGeneration { room_id: "r2".into(), agent_id: "ghost".into() })
            .await;

        assert!(outbound.to_gateways.lock().unwrap().is_empty());
        assert!(outbound.to_clients.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_request_then_response_resolves_exactly_once() {
        let (broker, registry, outbound, persistence) = new_broker();
        auth_gateway(&broker, "gw-conn", "operator", "gw-1").await;
        broker
            .handle_gateway_frame("gw-conn", GatewayFrame::RegisterAgent {
                agent: AgentRegistration { id: "a1".into(), name: "TestBot".into(), agent_type: "claude".into(), working_dir: None },
            })
            .await;
        auth_client(&broker, "conn-c", "user-c").await;
        persistence.add_room(
            "r3",
            false,
            vec![RoomMember { member_id: "a1".into(), member_type: MemberType::Agent, role: "member".into() }],
            &["user-c"],
        );
        registry.join_room("conn-c", "r3").await.unwrap();

        broker
            .handle_gateway_frame("gw-conn", GatewayFrame::PermissionRequest {
                request_id: "req-1".into(),
                agent_id: "a1".into(),
                room_id: "r3".into(),
                summary: "rm -rf /tmp".into(),
                expires_at_ms: u64::MAX,
            })
            .await;

        assert!(outbound
            .to_clients
            .lock()
            .unwrap()
            .iter()
            .any(|(id, f)| id == "conn-c" && matches!(f, ServerToClientFrame::PermissionRequest { request_id, .. } if request_id == "req-1")));

        broker
            .handle_client_frame("conn-c", ClientFrame::PermissionResponse { request_id: "req-1".into(), decision: PermissionDecision::Allow })
            .await;

        // The resolution is forwarded from a spawned task; give it a turn.
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        assert!(outbound.to_gateways.lock().unwrap().iter().any(|(id, f)| {
            id == "gw-conn" && matches!(f, ServerToGatewayFrame::PermissionResponse { request_id, decision } if request_id == "req-1" && *decision == PermissionDecision::Allow)
        }));

        // A second response to the same (now-resolved) request must not panic
        // and must not deliver a second resolution.
        let gateways_before = outbound.to_gateways.lock().unwrap().len();
        broker
            .handle_client_frame("conn-c", ClientFrame::PermissionResponse { request_id: "req-1".into(), decision: PermissionDecision::Deny })
            .await;
        assert_eq!(outbound.to_gateways.lock().unwrap().len(), gateways_before);
    }

    #[tokio::test]
    async fn gateway_disconnect_fails_its_open_streaming_turns() {
        let (broker, _registry, _outbound, _persistence) = new_broker();
        broker
            .handle_gateway_frame("gw-conn", GatewayFrame::MessageChunk {
                room_id: "r1".into(),
                agent_id: "a1".into(),
                message_id: "m1".into(),
                chunk: Chunk { kind: agentim_protocol::ChunkKind::Text, content: "partial".into(), metadata: None },
            })
            .await;
        broker.on_gateway_disconnected("gw-conn").await;
        assert_eq!(broker.turns.state("r1", "a1").await, Some(crate::streaming_turn::TurnState::Failed));
    }
}

/// Builds a `server:new_message`-shaped [`Message`] stamped with the current
/// time, for fakes/tests that need to hand one to a [`Persistence`] impl.
#[must_use]
pub fn stamp_message(id: String, room_id: String, sender_id: String, sender_type: SenderType, sender_name: Option<String>, content: String) -> Message {
    let created_at_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    Message { id, room_id, sender_id, sender_type, sender_name, content, created_at_ms }
}
