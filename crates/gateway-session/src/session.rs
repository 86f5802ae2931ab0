//! The Gateway Session run loop (§4.5): connect, authenticate, relay, and
//! reconnect with backoff — decomposed the way
//! `astrid-gateway::discord_proxy::{run, connect_and_run, event_loop,
//! handle_loop_action, handle_loop_error}` is, minus the Discord-specific
//! resume protocol (the hub has no session-resume concept; every
//! reconnect re-authenticates from scratch).

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use agentim_protocol::{Chunk, ChunkKind, DeviceInfo, GatewayFrame, ServerToGatewayFrame, PROTOCOL_VERSION};
use futures::{SinkExt, StreamExt};
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::{agent_manager::AgentManager, backoff::Backoff, error::SessionError, shutdown, token::TokenProvider};

type WsWriter = futures::stream::SplitSink<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, Message>;
type WsReader = futures::stream::SplitStream<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>;

const PROTOCOL_MISMATCH_EXIT_DELAY: Duration = Duration::from_millis(500);
/// Bounded deadline for `disposeAll` on SIGINT/SIGTERM/SIGHUP (§4.5 "Shutdown").
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(15);

async fn dispose_all_with_deadline(agents: &AgentManager) {
    if tokio::time::timeout(SHUTDOWN_DEADLINE, agents.dispose_all()).await.is_err() {
        warn!("dispose_all did not finish within the shutdown deadline, exiting anyway");
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySessionConfig {
    pub ws_url: String,
    pub gateway_id: String,
    pub device_info: Option<DeviceInfo>,
    pub ephemeral: bool,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_reconnect_attempts: u32,
}

impl Default for GatewaySessionConfig {
    fn default() -> Self {
        Self {
            ws_url: String::new(),
            gateway_id: String::new(),
            device_info: None,
            ephemeral: false,
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            max_reconnect_attempts: u32::MAX,
        }
    }
}

enum LoopAction {
    Shutdown,
    Reconnect,
    Connected,
}

/// Frames queued for send, shared with the turn-relay tasks a
/// [`GatewaySession`] spawns per `send_to_agent` — a plain `Arc<Mutex<_>>`
/// handle rather than a reference back into the session, so a relay task
/// outliving one connection attempt never borrows anything connection-scoped.
#[derive(Clone)]
struct Outbox(Arc<Mutex<VecDeque<GatewayFrame>>>);

impl Outbox {
    fn new() -> Self {
        Self(Arc::new(Mutex::new(VecDeque::new())))
    }

    async fn push(&self, frame: GatewayFrame) {
        self.0.lock().await.push_back(frame);
    }

    async fn drain_into(&self, writer: &mut WsWriter) -> Result<(), SessionError> {
        let mut queue = self.0.lock().await;
        while let Some(frame) = queue.pop_front() {
            send_frame(writer, &frame).await?;
        }
        Ok(())
    }
}

/// Owns a single outbound connection to the hub, reconnecting as needed.
pub struct GatewaySession {
    config: GatewaySessionConfig,
    token_provider: Arc<dyn TokenProvider>,
    agents: Arc<AgentManager>,
    /// Bumped on every new socket; any async callback compares its captured
    /// value before acting, so a stale callback from a superseded
    /// connection is a no-op (§4.5 "Owns a monotonic connectionId counter").
    connection_id: AtomicU64,
    outbox: Outbox,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewaySession {
    #[must_use]
    pub fn new(config: GatewaySessionConfig, token_provider: Arc<dyn TokenProvider>, agents: Arc<AgentManager>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self { config, token_provider, agents, connection_id: AtomicU64::new(0), outbox: Outbox::new(), shutdown_tx, shutdown_rx }
    }

    /// Installs SIGINT/SIGTERM/SIGHUP handling that triggers this session's
    /// shutdown flag (SIGPIPE is ignored as a side effect).
    pub fn install_signal_handlers(&self) {
        shutdown::install(self.shutdown_tx.clone());
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Queues a frame to send to the hub. Sent immediately if a connection
    /// is authenticated, otherwise flushed on the next successful auth
    /// (§4.5 step 2, "flush the pending send queue").
    pub async fn enqueue(&self, frame: GatewayFrame) {
        self.outbox.push(frame).await;
    }

    /// Runs until shutdown is requested or an unrecoverable error occurs.
    pub async fn run(self: &Arc<Self>) -> Result<(), SessionError> {
        let mut backoff = Backoff::new(self.config.backoff_base_ms, self.config.backoff_max_ms);
        let mut attempt: u32 = 0;

        loop {
            if self.is_shutdown() {
                dispose_all_with_deadline(&self.agents).await;
                return Ok(());
            }

            let result = match self.connect_and_run().await {
                Ok(action) => self.handle_loop_action(action, &mut backoff, &mut attempt).await,
                Err(err) => self.handle_loop_error(err, &mut backoff, &mut attempt).await,
            };

            match result {
                Ok(()) => {},
                Err(SessionError::Shutdown) => {
                    dispose_all_with_deadline(&self.agents).await;
                    return Ok(());
                },
                Err(err) => {
                    dispose_all_with_deadline(&self.agents).await;
                    return Err(err);
                },
            }
        }
    }

    async fn handle_loop_action(&self, action: LoopAction, backoff: &mut Backoff, attempt: &mut u32) -> Result<(), SessionError> {
        match action {
            LoopAction::Shutdown => Err(SessionError::Shutdown),
            LoopAction::Reconnect => {
                let delay = backoff.next_delay();
                *attempt = attempt.saturating_add(1);
                if *attempt > self.config.max_reconnect_attempts {
                    return Err(SessionError::MaxAttemptsExceeded(self.config.max_reconnect_attempts));
                }
                info!(delay_ms = delay.as_millis(), attempt = *attempt, "reconnecting to hub after backoff");
                self.sleep_or_shutdown(delay).await
            },
            LoopAction::Connected => {
                backoff.reset();
                *attempt = 0;
                Ok(())
            },
        }
    }

    async fn handle_loop_error(&self, err: SessionError, backoff: &mut Backoff, attempt: &mut u32) -> Result<(), SessionError> {
        match err {
            SessionError::AuthenticationFailed => {
                warn!("gateway authentication failed permanently");
                Err(err)
            },
            SessionError::ProtocolMismatch => {
                warn!("protocol version mismatch with hub, exiting");
                tokio::time::sleep(PROTOCOL_MISMATCH_EXIT_DELAY).await;
                Err(err)
            },
            SessionError::Shutdown => Err(err),
            other => {
                warn!(error = %other, "gateway connection error, will reconnect");
                let delay = backoff.next_delay();
                *attempt = attempt.saturating_add(1);
                if *attempt > self.config.max_reconnect_attempts {
                    return Err(SessionError::MaxAttemptsExceeded(self.config.max_reconnect_attempts));
                }
                info!(delay_ms = delay.as_millis(), attempt = *attempt, "reconnecting to hub after error");
                self.sleep_or_shutdown(delay).await
            },
        }
    }

    async fn sleep_or_shutdown(&self, delay: Duration) -> Result<(), SessionError> {
        let mut rx = self.shutdown_rx.clone();
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            _ = rx.changed() => Err(SessionError::Shutdown),
        }
    }

    /// One connection attempt: connect, authenticate (with a single
    /// one-shot token refresh retry), and relay frames until disconnect.
    async fn connect_and_run(self: &Arc<Self>) -> Result<LoopAction, SessionError> {
        let my_connection_id = self.connection_id.fetch_add(1, Ordering::SeqCst) + 1;

        let (stream, _response) = tokio_tungstenite::connect_async(&self.config.ws_url).await?;
        let (mut writer, mut reader) = stream.split();

        let mut has_refreshed = false;
        loop {
            let token = self.token_provider.access_token().await;
            send_frame(&mut writer, &auth_frame(&self.config, token)).await?;

            match next_server_frame(&mut reader).await? {
                Some(ServerToGatewayFrame::GatewayAuthResult { ok: true, .. }) => break,
                Some(ServerToGatewayFrame::GatewayAuthResult { ok: false, .. }) => {
                    if !has_refreshed && self.token_provider.has_refresh_token() {
                        match self.token_provider.refresh().await {
                            Ok(()) => {
                                has_refreshed = true;
                                continue;
                            },
                            Err(message) => return Err(SessionError::RefreshFailed(message)),
                        }
                    }
                    return Err(SessionError::AuthenticationFailed);
                },
                Some(ServerToGatewayFrame::Error { code, message }) if code == agentim_protocol::error_codes::PROTOCOL_VERSION_MISMATCH => {
                    warn!(%message, "hub rejected our protocol version");
                    return Err(SessionError::ProtocolMismatch);
                },
                Some(other) => {
                    warn!(frame = ?other, "unexpected frame before auth result");
                    return Err(SessionError::AuthenticationFailed);
                },
                None => return Ok(LoopAction::Reconnect),
            }
        }

        if self.connection_id.load(Ordering::SeqCst) != my_connection_id {
            // A newer connection attempt has already superseded this one.
            return Ok(LoopAction::Reconnect);
        }

        info!(is_reconnect = self.agents.count().await > 0, "gateway authenticated");
        self.outbox.drain_into(&mut writer).await?;

        self.event_loop(&mut writer, &mut reader, my_connection_id).await
    }

    async fn event_loop(self: &Arc<Self>, writer: &mut WsWriter, reader: &mut WsReader, my_connection_id: u64) -> Result<LoopAction, SessionError> {
        loop {
            if self.is_shutdown() {
                return Ok(LoopAction::Shutdown);
            }
            if self.connection_id.load(Ordering::SeqCst) != my_connection_id {
                return Ok(LoopAction::Reconnect);
            }

            tokio::select! {
                frame = next_server_frame(reader) => {
                    match frame? {
                        Some(frame) => self.handle_frame(frame).await,
                        None => return Ok(LoopAction::Reconnect),
                    }
                },
                _ = self.wait_for_shutdown() => return Ok(LoopAction::Shutdown),
                () = self.outbox_flush_tick(writer) => {},
            }

            if self.config.ephemeral && self.agents.count().await == 0 {
                info!("ephemeral gateway has zero agents, shutting down");
                return Ok(LoopAction::Shutdown);
            }
        }
    }

    /// Periodically drains frames turn-relay tasks queued via [`Outbox`]
    /// onto the live socket. A short fixed interval keeps chunk latency low
    /// without needing a dedicated writer task per connection.
    async fn outbox_flush_tick(&self, writer: &mut WsWriter) {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if let Err(error) = self.outbox.drain_into(writer).await {
            warn!(%error, "failed to flush queued frames to hub");
        }
    }

    async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_rx.clone();
        let _ = rx.changed().await;
    }

    async fn handle_frame(self: &Arc<Self>, frame: ServerToGatewayFrame) {
        match frame {
            ServerToGatewayFrame::SendToAgent { agent_id, room_id, message_id, content } => {
                self.dispatch_send_to_agent(agent_id, room_id, message_id, content).await;
            },
            ServerToGatewayFrame::StopAgent { agent_id, .. } => {
                if let Some(adapter) = self.agents.get(&agent_id).await {
                    adapter.stop().await;
                }
            },
            ServerToGatewayFrame::RemoveAgent { agent_id } => {
                self.agents.unregister(&agent_id).await;
            },
            ServerToGatewayFrame::RoomContext { .. }
            | ServerToGatewayFrame::PermissionResponse { .. }
            | ServerToGatewayFrame::AgentCommand { .. }
            | ServerToGatewayFrame::QueryAgentInfo { .. }
            | ServerToGatewayFrame::SpawnAgent { .. } => {
                // Out of scope for the relay core: handled by whatever
                // concrete agent-type integration owns that capability.
            },
            ServerToGatewayFrame::Error { code, message } => {
                warn!(%code, %message, "hub reported an error");
            },
            ServerToGatewayFrame::GatewayAuthResult { .. } => {
                warn!("unexpected second gateway_auth_result on an established connection");
            },
        }
    }

    async fn dispatch_send_to_agent(self: &Arc<Self>, agent_id: String, room_id: String, message_id: String, content: String) {
        let Some(adapter) = self.agents.get(&agent_id).await else {
            warn!(%agent_id, "send_to_agent for unknown agent");
            return;
        };

        let context = agentim_adapter::TurnContext { room_id: room_id.clone(), agent_id: agent_id.clone(), message_id: message_id.clone() };
        let events = match adapter.send_message(&content, context).await {
            Ok(events) => events,
            Err(error) => {
                warn!(%agent_id, %error, "adapter rejected send_message");
                return;
            },
        };

        let outbox = self.outbox.clone();
        tokio::spawn(relay_adapter_events(events, outbox, room_id, agent_id, message_id));
    }

    /// Registers an agent and queues `gateway:register_agent` for the hub.
    pub async fn register_agent(&self, agent: agentim_protocol::AgentRegistration, adapter: Arc<dyn agentim_adapter::AgentAdapter>) {
        self.agents.register(agent.id.clone(), adapter).await;
        self.enqueue(GatewayFrame::RegisterAgent { agent }).await;
    }

    /// Unregisters an agent locally and tells the hub.
    pub async fn unregister_agent(&self, agent_id: &str) {
        self.agents.unregister(agent_id).await;
        self.enqueue(GatewayFrame::UnregisterAgent { agent_id: agent_id.to_string() }).await;
    }
}

async fn relay_adapter_events(mut events: agentim_adapter::AdapterEvents, outbox: Outbox, room_id: String, agent_id: String, message_id: String) {
    while let Some(event) = events.recv().await {
        match event {
            agentim_adapter::AdapterEvent::Chunk(chunk) => {
                outbox.push(GatewayFrame::MessageChunk { room_id: room_id.clone(), agent_id: agent_id.clone(), message_id: message_id.clone(), chunk }).await;
            },
            agentim_adapter::AdapterEvent::Complete { full_content } => {
                outbox.push(GatewayFrame::MessageComplete { room_id, agent_id, message_id, full_content }).await;
                return;
            },
            agentim_adapter::AdapterEvent::Error { message } => {
                let chunk = Chunk { kind: ChunkKind::Error, content: message, metadata: None };
                outbox.push(GatewayFrame::MessageChunk { room_id: room_id.clone(), agent_id: agent_id.clone(), message_id, chunk }).await;
                return;
            },
        }
    }
}

fn auth_frame(config: &GatewaySessionConfig, token: String) -> GatewayFrame {
    GatewayFrame::Auth { token, gateway_id: config.gateway_id.clone(), protocol_version: PROTOCOL_VERSION, device_info: config.device_info.clone(), ephemeral: config.ephemeral }
}

async fn send_frame(writer: &mut WsWriter, frame: &GatewayFrame) -> Result<(), SessionError> {
    let json = serde_json::to_string(frame).map_err(SessionError::Decode)?;
    writer.send(Message::Text(json.into())).await?;
    Ok(())
}

async fn next_server_frame(reader: &mut WsReader) -> Result<Option<ServerToGatewayFrame>, SessionError> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(SessionError::WebSocket(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn outbox_push_then_drain_preserves_order() {
        // Exercised indirectly through GatewaySession in integration-style
        // tests (needs a live socket); here we just check queue ordering.
        let outbox = Outbox::new();
        outbox
            .push(GatewayFrame::UnregisterAgent { agent_id: "a1".into() })
            .await;
        outbox
            .push(GatewayFrame::UnregisterAgent { agent_id: "a2".into() })
            .await;
        let mut queue = outbox.0.lock().await;
        match queue.pop_front() {
            Some(GatewayFrame::UnregisterAgent { agent_id }) => assert_eq!(agent_id, "a1"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn config_defaults_are_sane() {
        let config = GatewaySessionConfig::default();
        assert!(!config.ephemeral);
        assert_eq!(config.backoff_base_ms, 1000);
        assert_eq!(config.max_reconnect_attempts, u32::MAX);
    }
}
