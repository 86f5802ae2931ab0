//! WebSocket connection lifecycle for the two endpoints (§4.4, §4.5, §6).
//!
//! Both handlers follow the same shape as the teacher's
//! `gateway::ws::handle_connection`: split the socket, spawn a write-loop
//! task draining a per-socket channel into it, then read frames in a loop
//! until the socket closes, at which point both registries are cleaned up.
//! Unlike the teacher there is no separate handshake phase — `client:auth`/
//! `gateway:auth` are just the first frames dispatched through the same
//! [`Broker`], since AgentIM's own protocol (not the teacher's) governs
//! what a valid first frame looks like.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{stream::StreamExt, SinkExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use agentim_broker::Outbound as _;
use agentim_protocol::{check_frame_size, ClientFrame, GatewayFrame, ServerToClientFrame, ServerToGatewayFrame};

use crate::state::AppState;

pub async fn handle_client_connection(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id, "client ws: connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerToClientFrame>();
    state.outbound.register_client(conn_id.clone(), tx);

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "client ws: write loop closed");
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id, error = %e, "client ws: read error");
                break;
            },
        };

        if check_frame_size(text.as_bytes()).is_err() {
            warn!(conn_id, size = text.len(), "client ws: frame too large");
            state.outbound.send_to_client(&conn_id, &ServerToClientFrame::Error {
                code: agentim_protocol::error_codes::MESSAGE_TOO_LARGE.into(),
                message: "frame exceeds maximum size".into(),
            });
            continue;
        }

        let frame: ClientFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id, error = %e, "client ws: invalid frame");
                continue;
            },
        };

        state.broker.handle_client_frame(&conn_id, frame).await;
    }

    state.registry.remove_client(&conn_id).await;
    state.outbound.remove_client(&conn_id);
    write_handle.abort();
    info!(conn_id, "client ws: disconnected");
}

pub async fn handle_gateway_connection(socket: WebSocket, state: AppState) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id, "gateway ws: connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerToGatewayFrame>();
    state.outbound.register_gateway(conn_id.clone(), tx);

    let write_conn_id = conn_id.clone();
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&frame) else { continue };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                debug!(conn_id = %write_conn_id, "gateway ws: write loop closed");
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(conn_id, error = %e, "gateway ws: read error");
                break;
            },
        };

        if check_frame_size(text.as_bytes()).is_err() {
            warn!(conn_id, size = text.len(), "gateway ws: frame too large");
            state.outbound.send_to_gateway(&conn_id, &ServerToGatewayFrame::Error {
                code: agentim_protocol::error_codes::MESSAGE_TOO_LARGE.into(),
                message: "frame exceeds maximum size".into(),
            });
            continue;
        }

        let frame: GatewayFrame = match serde_json::from_str(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(conn_id, error = %e, "gateway ws: invalid frame");
                continue;
            },
        };

        let is_mismatch = matches!(&frame, GatewayFrame::Auth { protocol_version, .. } if *protocol_version != agentim_protocol::PROTOCOL_VERSION);
        state.broker.handle_gateway_frame(&conn_id, frame).await;
        if is_mismatch {
            // §9: a fixed delay, no drain — the gateway already received
            // `server:error{PROTOCOL_VERSION_MISMATCH}` and is expected to
            // exit rather than keep the socket open.
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            break;
        }
    }

    state.broker.on_gateway_disconnected(&conn_id).await;
    state.registry.remove_gateway(&conn_id).await;
    state.outbound.remove_gateway(&conn_id);
    write_handle.abort();
    info!(conn_id, "gateway ws: disconnected");
}
