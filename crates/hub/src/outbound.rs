//! The concrete [`Outbound`] the hub binary hands to the [`Broker`]: one
//! unbounded mpsc sender per connected socket, the same shape as the
//! teacher's `ConnectedClient::send` / write-loop-channel pattern in
//! `gateway/src/ws.rs`, generalized to the two socket kinds this protocol has.
//!
//! [`Broker`]: agentim_broker::Broker

use agentim_protocol::{ServerToClientFrame, ServerToGatewayFrame};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use agentim_broker::Outbound;

pub type ClientSender = mpsc::UnboundedSender<ServerToClientFrame>;
pub type GatewaySender = mpsc::UnboundedSender<ServerToGatewayFrame>;

/// Registry of live per-socket channels, keyed by `conn_id`.
///
/// The ws handlers register a sender when a socket is accepted and remove it
/// on disconnect; the [`Broker`] only ever sees the [`Outbound`] trait.
#[derive(Default)]
pub struct SocketOutbound {
    clients: DashMap<String, ClientSender>,
    gateways: DashMap<String, GatewaySender>,
}

impl SocketOutbound {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&self, conn_id: String, tx: ClientSender) {
        self.clients.insert(conn_id, tx);
    }

    pub fn register_gateway(&self, conn_id: String, tx: GatewaySender) {
        self.gateways.insert(conn_id, tx);
    }

    pub fn remove_client(&self, conn_id: &str) {
        self.clients.remove(conn_id);
    }

    pub fn remove_gateway(&self, conn_id: &str) {
        self.gateways.remove(conn_id);
    }
}

impl Outbound for SocketOutbound {
    fn send_to_client(&self, conn_id: &str, frame: &ServerToClientFrame) {
        let Some(tx) = self.clients.get(conn_id) else {
            debug!(conn_id, "send_to_client: no such socket (already disconnected?)");
            return;
        };
        if tx.send(frame.clone()).is_err() {
            debug!(conn_id, "send_to_client: write loop is gone");
        }
    }

    fn send_to_gateway(&self, conn_id: &str, frame: &ServerToGatewayFrame) {
        let Some(tx) = self.gateways.get(conn_id) else {
            debug!(conn_id, "send_to_gateway: no such socket (already disconnected?)");
            return;
        };
        if tx.send(frame.clone()).is_err() {
            debug!(conn_id, "send_to_gateway: write loop is gone");
        }
    }
}
