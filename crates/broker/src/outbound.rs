//! The socket-send seam the Broker dispatches through (§4.4).
//!
//! The Connection Registry (`agentim-registry`) owns connection *identity*
//! only — no socket handles — so the Broker needs a way to actually push
//! bytes at a `conn_id`. The hub binary supplies the real implementation
//! (an `mpsc` sender per socket, same shape as the teacher's
//! `ConnectedClient::send`); tests supply a recording fake.

use agentim_protocol::{ServerToClientFrame, ServerToGatewayFrame};

pub trait Outbound: Send + Sync {
    /// Best-effort send; a closed/full socket is logged by the caller, not
    /// propagated as a dispatch failure (§4.4 "Failure semantics").
    fn send_to_client(&self, conn_id: &str, frame: &ServerToClientFrame);

    fn send_to_gateway(&self, conn_id: &str, frame: &ServerToGatewayFrame);
}
