//! Shared hub process state (§5 "Scheduling model").
//!
//! One [`AppState`] is cloned into every axum handler; everything it
//! points at is already `Arc`-wrapped, so the clone is cheap and handlers
//! never need to reach for a global.

use std::sync::Arc;

use agentim_auth::RevocationRegistry;
use agentim_broker::{Broker, PermissionStore};
use agentim_registry::ConnectionRegistry;

use crate::outbound::SocketOutbound;

#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<Broker>,
    pub registry: Arc<ConnectionRegistry>,
    pub outbound: Arc<SocketOutbound>,
    pub revocation: Arc<RevocationRegistry>,
    pub permissions: Arc<PermissionStore>,
}
