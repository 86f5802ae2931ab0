//! In-memory connection index: client/gateway sockets, room membership, and
//! the agent→gateway routing table (§3, §4.3).
//!
//! All mutation goes through one [`ConnectionRegistry`] lock so the
//! check-then-mutate discipline §4.3 requires (validate caps against the
//! *new* identity before touching the *old* one's counters) is trivially
//! atomic — there is no window where a second task can observe a
//! half-applied rebind.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;

pub mod error;

pub use error::RegistryError;

/// Default per-user cap on simultaneous client sockets.
pub const MAX_CLIENT_CONNECTIONS_PER_USER: usize = 10;

/// Default per-user cap on simultaneous gateway sockets.
pub const MAX_GATEWAY_CONNECTIONS_PER_USER: usize = 5;

/// Default cap on the total number of sockets (clients + gateways) held by
/// the hub process at once (§4.3, §5 "per-user connection caps and the
/// global cap are enforced by the Connection Registry").
pub const MAX_CONNECTIONS_GLOBAL: usize = 10_000;

/// The three caps the Connection Registry enforces (§4.3). Constructed from
/// `agentim-config`'s `HubConfig` by the hub binary; defaults match the
/// module constants.
#[derive(Debug, Clone, Copy)]
pub struct Caps {
    pub max_client_per_user: usize,
    pub max_gateway_per_user: usize,
    pub max_global: usize,
}

impl Default for Caps {
    fn default() -> Self {
        Self {
            max_client_per_user: MAX_CLIENT_CONNECTIONS_PER_USER,
            max_gateway_per_user: MAX_GATEWAY_CONNECTIONS_PER_USER,
            max_global: MAX_CONNECTIONS_GLOBAL,
        }
    }
}

/// A connected chat client (§3 `ClientConnection`).
#[derive(Debug, Clone)]
pub struct ClientConnection {
    pub conn_id: String,
    pub user_id: String,
    pub display_name: Option<String>,
    pub joined_rooms: HashSet<String>,
}

/// A connected gateway (§3 `GatewayConnection`).
#[derive(Debug, Clone)]
pub struct GatewayConnection {
    pub conn_id: String,
    pub user_id: String,
    pub gateway_id: String,
    pub registered_agents: HashSet<String>,
    pub ephemeral: bool,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<String, ClientConnection>,
    gateways: HashMap<String, GatewayConnection>,
    agent_to_gateway: HashMap<String, String>,
    room_clients: HashMap<String, HashSet<String>>,
    online_users: HashMap<String, usize>,
    user_gateway_count: HashMap<String, usize>,
}

impl Inner {
    fn client_count_for(&self, user_id: &str) -> usize {
        self.online_users.get(user_id).copied().unwrap_or(0)
    }

    fn gateway_count_for(&self, user_id: &str) -> usize {
        self.user_gateway_count.get(user_id).copied().unwrap_or(0)
    }

    fn total_sockets(&self) -> usize {
        self.clients.len() + self.gateways.len()
    }
}

/// The union of client and gateway socket maps, room reverse-index, and the
/// agent→gateway routing table (§3, §4.3). One instance is shared (behind an
/// `Arc`) across the whole hub process.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    caps: Caps,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::with_caps(Caps::default())
    }
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry enforcing the given caps (§4.3), typically sourced
    /// from `agentim-config::HubConfig`.
    #[must_use]
    pub fn with_caps(caps: Caps) -> Self {
        Self { inner: RwLock::new(Inner::default()), caps }
    }

    /// Registers a newly-authenticated client socket (I1, I2).
    ///
    /// `conn_id` must not already identify a gateway socket — a socket
    /// identity belongs to at most one role (I1) — callers are expected to
    /// enforce this at the handshake layer by never reusing a gateway's
    /// `conn_id` for a client registration; this is checked defensively here
    /// too.
    pub async fn add_client(&self, conn_id: String, user_id: String, display_name: Option<String>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.gateways.contains_key(&conn_id) {
            return Err(RegistryError::ConnIdRoleConflict);
        }
        if inner.clients.contains_key(&conn_id) {
            return Err(RegistryError::AlreadyRegistered);
        }
        // Validate all caps against the *new* identity before mutating anything (§4.3 step 1).
        if inner.client_count_for(&user_id) >= self.caps.max_client_per_user {
            return Err(RegistryError::TooManyConnections);
        }
        if inner.total_sockets() >= self.caps.max_global {
            return Err(RegistryError::TooManyConnections);
        }

        *inner.online_users.entry(user_id.clone()).or_insert(0) += 1;
        inner.clients.insert(conn_id.clone(), ClientConnection {
            conn_id,
            user_id,
            display_name,
            joined_rooms: HashSet::new(),
        });
        Ok(())
    }

    /// Registers a newly-authenticated gateway socket (I1, I2).
    pub async fn add_gateway(&self, conn_id: String, user_id: String, gateway_id: String, ephemeral: bool) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.clients.contains_key(&conn_id) {
            return Err(RegistryError::ConnIdRoleConflict);
        }
        if inner.gateways.contains_key(&conn_id) {
            return Err(RegistryError::AlreadyRegistered);
        }
        if inner.gateway_count_for(&user_id) >= self.caps.max_gateway_per_user {
            return Err(RegistryError::TooManyConnections);
        }
        if inner.total_sockets() >= self.caps.max_global {
            return Err(RegistryError::TooManyConnections);
        }

        *inner.user_gateway_count.entry(user_id.clone()).or_insert(0) += 1;
        inner.gateways.insert(conn_id.clone(), GatewayConnection {
            conn_id,
            user_id,
            gateway_id,
            registered_agents: HashSet::new(),
            ephemeral,
        });
        Ok(())
    }

    /// Removes a client socket, decrementing its user's counter and pruning
    /// it from every room's reverse index (I2, I3).
    pub async fn remove_client(&self, conn_id: &str) -> Option<ClientConnection> {
        let mut inner = self.inner.write().await;
        let client = inner.clients.remove(conn_id)?;
        if let Some(count) = inner.online_users.get_mut(&client.user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.online_users.remove(&client.user_id);
            }
        }
        for room_id in &client.joined_rooms {
            if let Some(set) = inner.room_clients.get_mut(room_id) {
                set.remove(conn_id);
                if set.is_empty() {
                    inner.room_clients.remove(room_id);
                }
            }
        }
        Some(client)
    }

    /// Removes a gateway socket, decrementing its user's counter and
    /// clearing every agent it had registered from the routing table (I2, I4
    /// cascade per §3 `GatewayConnection` lifecycle).
    pub async fn remove_gateway(&self, conn_id: &str) -> Option<GatewayConnection> {
        let mut inner = self.inner.write().await;
        let gateway = inner.gateways.remove(conn_id)?;
        if let Some(count) = inner.user_gateway_count.get_mut(&gateway.user_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                inner.user_gateway_count.remove(&gateway.user_id);
            }
        }
        for agent_id in &gateway.registered_agents {
            inner.agent_to_gateway.remove(agent_id);
        }
        Some(gateway)
    }

    /// Joins `conn_id` to `room_id`, updating the connection's own set and
    /// the reverse index in lockstep (§4.3).
    pub async fn join_room(&self, conn_id: &str, room_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(conn_id) {
            return Err(RegistryError::NotFound);
        }
        if let Some(client) = inner.clients.get_mut(conn_id) {
            client.joined_rooms.insert(room_id.to_string());
        }
        inner.room_clients.entry(room_id.to_string()).or_default().insert(conn_id.to_string());
        Ok(())
    }

    /// Leaves `conn_id` from `room_id`, updating both sides of the index.
    pub async fn leave_room(&self, conn_id: &str, room_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(conn_id) {
            return Err(RegistryError::NotFound);
        }
        if let Some(client) = inner.clients.get_mut(conn_id) {
            client.joined_rooms.remove(room_id);
        }
        if let Some(set) = inner.room_clients.get_mut(room_id) {
            set.remove(conn_id);
            if set.is_empty() {
                inner.room_clients.remove(room_id);
            }
        }
        Ok(())
    }

    /// `evictUserFromRoom(userId, roomId)` (§4.3): removes `roomId` from
    /// every socket belonging to `userId`, keeping both sides of the index
    /// coherent. Returns the conn_ids that were evicted so the caller can
    /// send `server:room_removed` to each.
    pub async fn evict_user_from_room(&self, user_id: &str, room_id: &str) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let conn_ids: Vec<String> = inner
            .clients
            .values()
            .filter(|c| c.user_id == user_id && c.joined_rooms.contains(room_id))
            .map(|c| c.conn_id.clone())
            .collect();

        for conn_id in &conn_ids {
            if let Some(client) = inner.clients.get_mut(conn_id) {
                client.joined_rooms.remove(room_id);
            }
        }
        if let Some(set) = inner.room_clients.get_mut(room_id) {
            for conn_id in &conn_ids {
                set.remove(conn_id);
            }
            if set.is_empty() {
                inner.room_clients.remove(room_id);
            }
        }
        conn_ids
    }

    /// Registers an agent on a gateway socket (I4).
    pub async fn register_agent(&self, gateway_conn_id: &str, agent_id: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if !inner.gateways.contains_key(gateway_conn_id) {
            return Err(RegistryError::NotFound);
        }
        inner.agent_to_gateway.insert(agent_id.to_string(), gateway_conn_id.to_string());
        if let Some(gateway) = inner.gateways.get_mut(gateway_conn_id) {
            gateway.registered_agents.insert(agent_id.to_string());
        }
        Ok(())
    }

    /// Unregisters an agent, clearing its routing entry (I4).
    pub async fn unregister_agent(&self, gateway_conn_id: &str, agent_id: &str) {
        let mut inner = self.inner.write().await;
        inner.agent_to_gateway.remove(agent_id);
        if let Some(gateway) = inner.gateways.get_mut(gateway_conn_id) {
            gateway.registered_agents.remove(agent_id);
        }
    }

    /// The gateway socket an agent is currently routed through, if any (I4).
    pub async fn gateway_for_agent(&self, agent_id: &str) -> Option<String> {
        self.inner.read().await.agent_to_gateway.get(agent_id).cloned()
    }

    /// All client conn_ids currently joined to `room_id` (I3, used for fan-out).
    pub async fn room_members(&self, room_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .room_clients
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn client(&self, conn_id: &str) -> Option<ClientConnection> {
        self.inner.read().await.clients.get(conn_id).cloned()
    }

    pub async fn gateway(&self, conn_id: &str) -> Option<GatewayConnection> {
        self.inner.read().await.gateways.get(conn_id).cloned()
    }

    /// `onlineUsers[u]` (I2).
    pub async fn online_count(&self, user_id: &str) -> usize {
        self.inner.read().await.client_count_for(user_id)
    }

    /// `userGatewayCount[u]` (I2).
    pub async fn gateway_count(&self, user_id: &str) -> usize {
        self.inner.read().await.gateway_count_for(user_id)
    }

    pub async fn client_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    pub async fn gateway_count_total(&self) -> usize {
        self.inner.read().await.gateways.len()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_client_rejects_over_cap_and_leaves_counter_unchanged() {
        let registry = ConnectionRegistry::new();
        for i in 0..MAX_CLIENT_CONNECTIONS_PER_USER {
            registry.add_client(format!("c{i}"), "u1".into(), None).await.unwrap();
        }
        assert_eq!(registry.online_count("u1").await, MAX_CLIENT_CONNECTIONS_PER_USER);

        // I2: the rejected attempt must not perturb the counter.
        let result = registry.add_client("c-overflow".into(), "u1".into(), None).await;
        assert_eq!(result, Err(RegistryError::TooManyConnections));
        assert_eq!(registry.online_count("u1").await, MAX_CLIENT_CONNECTIONS_PER_USER);
        assert!(registry.client("c-overflow").await.is_none());
    }

    #[tokio::test]
    async fn remove_client_decrements_counter_and_never_goes_negative() {
        let registry = ConnectionRegistry::new();
        registry.add_client("c1".into(), "u1".into(), None).await.unwrap();
        assert_eq!(registry.online_count("u1").await, 1);
        registry.remove_client("c1").await;
        assert_eq!(registry.online_count("u1").await, 0);
        // Removing again (already gone) must not underflow.
        registry.remove_client("c1").await;
        assert_eq!(registry.online_count("u1").await, 0);
    }

    #[tokio::test]
    async fn room_reverse_index_matches_joined_rooms() {
        let registry = ConnectionRegistry::new();
        registry.add_client("c1".into(), "u1".into(), None).await.unwrap();
        registry.add_client("c2".into(), "u2".into(), None).await.unwrap();
        registry.join_room("c1", "room-a").await.unwrap();
        registry.join_room("c2", "room-a").await.unwrap();

        let mut members = registry.room_members("room-a").await;
        members.sort();
        assert_eq!(members, vec!["c1".to_string(), "c2".to_string()]);

        registry.leave_room("c1", "room-a").await.unwrap();
        assert_eq!(registry.room_members("room-a").await, vec!["c2".to_string()]);
    }

    #[tokio::test]
    async fn evict_user_from_room_clears_all_of_their_sockets() {
        let registry = ConnectionRegistry::new();
        registry.add_client("c1".into(), "u1".into(), None).await.unwrap();
        registry.add_client("c2".into(), "u1".into(), None).await.unwrap();
        registry.join_room("c1", "room-a").await.unwrap();
        registry.join_room("c2", "room-a").await.unwrap();

        let mut evicted = registry.evict_user_from_room("u1", "room-a").await;
        evicted.sort();
        assert_eq!(evicted, vec!["c1".to_string(), "c2".to_string()]);
        assert!(registry.room_members("room-a").await.is_empty());
        let client = registry.client("c1").await.unwrap();
        assert!(!client.joined_rooms.contains("room-a"));
    }

    #[tokio::test]
    async fn remove_gateway_clears_its_agents_from_the_routing_table() {
        let registry = ConnectionRegistry::new();
        registry.add_gateway("g1".into(), "u1".into(), "gw-1".into(), false).await.unwrap();
        registry.register_agent("g1", "agent-1").await.unwrap();
        assert_eq!(registry.gateway_for_agent("agent-1").await, Some("g1".to_string()));

        registry.remove_gateway("g1").await;
        assert_eq!(registry.gateway_for_agent("agent-1").await, None);
        assert_eq!(registry.gateway_count("u1").await, 0);
    }

    #[tokio::test]
    async fn conn_id_cannot_hold_both_roles_at_once() {
        let registry = ConnectionRegistry::new();
        registry.add_client("x".into(), "u1".into(), None).await.unwrap();
        let result = registry.add_gateway("x".into(), "u1".into(), "gw-1".into(), false).await;
        assert_eq!(result, Err(RegistryError::ConnIdRoleConflict));
    }

    #[tokio::test]
    async fn global_cap_rejects_across_users_and_leaves_state_unchanged() {
        let registry = ConnectionRegistry::with_caps(Caps { max_client_per_user: 10, max_gateway_per_user: 10, max_global: 2 });
        registry.add_client("c1".into(), "u1".into(), None).await.unwrap();
        registry.add_gateway("g1".into(), "u2".into(), "gw-1".into(), false).await.unwrap();

        let result = registry.add_client("c2".into(), "u3".into(), None).await;
        assert_eq!(result, Err(RegistryError::TooManyConnections));
        assert_eq!(registry.online_count("u3").await, 0);
        assert!(registry.client("c2").await.is_none());

        // Freeing a socket makes room again.
        registry.remove_gateway("g1").await;
        registry.add_client("c2".into(), "u3".into(), None).await.unwrap();
        assert_eq!(registry.online_count("u3").await, 1);
    }
}
