//! Bounded pending-permission map with TTL cleanup (§3 `PendingPermission`,
//! §4.7).
//!
//! Grounded on `moltis-tools::approval::ApprovalManager`'s `pending` map +
//! oneshot-resolution shape, generalized from command-approval to the
//! agent-permission-request exchange and given the hard capacity and sweep
//! the teacher's manager does not need (a single operator machine never
//! queues thousands of exec approvals; a multi-tenant hub can).

use std::{
    collections::HashMap,
    time::{SystemTime, UNIX_EPOCH},
};

use agentim_protocol::PermissionDecision;
use thiserror::Error;
use tokio::sync::{oneshot, RwLock};

/// Hard cap on simultaneously pending permission requests (§3 invariant 5).
pub const MAX_PENDING: usize = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission registry is full")]
    Full,

    #[error("no pending permission with that request id")]
    NotFound,

    #[error("permission request already resolved")]
    AlreadyResolved,
}

struct Pending {
    agent_id: String,
    room_id: String,
    /// The gateway socket that should receive the resolution.
    gateway_conn_id: String,
    expires_at_ms: u64,
    resolver: Option<oneshot::Sender<PermissionDecision>>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A request newly admitted into the store, handed back to the caller so it
/// can await the eventual decision (or a sweep-driven timeout).
pub struct Admitted {
    pub receiver: oneshot::Receiver<PermissionDecision>,
}

#[derive(Default)]
pub struct PermissionStore {
    pending: RwLock<HashMap<String, Pending>>,
}

impl PermissionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new pending permission request (§4.4 `gateway:permission_request`).
    /// Rejects with [`PermissionError::Full`] once `MAX_PENDING` is reached
    /// (§3 invariant 5) — the caller is expected to respond with
    /// `server:error{ALREADY_PROCESSING}` on rejection and emit nothing else.
    pub async fn create(
        &self,
        request_id: String,
        agent_id: String,
        room_id: String,
        gateway_conn_id: String,
        expires_at_ms: u64,
    ) -> Result<Admitted, PermissionError> {
        let mut pending = self.pending.write().await;
        if pending.len() >= MAX_PENDING {
            return Err(PermissionError::Full);
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(request_id, Pending {
            agent_id,
            room_id,
            gateway_conn_id,
            expires_at_ms,
            resolver: Some(tx),
        });
        Ok(Admitted { receiver: rx })
    }

    /// Resolves a pending request exactly once (§3 invariant 5). Returns the
    /// gateway socket the resolution should be forwarded to.
    pub async fn resolve(&self, request_id: &str, decision: PermissionDecision) -> Result<String, PermissionError> {
        let mut pending = self.pending.write().await;
        let entry = pending.get_mut(request_id).ok_or(PermissionError::NotFound)?;
        let resolver = entry.resolver.take().ok_or(PermissionError::AlreadyResolved)?;
        let gateway_conn_id = entry.gateway_conn_id.clone();
        pending.remove(request_id);
        // A dropped receiver (adapter gave up waiting) is not an error here.
        let _ = resolver.send(decision);
        Ok(gateway_conn_id)
    }

    /// Removes every request past its `expires_at_ms`, resolving each with
    /// `Deny` (a timeout is a denial, not left hanging) and returning the
    /// removed request ids for logging.
    pub async fn sweep(&self) -> Vec<String> {
        let now = now_ms();
        let mut pending = self.pending.write().await;
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, p)| p.expires_at_ms <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(mut entry) = pending.remove(id)
                && let Some(resolver) = entry.resolver.take()
            {
                let _ = resolver.send(PermissionDecision::Deny);
            }
        }
        expired
    }

    pub async fn len(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

#[allow(clippy::unwrap_used, clippy::expect_used)]
    #[cfg(test)]
    async fn summary(&self, request_id: &str) -> Option<(String, String)> {
        let pending = self.pending.read().await;
        pending.get(request_id).map(|p| (p.agent_id.clone(), p.room_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_delivers_decision_exactly_once() {
        let store = PermissionStore::new();
        let admitted = store
            .create("req-1".into(), "agent-1".into(), "room-1".into(), "gw-1".into(), u64::MAX)
            .await
            .unwrap();

        let gateway = store.resolve("req-1", PermissionDecision::Allow).await.unwrap();
        assert_eq!(gateway, "gw-1");
        assert_eq!(admitted.receiver.await, Ok(PermissionDecision::Allow));

        // Second resolution of the same (now-removed) id fails.
        assert_eq!(
            store.resolve("req-1", PermissionDecision::Deny).await,
            Err(PermissionError::NotFound)
        );
    }

    #[tokio::test]
    async fn create_rejects_once_capacity_is_reached() {
        let store = PermissionStore::new();
        for i in 0..MAX_PENDING {
            store
                .create(format!("req-{i}"), "a".into(), "r".into(), "g".into(), u64::MAX)
                .await
                .unwrap();
        }
        let result = store.create("overflow".into(), "a".into(), "r".into(), "g".into(), u64::MAX).await;
        assert!(matches!(result, Err(PermissionError::Full)));
        assert_eq!(store.len().await, MAX_PENDING);
    }

    #[tokio::test]
    async fn sweep_resolves_expired_requests_as_deny() {
        let store = PermissionStore::new();
        let admitted = store
            .create("req-1".into(), "a".into(), "r".into(), "g".into(), 0)
            .await
            .unwrap();
        let swept = store.sweep().await;
        assert_eq!(swept, vec!["req-1".to_string()]);
        assert_eq!(admitted.receiver.await, Ok(PermissionDecision::Deny));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn summary_reflects_admitted_request() {
        let store = PermissionStore::new();
        store
            .create("req-1".into(), "agent-9".into(), "room-9".into(), "gw-1".into(), u64::MAX)
            .await
            .unwrap();
        assert_eq!(store.summary("req-1").await, Some(("agent-9".to_string(), "room-9".to_string())));
    }
}
