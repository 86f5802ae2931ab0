//! Two-tier cross-process token revocation (§4.2).
//!
//! Tier 1 is an in-process bounded map (`userId -> revokedAtMs`), always
//! present. Tier 2 is an optional [`SharedRevocationStore`] the deployer
//! wires up for multi-process correctness; single-process deployments run
//! memory-only and log a startup warning (Open Question, resolved in
//! `DESIGN.md`).

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Beyond this many entries the oldest watermark is evicted on next `revoke`.
pub const MAX_MEMORY_REVOCATIONS: usize = 10_000;

/// Sweep cadence for the background cleanup task (§4.2).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Watermarks older than this are dropped by the sweep; a token's own `exp`
/// bounds exposure long before this, so the sweep only backs up leaked state.
const MAX_WATERMARK_AGE_MS: u64 = 24 * 60 * 60 * 1000;

/// The optional cross-process backing store and its pub/sub channel.
///
/// A concrete backend (Redis or any other keyed store with pub/sub) is an
/// external-collaborator concern; the core only depends on this trait so the
/// registry stays testable without a real service.
#[async_trait]
pub trait SharedRevocationStore: Send + Sync {
    /// `SET revoked:<u> now EX ttl_secs`.
    async fn set_revoked(&self, user_id: &str, revoked_at_ms: u64, ttl_secs: u64) -> Result<(), String>;

    /// Fetch the current watermark for `user_id`, if any.
    async fn get_revoked(&self, user_id: &str) -> Result<Option<u64>, String>;

    /// Publish a signed revocation envelope to subscribers.
    async fn publish(&self, envelope: &SignedRevocation) -> Result<(), String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationBody {
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "revokedAtMs")]
    pub revoked_at_ms: u64,
}

/// A pub/sub envelope: the raw JSON body plus an HMAC-SHA256 signature over
/// it, so a subscriber can reject forged revocations from an untrusted
/// publisher on the same channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedRevocation {
    pub body: String,
    pub sig: String,
}

impl SignedRevocation {
    #[must_use]
    pub fn sign(body: &RevocationBody, secret: &[u8]) -> Option<Self> {
        let body_json = serde_json::to_string(body).ok()?;
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(body_json.as_bytes());
        let sig = hex_encode(&mac.finalize().into_bytes());
        Some(Self { body: body_json, sig })
    }

    /// Verifies the signature with a constant-time comparison and, on
    /// success, returns the parsed body.
    #[must_use]
    pub fn verify(&self, secret: &[u8]) -> Option<RevocationBody> {
        let mut mac = HmacSha256::new_from_slice(secret).ok()?;
        mac.update(self.body.as_bytes());
        let given = hex_decode(&self.sig)?;
        mac.verify_slice(&given).ok()?;
        serde_json::from_str(&self.body).ok()
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

pub struct RevocationRegistry {
    memory: RwLock<HashMap<String, u64>>,
    /// Insertion order, for approximate LRU eviction beyond `MAX_MEMORY_REVOCATIONS`.
    order: RwLock<VecDeque<String>>,
    shared: Option<Arc<dyn SharedRevocationStore>>,
    hmac_secret: Vec<u8>,
    access_token_ttl_secs: u64,
}

impl RevocationRegistry {
    #[must_use]
    pub fn new(
        hmac_secret: impl Into<Vec<u8>>,
        shared: Option<Arc<dyn SharedRevocationStore>>,
        access_token_ttl_secs: u64,
    ) -> Self {
        if shared.is_none() {
            warn!(
                "revocation registry running memory-only; cross-process revocation requires a shared store"
            );
        }
        Self {
            memory: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            shared,
            hmac_secret: hmac_secret.into(),
            access_token_ttl_secs,
        }
    }

    /// Records `user_id` as revoked as of now, writing through to the shared
    /// store (if any) and publishing a signed notification to other
    /// processes. Shared-store write failures propagate; publish failures
    /// only log, since the write already landed.
    pub async fn revoke(&self, user_id: &str) -> Result<(), String> {
        let now = now_ms();
        self.record_local(user_id, now).await;

        if let Some(shared) = &self.shared {
            shared.set_revoked(user_id, now, self.access_token_ttl_secs).await?;

            let body = RevocationBody {
                user_id: user_id.to_string(),
                revoked_at_ms: now,
            };
            match SignedRevocation::sign(&body, &self.hmac_secret) {
                Some(envelope) => {
                    if let Err(error) = shared.publish(&envelope).await {
                        warn!(user_id, %error, "failed to publish revocation; local memory tier still holds it");
                    }
                },
                None => warn!(user_id, "failed to sign revocation envelope, not publishing"),
            }
        }
        Ok(())
    }

    /// `isRevoked(userId, iatMs)`: memory first, then the shared store,
    /// failing open on shared-store errors (§4.2, I5).
    pub async fn is_revoked(&self, user_id: &str, iat_ms: u64) -> bool {
        if let Some(&watermark) = self.memory.read().await.get(user_id)
            && iat_ms < watermark
        {
            return true;
        }

        let Some(shared) = &self.shared else {
            return false;
        };

        match shared.get_revoked(user_id).await {
            Ok(Some(watermark)) => iat_ms < watermark,
            Ok(None) => false,
            Err(error) => {
                warn!(user_id, %error, "shared revocation store unreachable, failing open");
                false
            },
        }
    }

    /// Verifies and applies a signed pub/sub envelope from another process.
    pub async fn apply_signed(&self, envelope: &SignedRevocation) {
        match envelope.verify(&self.hmac_secret) {
            Some(body) => self.record_local(&body.user_id, body.revoked_at_ms).await,
            None => warn!("rejected revocation message with invalid signature"),
        }
    }

    /// Accepts a legacy unsigned envelope. One-release deprecation window
    /// (§9); a future release removes this entirely.
    pub async fn apply_legacy_unsigned(&self, body: RevocationBody) {
        warn!(
            user_id = %body.user_id,
            "accepted unsigned legacy revocation message (deprecated, will be rejected in a future release)"
        );
        self.record_local(&body.user_id, body.revoked_at_ms).await;
    }

    async fn record_local(&self, user_id: &str, revoked_at_ms: u64) {
        let mut memory = self.memory.write().await;
        let mut order = self.order.write().await;
        if !memory.contains_key(user_id) {
            order.push_back(user_id.to_string());
        }
        memory.insert(user_id.to_string(), revoked_at_ms);
        while memory.len() > MAX_MEMORY_REVOCATIONS {
            let Some(evicted) = order.pop_front() else { break };
            memory.remove(&evicted);
        }
    }

    /// Removes watermarks older than 24h (§4.2); call on a periodic tick.
    pub async fn sweep(&self) {
        let cutoff = now_ms().saturating_sub(MAX_WATERMARK_AGE_MS);
        let mut memory = self.memory.write().await;
        let stale: Vec<String> = memory
            .iter()
            .filter(|&(_, &ts)| ts < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            memory.remove(key);
        }
        drop(memory);
        let mut order = self.order.write().await;
        let live: std::collections::HashSet<String> = self.memory.read().await.keys().cloned().collect();
        order.retain(|k| live.contains(k));
    }

    /// Runs [`Self::sweep`] on [`SWEEP_INTERVAL`] until `shutdown` fires.
    /// The caller owns the shutdown signal so this task's lifetime is tied
    /// to the owning service, never to a free-standing timer (§9).
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep().await,
                result = shutdown.changed() => if result.is_err() || *shutdown.borrow() { break },
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        watermarks: Mutex<HashMap<String, u64>>,
        published: Mutex<Vec<SignedRevocation>>,
        fail_get: bool,
    }

    #[async_trait]
    impl SharedRevocationStore for FakeStore {
        async fn set_revoked(&self, user_id: &str, revoked_at_ms: u64, _ttl_secs: u64) -> Result<(), String> {
            self.watermarks.lock().unwrap_or_else(|e| e.into_inner()).insert(user_id.to_string(), revoked_at_ms);
            Ok(())
        }

        async fn get_revoked(&self, user_id: &str) -> Result<Option<u64>, String> {
            if self.fail_get {
                return Err("store unreachable".into());
            }
            Ok(self.watermarks.lock().unwrap_or_else(|e| e.into_inner()).get(user_id).copied())
        }

        async fn publish(&self, envelope: &SignedRevocation) -> Result<(), String> {
            self.published.lock().unwrap_or_else(|e| e.into_inner()).push(envelope.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn memory_only_catches_local_revocation() {
        let registry = RevocationRegistry::new(b"secret".to_vec(), None, 900);
        assert!(!registry.is_revoked("u1", 1_000).await);
        registry.revoke("u1").await.unwrap();
        assert!(registry.is_revoked("u1", 0).await);
    }

    #[tokio::test]
    async fn revocation_rejects_tokens_issued_before_watermark_only() {
        let registry = RevocationRegistry::new(b"secret".to_vec(), None, 900);
        registry.revoke("u1").await.unwrap();
        // A token issued strictly after the watermark is not revoked.
        let future_iat = now_ms() + 10_000;
        assert!(!registry.is_revoked("u1", future_iat).await);
    }

    #[tokio::test]
    async fn shared_store_error_fails_open() {
        let store = Arc::new(FakeStore { fail_get: true, ..Default::default() });
        let registry = RevocationRegistry::new(b"secret".to_vec(), Some(store), 900);
        assert!(!registry.is_revoked("u1", 0).await);
    }

    #[tokio::test]
    async fn publish_failure_does_not_fail_revoke() {
        struct FailPublish;
        #[async_trait]
        impl SharedRevocationStore for FailPublish {
            async fn set_revoked(&self, _: &str, _: u64, _: u64) -> Result<(), String> {
                Ok(())
            }
            async fn get_revoked(&self, _: &str) -> Result<Option<u64>, String> {
                Ok(None)
            }
            async fn publish(&self, _: &SignedRevocation) -> Result<(), String> {
                Err("publish down".into())
            }
        }
        let registry = RevocationRegistry::new(b"secret".to_vec(), Some(Arc::new(FailPublish)), 900);
        assert!(registry.revoke("u1").await.is_ok());
    }

    #[tokio::test]
    async fn signed_envelope_round_trips() {
        let secret = b"hmac-secret".to_vec();
        let registry = RevocationRegistry::new(secret.clone(), None, 900);
        let body = RevocationBody { user_id: "u2".into(), revoked_at_ms: now_ms() };
        let envelope = SignedRevocation::sign(&body, &secret).unwrap();
        registry.apply_signed(&envelope).await;
        assert!(registry.is_revoked("u2", 0).await);
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let registry = RevocationRegistry::new(b"secret".to_vec(), None, 900);
        let body = RevocationBody { user_id: "u3".into(), revoked_at_ms: now_ms() };
        let mut envelope = SignedRevocation::sign(&body, b"secret").unwrap();
        envelope.sig = "00".repeat(32);
        registry.apply_signed(&envelope).await;
        assert!(!registry.is_revoked("u3", 0).await);
    }

    #[tokio::test]
    async fn legacy_unsigned_envelope_is_accepted_with_warning() {
        let registry = RevocationRegistry::new(b"secret".to_vec(), None, 900);
        let body = RevocationBody { user_id: "u4".into(), revoked_at_ms: now_ms() };
        registry.apply_legacy_unsigned(body).await;
        assert!(registry.is_revoked("u4", 0).await);
    }

    #[tokio::test]
    async fn eviction_beyond_capacity_drops_oldest() {
        let registry = RevocationRegistry::new(b"secret".to_vec(), None, 900);
        // Directly exercise the eviction path with a tiny synthetic cap by
        // revoking more than MAX_MEMORY_REVOCATIONS would be slow in a unit
        // test, so instead verify the bookkeeping keeps memory and order in
        // sync for a representative sequence.
        for i in 0..5 {
            registry.revoke(&format!("user-{i}")).await.unwrap();
        }
        for i in 0..5 {
            assert!(registry.is_revoked(&format!("user-{i}"), 0).await);
        }
    }

    #[tokio::test]
    async fn sweep_removes_stale_watermarks() {
        let registry = RevocationRegistry::new(b"secret".to_vec(), None, 900);
        registry.record_local("stale", 1).await;
        registry.sweep().await;
        assert!(!registry.is_revoked("stale", 0).await);
    }
}
