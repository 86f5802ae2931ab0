//! Broker-local failure taxonomy (§4.4, §7).
//!
//! Per-frame handler failures never propagate as a hard error to callers —
//! the dispatch loop turns every one of these into a `server:error` sent
//! back to the originating socket (§4.4 "Failure semantics"). This enum
//! exists so handlers have a typed way to describe *what* went wrong before
//! that translation happens.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("authentication failed: {0}")]
    Unauthenticated(&'static str),

    #[error("socket is not bound to a connection")]
    NotBound,

    #[error("message exceeds the maximum buffer size")]
    MessageTooLarge,

    #[error("protocol version mismatch")]
    ProtocolMismatch,

    #[error("permission registry is full")]
    PermissionRegistryFull,

    #[error(transparent)]
    Registry(#[from] agentim_registry::RegistryError),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl BrokerError {
    /// The `{code, message}` pair sent to the peer as `server:error` (§4.4, §7).
    #[must_use]
    pub fn wire(&self) -> (&'static str, String) {
        use agentim_protocol::error_codes;
        match self {
            Self::Unauthenticated(_) => (error_codes::INVALID_TOKEN, self.to_string()),
            Self::NotBound => ("NOT_BOUND", self.to_string()),
            Self::MessageTooLarge => (error_codes::MESSAGE_TOO_LARGE, self.to_string()),
            Self::ProtocolMismatch => (error_codes::PROTOCOL_VERSION_MISMATCH, self.to_string()),
            Self::PermissionRegistryFull => (error_codes::ALREADY_PROCESSING, self.to_string()),
            Self::Registry(_) => ("REGISTRY_ERROR", self.to_string()),
            Self::Persistence(_) => ("PERSISTENCE_ERROR", self.to_string()),
        }
    }
}
