//! Gateway Session failure taxonomy (§4.5).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("hub protocol version mismatch")]
    ProtocolMismatch,

    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("shutdown")]
    Shutdown,

    #[error("max reconnect attempts ({0}) exceeded")]
    MaxAttemptsExceeded(u32),
}
