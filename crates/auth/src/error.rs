//! Verification-failure taxonomy (§4.1).

use thiserror::Error;

/// Reasons a bearer token fails verification.
///
/// All variants map to the same unauthenticated result at the wire boundary
/// (§4.1) — the discrimination exists so the gateway session can tell a
/// "try a refresh" failure from a "re-login" failure, not so the hub leaks it
/// to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("malformed token")]
    Malformed,

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("wrong issuer or audience")]
    WrongIssuerOrAudience,

    #[error("wrong token type")]
    WrongType,

    #[error("token revoked")]
    Revoked,
}

impl VerifyError {
    /// The short, actionable string surfaced to the peer (§7).
    #[must_use]
    pub fn wire_message(self) -> &'static str {
        match self {
            Self::WrongType => "Invalid token type",
            Self::Revoked => "Token revoked",
            Self::Malformed
            | Self::BadSignature
            | Self::Expired
            | Self::WrongIssuerOrAudience => "Invalid or expired token",
        }
    }
}
