//! Access token verification (§4.1) and cross-process revocation (§4.2).

pub mod error;
pub mod revocation;
pub mod token_verifier;

pub use {
    error::VerifyError,
    revocation::{RevocationRegistry, SharedRevocationStore, SignedRevocation},
    token_verifier::{TokenType, TokenVerifier, VerifiedClaims},
};
