//! Vault error types.

/// Errors produced by token cipher operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Encryption or decryption failed (tampered data, wrong key).
    #[error("cipher error: {0}")]
    CipherError(String),

    /// Base64 decoding failed.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Could not derive machine key material (no home directory, etc).
    #[error("could not determine machine key material: {0}")]
    MissingKeyMaterial(&'static str),
}
