//! Cipher trait for swappable authenticated encryption backends.

use crate::error::VaultError;

/// Trait for authenticated encryption with associated data (AEAD).
///
/// Implementations can be swapped without changing the rest of the vault.
/// Each implementation has a unique version tag, enabling future cipher
/// migrations.
pub trait Cipher: Send + Sync {
    /// Unique identifier for this cipher.
    fn version_tag(&self) -> u8;

    /// Encrypt `plaintext` with `key` and `aad` (additional authenticated data).
    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError>;

    /// Decrypt a blob previously produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, key: &[u8; 32], ciphertext: &[u8], aad: &[u8])
    -> Result<Vec<u8>, VaultError>;
}
