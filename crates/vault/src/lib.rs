//! At-rest encryption for gateway-persisted tokens (§6).
//!
//! AES-256-GCM with a PBKDF2-SHA256-derived machine key. Trait-based
//! [`Cipher`] design allows swapping the encryption backend without
//! disturbing callers; [`TokenCipher`] additionally falls back to a legacy
//! SHA-256-derived key on decrypt so tokens written by an older build still
//! load.

pub mod aes_gcm_cipher;
pub mod error;
pub mod kdf;
pub mod token_cipher;
pub mod traits;

pub use {
    aes_gcm_cipher::AesGcmCipher,
    error::VaultError,
    token_cipher::TokenCipher,
    traits::Cipher,
};
