//! Encrypts/decrypts gateway config secrets with a key derived from
//! machine-identifying material (§6): `hostname:username:homedir`, PBKDF2-
//! SHA256 with a fixed application salt, 600,000 iterations.
//!
//! Decryption additionally tries a legacy SHA-256(material) key so tokens
//! written before this KDF was introduced still load.

use base64::Engine;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    aes_gcm_cipher::AesGcmCipher,
    error::VaultError,
    kdf::{derive_key, KdfParams},
    traits::Cipher,
};

/// Fixed, non-secret application salt (not a substitute for the 600k
/// PBKDF2 rounds — it only prevents rainbow-table reuse across apps).
const APP_SALT: &[u8] = b"agentim-config-token-cipher-v1";

pub struct TokenCipher {
    cipher: AesGcmCipher,
    key: Zeroizing<[u8; 32]>,
    legacy_key: Zeroizing<[u8; 32]>,
}

impl TokenCipher {
    /// Build a cipher bound to the current machine's identity.
    pub fn for_machine() -> Result<Self, VaultError> {
        let material = machine_key_material()?;
        Self::from_material(&material)
    }

    fn from_material(material: &str) -> Result<Self, VaultError> {
        let key = derive_key(material.as_bytes(), APP_SALT, &KdfParams::default());
        let legacy_key = legacy_derive_key(material.as_bytes());
        Ok(Self {
            cipher: AesGcmCipher,
            key,
            legacy_key,
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        let blob = self.cipher.encrypt(&self.key, plaintext.as_bytes(), b"")?;
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypts a blob produced by [`encrypt`](Self::encrypt), falling back
    /// to the legacy key if the current key fails to authenticate it.
    pub fn decrypt(&self, encoded: &str) -> Result<String, VaultError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(VaultError::Base64)?;

        let plaintext = match self.cipher.decrypt(&self.key, &blob, b"") {
            Ok(pt) => pt,
            Err(_) => self.cipher.decrypt(&self.legacy_key, &blob, b"")?,
        };

        String::from_utf8(plaintext)
            .map_err(|e| VaultError::CipherError(format!("decrypted bytes not utf8: {e}")))
    }
}

fn legacy_derive_key(material: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(material);
    let digest = hasher.finalize();
    Zeroizing::new(digest.into())
}

fn machine_key_material() -> Result<String, VaultError> {
    let hostname = hostname::get()
        .map_err(|_| VaultError::MissingKeyMaterial("hostname"))?
        .to_string_lossy()
        .into_owned();
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .map_err(|_| VaultError::MissingKeyMaterial("username"))?;
    let home = directories::BaseDirs::new()
        .map(|d| d.home_dir().to_string_lossy().into_owned())
        .ok_or(VaultError::MissingKeyMaterial("home directory"))?;
    Ok(format!("{hostname}:{username}:{home}"))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_under_same_material() {
        let cipher = TokenCipher::from_material("host:user:/home/user").unwrap();
        let encrypted = cipher.encrypt("super-secret-token").unwrap();
        let decrypted = cipher.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted, "super-secret-token");
    }

    #[test]
    fn different_material_cannot_decrypt() {
        let a = TokenCipher::from_material("host-a:user:/home/user").unwrap();
        let b = TokenCipher::from_material("host-b:user:/home/user").unwrap();
        let encrypted = a.encrypt("token").unwrap();
        assert!(b.decrypt(&encrypted).is_err());
    }

    #[test]
    fn legacy_key_fallback_decrypts_old_blob() {
        let cipher = TokenCipher::from_material("host:user:/home/user").unwrap();
        let legacy_only_cipher = AesGcmCipher;
        let legacy_blob = legacy_only_cipher
            .encrypt(&cipher.legacy_key, b"legacy-token", b"")
            .unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(legacy_blob);

        let decrypted = cipher.decrypt(&encoded).unwrap();
        assert_eq!(decrypted, "legacy-token");
    }

    #[test]
    fn malformed_base64_errors() {
        let cipher = TokenCipher::from_material("host:user:/home/user").unwrap();
        assert!(cipher.decrypt("not valid base64!!").is_err());
    }
}
