//! AES-256-GCM [`Cipher`] implementation with the spec's wire layout:
//! `iv[12] || tag[16] || ciphertext`, as opposed to `aes-gcm`'s native
//! `ciphertext || tag` output — so the bytes are rearranged at the boundary.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::{error::VaultError, traits::Cipher};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct AesGcmCipher;

impl Cipher for AesGcmCipher {
    fn version_tag(&self) -> u8 {
        1
    }

    fn encrypt(&self, key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, VaultError> {
        let cipher = Aes256Gcm::new(key.into());
        let mut iv = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut iv);
        let nonce = Nonce::from_slice(&iv);

        let sealed = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| VaultError::CipherError(format!("encrypt failed: {e}")))?;

        // `sealed` is `ciphertext || tag`; reassemble as `iv || tag || ct`.
        if sealed.len() < TAG_LEN {
            return Err(VaultError::CipherError("ciphertext shorter than tag".into()));
        }
        let (ct, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ct.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(tag);
        out.extend_from_slice(ct);
        Ok(out)
    }

    fn decrypt(
        &self,
        key: &[u8; 32],
        blob: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::CipherError("blob too short".into()));
        }
        let (iv, rest) = blob.split_at(NONCE_LEN);
        let (tag, ct) = rest.split_at(TAG_LEN);

        // Reassemble into the `ciphertext || tag` layout the crate expects.
        let mut sealed = Vec::with_capacity(ct.len() + TAG_LEN);
        sealed.extend_from_slice(ct);
        sealed.extend_from_slice(tag);

        let cipher = Aes256Gcm::new(key.into());
        let nonce = Nonce::from_slice(iv);
        cipher
            .decrypt(nonce, Payload { msg: &sealed, aad })
            .map_err(|e| VaultError::CipherError(format!("decrypt failed: {e}")))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [7u8; 32];
        let cipher = AesGcmCipher;
        let ct = cipher.encrypt(&key, b"hello world", b"aad").unwrap();
        let pt = cipher.decrypt(&key, &ct, b"aad").unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn wrong_key_fails() {
        let cipher = AesGcmCipher;
        let ct = cipher.encrypt(&[1u8; 32], b"secret", b"").unwrap();
        assert!(cipher.decrypt(&[2u8; 32], &ct, b"").is_err());
    }

    #[test]
    fn wrong_aad_fails() {
        let key = [9u8; 32];
        let cipher = AesGcmCipher;
        let ct = cipher.encrypt(&key, b"secret", b"right-aad").unwrap();
        assert!(cipher.decrypt(&key, &ct, b"wrong-aad").is_err());
    }

    #[test]
    fn layout_is_iv_tag_ciphertext() {
        let key = [3u8; 32];
        let cipher = AesGcmCipher;
        let plaintext = b"0123456789";
        let blob = cipher.encrypt(&key, plaintext, b"").unwrap();
        assert_eq!(blob.len(), NONCE_LEN + TAG_LEN + plaintext.len());
    }
}
