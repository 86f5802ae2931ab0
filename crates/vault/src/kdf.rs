//! PBKDF2-SHA256 key derivation for the machine key → AES-256 key.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::VaultError;

/// PBKDF2 parameters stored alongside the derivation (iteration count is
/// fixed per §6, but kept as a struct for the same swappable shape the
/// cipher trait uses).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct KdfParams {
    /// Number of HMAC-SHA256 rounds (default: 600,000 per §6).
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self { iterations: 600_000 }
    }
}

/// Derive a 256-bit key from key material and a salt using PBKDF2-HMAC-SHA256.
pub fn derive_key(material: &[u8], salt: &[u8], params: &KdfParams) -> Zeroizing<[u8; 32]> {
    let mut output = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(material, salt, params.iterations, output.as_mut());
    output
}

/// Generate a random 16-byte salt and return it as base64.
pub fn generate_salt() -> String {
    use {base64::Engine, rand::RngCore};

    let mut salt = [0u8; 16];
    rand::rng().fill_bytes(&mut salt);
    base64::engine::general_purpose::STANDARD.encode(salt)
}

/// Decode a base64-encoded salt.
pub fn decode_salt(b64: &str) -> Result<Vec<u8>, VaultError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(b64)
        .map_err(VaultError::Base64)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        // Real usage always runs the full 600k rounds (§6); tests use a
        // drastically lower count purely so the suite stays fast.
        KdfParams { iterations: 10 }
    }

    #[test]
    fn derive_key_deterministic() {
        let params = fast_params();
        let salt = b"test-salt-16byte";

        let key1 = derive_key(b"material", salt, &params);
        let key2 = derive_key(b"material", salt, &params);
        assert_eq!(*key1, *key2);
    }

    #[test]
    fn different_material_different_keys() {
        let params = fast_params();
        let salt = b"test-salt-16byte";

        let key1 = derive_key(b"material-a", salt, &params);
        let key2 = derive_key(b"material-b", salt, &params);
        assert_ne!(*key1, *key2);
    }

    #[test]
    fn different_salts_different_keys() {
        let params = fast_params();

        let key1 = derive_key(b"material", b"salt-aaaaaaaaaaaa", &params);
        let key2 = derive_key(b"material", b"salt-bbbbbbbbbbbb", &params);
        assert_ne!(*key1, *key2);
    }

    #[test]
    fn generate_and_decode_salt() {
        let b64 = generate_salt();
        let decoded = decode_salt(&b64).unwrap();
        assert_eq!(decoded.len(), 16);
    }

    #[test]
    fn kdf_params_serialization() {
        let params = KdfParams::default();
        let json = serde_json::to_string(&params).unwrap();
        let parsed: KdfParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.iterations, params.iterations);
    }
}
