//! At-rest encryption of loose blob payloads: AES-256-GCM, keyed by an
//! Argon2id derivation of the repository passphrase.
//!
//! Encryption happens after hashing (hash-then-encrypt), so objects keep
//! their plaintext content address and deduplication is unaffected. The
//! on-disk form is `MENC ‖ nonce(12) ‖ ciphertext`; a GCM tag mismatch
//! surfaces as `DecryptionFailed` and aborts the enclosing operation.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::config::KdfConfig;
use crate::errors::MemError;

/// File prefix marking an encrypted loose object.
pub const ENC_MAGIC: &[u8; 4] = b"MENC";

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

/// Floor for the Argon2id memory cost: 64 MiB in KiB.
const MIN_MEMORY_KIB: u32 = 65536;
/// Floor for the Argon2id pass count.
const MIN_PASSES: u32 = 3;

/// Random KDF salt for a newly encrypted repository.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// AES-256-GCM cipher over loose blob payloads.
#[derive(Clone)]
pub struct BlobCipher {
    cipher: Aes256Gcm,
}

impl BlobCipher {
    /// Derive the key from a passphrase with Argon2id. The configured
    /// hardness is clamped up to the 64 MiB / 3 pass floor.
    pub fn from_passphrase(
        passphrase: &str,
        salt: &[u8],
        kdf: &KdfConfig,
    ) -> Result<BlobCipher, MemError> {
        let params = Params::new(
            kdf.memory.max(MIN_MEMORY_KIB),
            kdf.passes.max(MIN_PASSES),
            1,
            Some(KEY_LEN),
        )
        .map_err(|e| MemError::InvalidConfig(format!("encryption.kdf: {e}")))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = [0u8; KEY_LEN];
        argon
            .hash_password_into(passphrase.as_bytes(), salt, &mut key)
            .map_err(|e| MemError::InvalidConfig(format!("key derivation failed: {e}")))?;
        Ok(BlobCipher {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        })
    }

    /// True when `bytes` carries the encrypted-object prefix.
    pub fn is_encrypted(bytes: &[u8]) -> bool {
        bytes.len() > ENC_MAGIC.len() + NONCE_LEN && bytes.starts_with(ENC_MAGIC)
    }

    /// Encrypt with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, MemError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| MemError::DecryptionFailed("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(ENC_MAGIC.len() + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(ENC_MAGIC);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a `MENC` envelope; the GCM tag authenticates the payload.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, MemError> {
        if !Self::is_encrypted(data) {
            return Err(MemError::DecryptionFailed(
                "missing encrypted-object prefix".to_string(),
            ));
        }
        let nonce = &data[ENC_MAGIC.len()..ENC_MAGIC.len() + NONCE_LEN];
        let ciphertext = &data[ENC_MAGIC.len() + NONCE_LEN..];
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| MemError::DecryptionFailed("GCM tag mismatch".to_string()))
    }
}
