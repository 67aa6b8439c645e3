//! Ed25519 commit signing.
//!
//! Keys live under `.mem/keys/`: the optional private key as 32 hex-encoded
//! seed bytes in `signing.key`, public keys as `<fingerprint>.pub` holding
//! 32 hex-encoded bytes. A key's fingerprint is the SHA-256 of its public
//! bytes, rendered as lowercase hex.

use std::fs;
use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use tracing::debug;

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::utils::atomic_write;

const SIGNING_KEY_FILE: &str = "signing.key";
const PUB_SUFFIX: &str = ".pub";

/// SHA-256 fingerprint of a public key, lowercase hex.
pub fn fingerprint(key: &VerifyingKey) -> String {
    ObjectHash::new(key.as_bytes()).to_string()
}

/// Key directory handle: loads, stores, and enumerates Ed25519 keys.
#[derive(Debug, Clone)]
pub struct Keyring {
    dir: PathBuf,
}

impl Keyring {
    pub fn new(dir: &Path) -> Keyring {
        Keyring {
            dir: dir.to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generate a fresh signing keypair, persist both halves, and return
    /// the public fingerprint.
    pub fn generate(&self) -> Result<String, MemError> {
        let signing = SigningKey::generate(&mut OsRng);
        let id = fingerprint(&signing.verifying_key());
        atomic_write(
            &self.dir.join(SIGNING_KEY_FILE),
            hex::encode(signing.to_bytes()).as_bytes(),
        )?;
        self.import_public(&signing.verifying_key())?;
        debug!(key = %id, "signing key generated");
        Ok(id)
    }

    /// The configured private key, when present.
    pub fn signing_key(&self) -> Result<Option<SigningKey>, MemError> {
        let path = self.dir.join(SIGNING_KEY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| MemError::SignatureInvalid(format!("bad signing key encoding: {e}")))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MemError::SignatureInvalid("signing key must be 32 bytes".to_string()))?;
        Ok(Some(SigningKey::from_bytes(&seed)))
    }

    /// Store a public key under its fingerprint; idempotent.
    pub fn import_public(&self, key: &VerifyingKey) -> Result<String, MemError> {
        let id = fingerprint(key);
        let path = self.dir.join(format!("{id}{PUB_SUFFIX}"));
        if !path.exists() {
            atomic_write(&path, hex::encode(key.as_bytes()).as_bytes())?;
        }
        Ok(id)
    }

    /// Look up a public key by fingerprint.
    pub fn public_key(&self, id: &str) -> Result<Option<VerifyingKey>, MemError> {
        let path = self.dir.join(format!("{id}{PUB_SUFFIX}"));
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        let bytes = hex::decode(text.trim())
            .map_err(|e| MemError::SignatureInvalid(format!("bad public key encoding: {e}")))?;
        let raw: [u8; 32] = bytes
            .try_into()
            .map_err(|_| MemError::SignatureInvalid("public key must be 32 bytes".to_string()))?;
        let key = VerifyingKey::from_bytes(&raw)
            .map_err(|e| MemError::SignatureInvalid(format!("bad public key: {e}")))?;
        Ok(Some(key))
    }

    /// All stored public key fingerprints.
    pub fn list_public(&self) -> Result<Vec<String>, MemError> {
        let mut ids = Vec::new();
        if !self.dir.exists() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name().to_string_lossy().into_owned();
            if let Some(id) = name.strip_suffix(PUB_SUFFIX) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Sign a Merkle root; returns `(fingerprint, signature bytes)`.
    pub fn sign_root(&self, root: ObjectHash) -> Result<Option<(String, Vec<u8>)>, MemError> {
        match self.signing_key()? {
            Some(key) => {
                let signature = key.sign(root.as_ref());
                let id = fingerprint(&key.verifying_key());
                Ok(Some((id, signature.to_vec())))
            }
            None => Ok(None),
        }
    }

    /// Verify a signature over a Merkle root against a stored public key.
    pub fn verify_root(
        &self,
        key_id: &str,
        root: ObjectHash,
        signature: &[u8],
    ) -> Result<(), MemError> {
        let key = self.public_key(key_id)?.ok_or_else(|| {
            MemError::SignatureInvalid(format!("no public key for `{key_id}`"))
        })?;
        let signature = Signature::from_slice(signature)
            .map_err(|e| MemError::SignatureInvalid(format!("bad signature encoding: {e}")))?;
        key.verify(root.as_ref(), &signature)
            .map_err(|_| MemError::SignatureInvalid(format!("signature by `{key_id}` rejected")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Generate, sign, and verify round-trips through the on-disk keys.
    #[test]
    fn test_sign_verify_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path());
        let id = keyring.generate().unwrap();
        assert_eq!(keyring.list_public().unwrap(), vec![id.clone()]);

        let root = ObjectHash::new(b"merkle root");
        let (signed_id, signature) = keyring.sign_root(root).unwrap().unwrap();
        assert_eq!(signed_id, id);
        keyring.verify_root(&id, root, &signature).unwrap();
    }

    /// A different root or mangled signature is rejected.
    #[test]
    fn test_verify_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path());
        let id = keyring.generate().unwrap();

        let root = ObjectHash::new(b"merkle root");
        let (_, mut signature) = keyring.sign_root(root).unwrap().unwrap();

        assert!(
            keyring
                .verify_root(&id, ObjectHash::new(b"other root"), &signature)
                .is_err()
        );
        signature[0] ^= 0x01;
        assert!(keyring.verify_root(&id, root, &signature).is_err());
        assert!(keyring.verify_root("unknown", root, &signature).is_err());
    }

    /// Without a private key, signing yields None.
    #[test]
    fn test_no_signing_key() {
        let dir = tempfile::tempdir().unwrap();
        let keyring = Keyring::new(dir.path());
        assert!(keyring.signing_key().unwrap().is_none());
        assert!(
            keyring
                .sign_root(ObjectHash::new(b"root"))
                .unwrap()
                .is_none()
        );
    }
}
