//! Pluggable remote transport.
//!
//! A transport exposes four operations — `list_refs`, `read_object`,
//! `write_object`, `cas_update_ref` — over a remote repository; any carrier
//! providing them with the stated atomicity is acceptable (filesystem,
//! HTTP, object store). Objects travel as framed canonical bytes
//! (`<kind> <len>\0<payload>`), so the receiver can verify the content
//! address before accepting anything.
//!
//! The reference implementation is the local filesystem transport.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::refs::RefStore;
use crate::internal::store::{ObjectStore, decode_framed};

/// Remote protocol surface. `expected = None` in `cas_update_ref` means
/// "the ref must not exist yet".
pub trait Transport {
    /// Enumerate remote branch heads.
    fn list_refs(&self) -> Result<Vec<(String, ObjectHash)>, MemError>;

    /// Canonical framed bytes of one object.
    fn read_object(&self, hash: &ObjectHash) -> Result<Vec<u8>, MemError>;

    /// Write an object if absent; idempotent.
    fn write_object(&self, hash: &ObjectHash, framed: &[u8]) -> Result<(), MemError>;

    /// Atomic compare-and-set of a branch ref. Fails with `NonFastForward`
    /// when the current remote value differs from `expected`.
    fn cas_update_ref(
        &self,
        name: &str,
        expected: Option<ObjectHash>,
        new: ObjectHash,
    ) -> Result<(), MemError>;

    /// Public signing keys the remote publishes, as `(fingerprint, raw
    /// 32-byte key)`. Transports without key distribution return nothing.
    fn published_keys(&self) -> Result<Vec<(String, Vec<u8>)>, MemError> {
        Ok(Vec::new())
    }
}

/// Reference transport: another repository on the local filesystem.
pub struct FileTransport {
    mem_dir: PathBuf,
    store: ObjectStore,
    refs: RefStore,
}

impl FileTransport {
    /// Open a transport over the repository rooted at `root`.
    pub fn open(root: &Path) -> Result<FileTransport, MemError> {
        let mem_dir = root.join(".mem");
        if !mem_dir.exists() {
            return Err(MemError::TransportError(format!(
                "no repository at {}",
                root.display()
            )));
        }
        let store = ObjectStore::open(&mem_dir.join("objects"), true)?;
        Ok(FileTransport {
            refs: RefStore::new(&mem_dir),
            store,
            mem_dir,
        })
    }

    /// Exclusive lock over the remote repository for the CAS window.
    fn lock_remote(&self) -> Result<fs::File, MemError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.mem_dir.join("lock"))?;
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(file),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return Err(MemError::LockBusy),
            }
        }
    }
}

impl Transport for FileTransport {
    fn list_refs(&self) -> Result<Vec<(String, ObjectHash)>, MemError> {
        self.refs.list_branches()
    }

    fn read_object(&self, hash: &ObjectHash) -> Result<Vec<u8>, MemError> {
        self.store.get_framed(hash)
    }

    fn write_object(&self, hash: &ObjectHash, framed: &[u8]) -> Result<(), MemError> {
        if ObjectHash::new(framed) != *hash {
            return Err(MemError::HashMismatch(hash.to_string()));
        }
        let (kind, payload) = decode_framed(framed)?;
        self.store.put(kind, &payload)?;
        Ok(())
    }

    fn cas_update_ref(
        &self,
        name: &str,
        expected: Option<ObjectHash>,
        new: ObjectHash,
    ) -> Result<(), MemError> {
        let lock = self.lock_remote()?;
        let current = self.refs.read_branch(name)?;
        if current != expected {
            drop(lock);
            return Err(MemError::NonFastForward(name.to_string()));
        }
        self.refs.write_branch(name, new)?;
        drop(lock);
        Ok(())
    }

    fn published_keys(&self) -> Result<Vec<(String, Vec<u8>)>, MemError> {
        let keys_dir = self.mem_dir.join("keys");
        let mut keys = Vec::new();
        if keys_dir.exists() {
            for entry in fs::read_dir(&keys_dir)? {
                let path = entry?.path();
                let name = path.file_name().unwrap_or_default().to_string_lossy().into_owned();
                if let Some(fingerprint) = name.strip_suffix(".pub") {
                    let text = fs::read_to_string(&path)?;
                    let bytes = hex::decode(text.trim()).map_err(|e| {
                        MemError::TransportError(format!("bad published key {name}: {e}"))
                    })?;
                    keys.push((fingerprint.to_string(), bytes));
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::types::ObjectType;
    use crate::internal::store::encode_framed;

    fn remote() -> (tempfile::TempDir, FileTransport) {
        let dir = tempfile::tempdir().unwrap();
        let mem = dir.path().join(".mem");
        fs::create_dir_all(mem.join("objects")).unwrap();
        fs::create_dir_all(mem.join("refs").join("heads")).unwrap();
        let transport = FileTransport::open(dir.path()).unwrap();
        (dir, transport)
    }

    /// Objects round-trip through the transport with hash verification.
    #[test]
    fn test_object_roundtrip() {
        let (_dir, transport) = remote();
        let framed = encode_framed(ObjectType::Blob, b"payload");
        let hash = ObjectHash::new(&framed);

        transport.write_object(&hash, &framed).unwrap();
        assert_eq!(transport.read_object(&hash).unwrap(), framed);

        // Mismatched bytes are refused.
        assert!(matches!(
            transport.write_object(&ObjectHash::new(b"other"), &framed),
            Err(MemError::HashMismatch(_))
        ));
    }

    /// CAS succeeds only from the expected tip; stale movers are rejected.
    #[test]
    fn test_cas_update_ref() {
        let (_dir, transport) = remote();
        let c1 = ObjectHash::new(b"c1");
        let c2 = ObjectHash::new(b"c2");

        transport.cas_update_ref("main", None, c1).unwrap();
        assert_eq!(transport.list_refs().unwrap(), vec![("main".to_string(), c1)]);

        // Stale expectation fails and leaves the ref untouched.
        assert!(matches!(
            transport.cas_update_ref("main", None, c2),
            Err(MemError::NonFastForward(_))
        ));
        assert!(matches!(
            transport.cas_update_ref("main", Some(c2), c1),
            Err(MemError::NonFastForward(_))
        ));
        assert_eq!(transport.list_refs().unwrap(), vec![("main".to_string(), c1)]);

        transport.cas_update_ref("main", Some(c1), c2).unwrap();
        assert_eq!(transport.list_refs().unwrap(), vec![("main".to_string(), c2)]);
    }

    /// Missing repositories are a transport error.
    #[test]
    fn test_missing_remote() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileTransport::open(&dir.path().join("nope")),
            Err(MemError::TransportError(_))
        ));
    }
}
