//! Content-addressed object store.
//!
//! Loose objects live at `objects/<h[0..2]>/<h[2..]>` as zlib streams of the
//! framed canonical form `<kind> <len>\0<payload>`; the kind is recovered
//! from the frame, never from the path. Writes go to a temp file in the
//! same directory and are renamed into place, so readers only ever observe
//! fully written objects, and a second `put` of identical content is a
//! no-op (deduplication).
//!
//! Reads fall back to the pack directory: every `objects/pack/*.idx` is
//! loaded at open and consulted by binary search after the loose lookup
//! misses.
//!
//! When at-rest encryption is configured, loose blob files are sealed with
//! AES-256-GCM *after* hashing, so the content address stays the plaintext
//! hash and dedup is unaffected. Commits and trees stay plain; packs follow
//! the fixed pack format.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use bstr::ByteSlice;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::debug;

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::crypto::encrypt::BlobCipher;
use crate::internal::object::ObjectTrait;
use crate::internal::object::blob::Blob;
use crate::internal::object::commit::Commit;
use crate::internal::object::tree::Tree;
use crate::internal::object::types::ObjectType;
use crate::internal::pack::PackHandle;

/// Encode the framed canonical form: `<kind> <len>\0<payload>`.
pub fn encode_framed(kind: ObjectType, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 16);
    data.extend_from_slice(kind.to_bytes());
    data.push(b' ');
    data.extend_from_slice(payload.len().to_string().as_bytes());
    data.push(b'\x00');
    data.extend_from_slice(payload);
    data
}

/// Split a framed canonical form back into kind and payload.
pub fn decode_framed(data: &[u8]) -> Result<(ObjectType, Vec<u8>), MemError> {
    let space = data
        .find_byte(b' ')
        .ok_or_else(|| MemError::InvalidObjectInfo("frame missing type tag".to_string()))?;
    let kind = ObjectType::from_string(&String::from_utf8_lossy(&data[..space]))?;
    let nul = data
        .find_byte(b'\x00')
        .ok_or_else(|| MemError::InvalidObjectInfo("frame missing length header".to_string()))?;
    let declared: usize = String::from_utf8_lossy(&data[space + 1..nul])
        .parse()
        .map_err(|_| MemError::InvalidObjectInfo("bad frame length".to_string()))?;
    let payload = &data[nul + 1..];
    if payload.len() != declared {
        return Err(MemError::InvalidObjectInfo(format!(
            "frame length {} != declared {declared}",
            payload.len()
        )));
    }
    Ok((kind, payload.to_vec()))
}

/// Content-addressed persistence of blobs, trees, and commits.
pub struct ObjectStore {
    root: PathBuf,
    compression: Compression,
    cipher: Option<BlobCipher>,
    packs: RwLock<Vec<PackHandle>>,
}

impl ObjectStore {
    /// Open the store rooted at `.mem/objects`, loading every pack index.
    pub fn open(root: &Path, compression_enabled: bool) -> Result<ObjectStore, MemError> {
        fs::create_dir_all(root)?;
        let store = ObjectStore {
            root: root.to_path_buf(),
            compression: if compression_enabled {
                Compression::default()
            } else {
                Compression::none()
            },
            cipher: None,
            packs: RwLock::new(Vec::new()),
        };
        store.reload_packs()?;
        Ok(store)
    }

    /// Install the at-rest cipher (repositories opened with a passphrase).
    pub fn set_cipher(&mut self, cipher: Option<BlobCipher>) {
        self.cipher = cipher;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.root.join("pack")
    }

    fn loose_path(&self, hash: &ObjectHash) -> PathBuf {
        let hex = hash.to_string();
        self.root.join(&hex[..2]).join(&hex[2..])
    }

    /// Re-scan `objects/pack/` for `.pack`/`.idx` pairs.
    pub fn reload_packs(&self) -> Result<(), MemError> {
        let mut handles = Vec::new();
        let dir = self.pack_dir();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) == Some("pack") {
                    let idx = path.with_extension("idx");
                    if idx.exists() {
                        handles.push(PackHandle::open(&path, &idx)?);
                    }
                }
            }
        }
        *self.packs.write().unwrap() = handles;
        Ok(())
    }

    /// Store an object; idempotent. Returns the content address.
    pub fn put(&self, kind: ObjectType, payload: &[u8]) -> Result<ObjectHash, MemError> {
        let hash = ObjectHash::from_type_and_data(kind, payload);
        let path = self.loose_path(&hash);
        if path.exists() || self.packed_offset(&hash).is_some() {
            return Ok(hash);
        }

        let framed = encode_framed(kind, payload);
        let mut encoder = ZlibEncoder::new(Vec::new(), self.compression);
        encoder.write_all(&framed)?;
        let mut file_bytes = encoder.finish()?;
        if kind == ObjectType::Blob
            && let Some(cipher) = &self.cipher
        {
            file_bytes = cipher.encrypt(&file_bytes)?;
        }

        crate::utils::atomic_write(&path, &file_bytes)?;
        debug!(object = %hash, kind = %kind, "object stored");
        Ok(hash)
    }

    /// Store a typed object.
    pub fn put_object(&self, object: &impl ObjectTrait) -> Result<ObjectHash, MemError> {
        self.put(object.get_type(), &object.to_data()?)
    }

    fn packed_offset(&self, hash: &ObjectHash) -> Option<usize> {
        self.packs
            .read()
            .unwrap()
            .iter()
            .position(|pack| pack.contains(hash))
    }

    /// Resolve loose storage first, then scan pack indices.
    pub fn get(&self, hash: &ObjectHash) -> Result<(ObjectType, Vec<u8>), MemError> {
        let path = self.loose_path(hash);
        if path.exists() {
            let framed = self.read_loose_framed(hash)?;
            return decode_framed(&framed);
        }
        for pack in self.packs.read().unwrap().iter() {
            if let Some(found) = pack.read(hash)? {
                return Ok(found);
            }
        }
        Err(MemError::NotFound(format!("object {hash}")))
    }

    /// Framed canonical bytes, as shipped over a transport.
    pub fn get_framed(&self, hash: &ObjectHash) -> Result<Vec<u8>, MemError> {
        let (kind, payload) = self.get(hash)?;
        Ok(encode_framed(kind, &payload))
    }

    fn read_loose_framed(&self, hash: &ObjectHash) -> Result<Vec<u8>, MemError> {
        let mut file_bytes = fs::read(self.loose_path(hash))?;
        if BlobCipher::is_encrypted(&file_bytes) {
            let cipher = self.cipher.as_ref().ok_or_else(|| {
                MemError::DecryptionFailed(format!(
                    "object {hash} is encrypted and no passphrase is configured"
                ))
            })?;
            file_bytes = cipher.decrypt(&file_bytes)?;
        }
        let mut framed = Vec::new();
        ZlibDecoder::new(file_bytes.as_slice()).read_to_end(&mut framed)?;
        Ok(framed)
    }

    pub fn exists(&self, hash: &ObjectHash) -> bool {
        self.loose_path(hash).exists() || self.packed_offset(hash).is_some()
    }

    pub fn get_blob(&self, hash: &ObjectHash) -> Result<Blob, MemError> {
        let (kind, payload) = self.get(hash)?;
        if kind != ObjectType::Blob {
            return Err(MemError::InvalidObjectType(format!(
                "{hash} is a {kind}, expected blob"
            )));
        }
        Blob::from_bytes(&payload, *hash)
    }

    pub fn get_tree(&self, hash: &ObjectHash) -> Result<Tree, MemError> {
        let (kind, payload) = self.get(hash)?;
        if kind != ObjectType::Tree {
            return Err(MemError::InvalidObjectType(format!(
                "{hash} is a {kind}, expected tree"
            )));
        }
        Tree::from_bytes(&payload, *hash)
    }

    pub fn get_commit(&self, hash: &ObjectHash) -> Result<Commit, MemError> {
        let (kind, payload) = self.get(hash)?;
        if kind != ObjectType::Commit {
            return Err(MemError::InvalidObjectType(format!(
                "{hash} is a {kind}, expected commit"
            )));
        }
        Commit::from_bytes(&payload, *hash)
    }

    /// Every loose object hash, for GC scans.
    pub fn iter_loose(&self) -> Result<Vec<ObjectHash>, MemError> {
        let mut hashes = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let dir_name = dir_entry.file_name().to_string_lossy().into_owned();
            if dir_name.len() != 2 || !dir_entry.path().is_dir() {
                continue;
            }
            for file_entry in fs::read_dir(dir_entry.path())? {
                let file_name = file_entry?.file_name().to_string_lossy().into_owned();
                if let Ok(hash) = format!("{dir_name}{file_name}").parse() {
                    hashes.push(hash);
                }
            }
        }
        Ok(hashes)
    }

    /// Every packed object hash across all loaded packs.
    pub fn packed_hashes(&self) -> Vec<ObjectHash> {
        self.packs
            .read()
            .unwrap()
            .iter()
            .flat_map(|pack| pack.index.hashes().copied().collect::<Vec<_>>())
            .collect()
    }

    /// Remove one loose object (GC sweep). Packed copies are untouched.
    pub fn delete_loose(&self, hash: &ObjectHash) -> Result<(), MemError> {
        let path = self.loose_path(hash);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Rehash a loose object's stored bytes against its name.
    pub fn verify_loose(&self, hash: &ObjectHash) -> Result<(), MemError> {
        let framed = self.read_loose_framed(hash)?;
        if ObjectHash::new(&framed) != *hash {
            return Err(MemError::HashMismatch(hash.to_string()));
        }
        Ok(())
    }

    /// All objects (loose and packed) whose hex form starts with `prefix`.
    pub fn find_prefix(&self, prefix: &str) -> Result<Vec<ObjectHash>, MemError> {
        let mut matches: Vec<ObjectHash> = self
            .iter_loose()?
            .into_iter()
            .filter(|hash| hash.matches_prefix(prefix))
            .collect();
        for pack in self.packs.read().unwrap().iter() {
            matches.extend(pack.index.find_prefix(prefix));
        }
        matches.sort();
        matches.dedup();
        Ok(matches)
    }
}
