//! Pack file encoder/decoder.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic "PACK" | version u32 | object_count u32
//!   { for each object:
//!       kind u8 | flags u8
//!       if DELTA: base_hash 32B | delta_length u32 | delta_bytes
//!       else:     payload_length u32 | zlib(payload)
//!   }
//! trailer: SHA-256 of all preceding bytes
//! ```
//!
//! A delta entry is only emitted when the encoded delta is smaller than
//! 0.8 × the target payload; chains terminate at a FULL object inside the
//! same pack and never exceed the configured depth (hard cap 16). The writer
//! falls back to FULL for any candidate that would form a cycle or exceed
//! the depth limit.

pub mod delta;
pub mod entry;
pub mod index;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use tracing::debug;

use crate::config::MAX_DELTA_CHAIN;
use crate::errors::MemError;
use crate::hash::{HASH_SIZE, ObjectHash};
use crate::internal::pack::delta::{apply_delta, compute_delta};
use crate::internal::pack::entry::Entry;
use crate::internal::pack::index::PackIndex;
use crate::internal::object::types::ObjectType;
use crate::utils::HashingWriter;

pub const PACK_MAGIC: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 1;

const FLAG_DELTA: u8 = 0x01;

/// A delta is only worth writing below this fraction of the target size.
const DELTA_RATIO: f64 = 0.8;

/// Result of writing one pack: final file paths and the trailer hash the
/// pack is named after.
#[derive(Debug, Clone)]
pub struct PackedInfo {
    pub pack_path: PathBuf,
    pub idx_path: PathBuf,
    pub pack_hash: ObjectHash,
    pub object_count: usize,
    pub delta_count: usize,
}

/// Pack writer: plans delta assignments, streams entries, and emits the
/// side index.
pub struct PackWriter {
    max_chain: usize,
    compression: Compression,
}

impl PackWriter {
    pub fn new(max_chain: usize) -> Result<PackWriter, MemError> {
        if max_chain == 0 || max_chain > MAX_DELTA_CHAIN {
            return Err(MemError::InvalidArgument(format!(
                "delta chain depth must be in 1..={MAX_DELTA_CHAIN}"
            )));
        }
        Ok(PackWriter {
            max_chain,
            compression: Compression::default(),
        })
    }

    /// Write `entries` into a new pack under `dir`, named
    /// `pack-<trailer-hash>.pack` / `.idx`. `bases` maps a target hash to
    /// its delta base candidate; anything not in the map (or failing the
    /// chain/ratio checks) is written FULL.
    pub fn write(
        &self,
        dir: &Path,
        entries: &[Entry],
        bases: &HashMap<ObjectHash, ObjectHash>,
    ) -> Result<PackedInfo, MemError> {
        if entries.is_empty() {
            return Err(MemError::InvalidArgument(
                "refusing to write an empty pack".to_string(),
            ));
        }
        fs::create_dir_all(dir)?;

        let by_hash: HashMap<ObjectHash, &Entry> =
            entries.iter().map(|e| (e.hash, e)).collect();
        let depths = self.plan_depths(&by_hash, bases);

        let mut body: Vec<u8> = Vec::new();
        body.extend_from_slice(PACK_MAGIC);
        body.write_u32::<BigEndian>(PACK_VERSION).unwrap();
        body.write_u32::<BigEndian>(by_hash.len() as u32).unwrap();

        let mut offsets: Vec<(ObjectHash, u64)> = Vec::with_capacity(by_hash.len());
        let mut delta_count = 0usize;
        let mut seen: HashSet<ObjectHash> = HashSet::with_capacity(by_hash.len());

        for entry in entries {
            if !seen.insert(entry.hash) {
                continue;
            }
            offsets.push((entry.hash, body.len() as u64));
            body.push(entry.obj_type.to_u8());

            let as_delta = depths
                .get(&entry.hash)
                .filter(|depth| **depth > 0)
                .and_then(|_| bases.get(&entry.hash))
                .and_then(|base_hash| by_hash.get(base_hash).map(|base| (*base_hash, *base)))
                .and_then(|(base_hash, base)| {
                    let patch = compute_delta(&base.data, &entry.data);
                    if (patch.len() as f64) < DELTA_RATIO * entry.data.len() as f64 {
                        Some((base_hash, patch))
                    } else {
                        None
                    }
                });

            match as_delta {
                Some((base_hash, patch)) => {
                    body.push(FLAG_DELTA);
                    body.extend_from_slice(base_hash.as_ref());
                    body.write_u32::<BigEndian>(patch.len() as u32).unwrap();
                    body.extend_from_slice(&patch);
                    delta_count += 1;
                }
                None => {
                    body.push(0);
                    body.write_u32::<BigEndian>(entry.data.len() as u32).unwrap();
                    let mut encoder = ZlibEncoder::new(Vec::new(), self.compression);
                    encoder.write_all(&entry.data)?;
                    body.extend_from_slice(&encoder.finish()?);
                }
            }
        }

        let mut hasher = HashingWriter::new();
        hasher.update(&body);
        let pack_hash = hasher.finalize();
        body.extend_from_slice(pack_hash.as_ref());

        let pack_path = dir.join(format!("pack-{pack_hash}.pack"));
        let idx_path = dir.join(format!("pack-{pack_hash}.idx"));
        crate::utils::atomic_write(&pack_path, &body)?;
        PackIndex::new(offsets).write_to(&idx_path)?;

        debug!(
            objects = by_hash.len(),
            deltas = delta_count,
            pack = %pack_hash,
            "pack written"
        );
        Ok(PackedInfo {
            pack_path,
            idx_path,
            pack_hash,
            object_count: by_hash.len(),
            delta_count,
        })
    }

    /// Chain depth per object under the candidate base map. A candidate
    /// whose base is missing from the pack, whose chain would exceed
    /// `max_chain`, or which participates in a cycle collapses to FULL
    /// (depth 0).
    fn plan_depths(
        &self,
        by_hash: &HashMap<ObjectHash, &Entry>,
        bases: &HashMap<ObjectHash, ObjectHash>,
    ) -> HashMap<ObjectHash, usize> {
        let mut depths: HashMap<ObjectHash, usize> = HashMap::with_capacity(by_hash.len());
        for hash in by_hash.keys() {
            let mut chain = Vec::new();
            let mut cursor = *hash;
            let depth = loop {
                if let Some(known) = depths.get(&cursor) {
                    break known + chain.len();
                }
                match bases.get(&cursor) {
                    Some(base) if by_hash.contains_key(base) => {
                        if chain.contains(base) || *base == *hash {
                            debug!(target = %hash, "delta cycle rejected");
                            break 0;
                        }
                        chain.push(cursor);
                        cursor = *base;
                    }
                    _ => break chain.len(),
                }
            };
            let effective = if depth > self.max_chain {
                debug!(target = %hash, depth, "delta chain too deep, writing FULL");
                0
            } else {
                depth
            };
            depths.insert(*hash, effective);
        }
        depths
    }
}

/// Read handle over one pack + index pair. Trailers of both files are
/// verified on open; reads resolve delta chains within the pack.
pub struct PackHandle {
    pack_path: PathBuf,
    pub index: PackIndex,
}

impl PackHandle {
    pub fn open(pack_path: &Path, idx_path: &Path) -> Result<PackHandle, MemError> {
        let name = pack_path.display().to_string();
        let bytes = fs::read(pack_path)?;
        if bytes.len() < 12 + HASH_SIZE {
            return Err(MemError::PackCorrupt(format!("{name}: pack too short")));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - HASH_SIZE);
        if ObjectHash::new(body).as_ref() != trailer {
            return Err(MemError::PackCorrupt(format!("{name}: pack trailer mismatch")));
        }
        if &body[0..4] != PACK_MAGIC {
            return Err(MemError::PackCorrupt(format!("{name}: bad pack magic")));
        }
        let version = BigEndian::read_u32(&body[4..8]);
        if version != PACK_VERSION {
            return Err(MemError::PackCorrupt(format!(
                "{name}: unsupported pack version {version}"
            )));
        }
        let index = PackIndex::load(idx_path)?;
        let declared = BigEndian::read_u32(&body[8..12]) as usize;
        if declared != index.len() {
            return Err(MemError::PackCorrupt(format!(
                "{name}: object count {declared} != index entries {}",
                index.len()
            )));
        }
        Ok(PackHandle {
            pack_path: pack_path.to_path_buf(),
            index,
        })
    }

    pub fn contains(&self, hash: &ObjectHash) -> bool {
        self.index.find(hash).is_some()
    }

    /// Read one object, resolving any delta chain. `Ok(None)` when the hash
    /// is not in this pack.
    pub fn read(&self, hash: &ObjectHash) -> Result<Option<(ObjectType, Vec<u8>)>, MemError> {
        match self.index.find(hash) {
            Some(offset) => self.read_at(offset, 0).map(Some),
            None => Ok(None),
        }
    }

    fn read_at(&self, offset: u64, depth: usize) -> Result<(ObjectType, Vec<u8>), MemError> {
        if depth > MAX_DELTA_CHAIN {
            return Err(MemError::DeltaObjectError(format!(
                "delta chain exceeds {MAX_DELTA_CHAIN} in {}",
                self.pack_path.display()
            )));
        }
        let mut file = File::open(&self.pack_path)?;
        file.seek(SeekFrom::Start(offset))?;

        let kind = ObjectType::from_u8(file.read_u8()?)?;
        let flags = file.read_u8()?;
        if flags & FLAG_DELTA != 0 {
            let base_hash = ObjectHash::from_stream(&mut file)?;
            let delta_len = file.read_u32::<BigEndian>()? as usize;
            let mut patch = vec![0u8; delta_len];
            file.read_exact(&mut patch)?;
            drop(file);

            let base_offset = self.index.find(&base_hash).ok_or_else(|| {
                MemError::PackCorrupt(format!(
                    "{}: delta base {base_hash} not in pack",
                    self.pack_path.display()
                ))
            })?;
            let (_, base) = self.read_at(base_offset, depth + 1)?;
            Ok((kind, apply_delta(&base, &patch)?))
        } else {
            let payload_len = file.read_u32::<BigEndian>()? as usize;
            let mut payload = Vec::with_capacity(payload_len);
            ZlibDecoder::new(&mut file).read_to_end(&mut payload)?;
            if payload.len() != payload_len {
                return Err(MemError::PackCorrupt(format!(
                    "{}: payload length {} != declared {payload_len}",
                    self.pack_path.display(),
                    payload.len()
                )));
            }
            Ok((kind, payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::blob::Blob;

    fn blob_entry(payload: &[u8]) -> Entry {
        Entry::from(Blob::new(payload))
    }

    /// Pack round-trip: every object reads back bitwise equal, FULL or DELTA.
    #[test]
    fn test_pack_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let base = blob_entry(b"2026-01-01T10:00:00Z met the deploy checklist owner\n".repeat(8).as_slice());
        let near = blob_entry(
            [
                b"2026-01-01T10:00:00Z met the deploy checklist owner\n".repeat(8),
                b"2026-01-01T11:00:00Z standup notes\n".to_vec(),
            ]
            .concat()
            .as_slice(),
        );
        let far = blob_entry(b"unrelated content");
        let entries = vec![base.clone(), near.clone(), far.clone()];

        let mut bases = HashMap::new();
        bases.insert(near.hash, base.hash);

        let writer = PackWriter::new(MAX_DELTA_CHAIN).unwrap();
        let info = writer.write(dir.path(), &entries, &bases).unwrap();
        assert_eq!(info.object_count, 3);
        assert_eq!(info.delta_count, 1);

        let handle = PackHandle::open(&info.pack_path, &info.idx_path).unwrap();
        for entry in &entries {
            let (kind, data) = handle.read(&entry.hash).unwrap().unwrap();
            assert_eq!(kind, entry.obj_type);
            assert_eq!(data, entry.data);
        }
        assert!(handle.read(&ObjectHash::new(b"absent")).unwrap().is_none());
    }

    /// A candidate cycle collapses to FULL entries that still read back.
    #[test]
    fn test_cycle_collapses_to_full() {
        let dir = tempfile::tempdir().unwrap();
        let a = blob_entry(b"aaaaaaaaaaaaaaaaaaaaaaaa 1");
        let b = blob_entry(b"aaaaaaaaaaaaaaaaaaaaaaaa 2");
        let mut bases = HashMap::new();
        bases.insert(a.hash, b.hash);
        bases.insert(b.hash, a.hash);

        let writer = PackWriter::new(4).unwrap();
        let info = writer
            .write(dir.path(), &[a.clone(), b.clone()], &bases)
            .unwrap();
        assert_eq!(info.delta_count, 0);

        let handle = PackHandle::open(&info.pack_path, &info.idx_path).unwrap();
        assert_eq!(handle.read(&a.hash).unwrap().unwrap().1, a.data);
        assert_eq!(handle.read(&b.hash).unwrap().unwrap().1, b.data);
    }

    /// An unprofitable delta (tiny target) is written FULL.
    #[test]
    fn test_ratio_gate() {
        let dir = tempfile::tempdir().unwrap();
        let base = blob_entry(b"abc");
        let target = blob_entry(b"xyz");
        let mut bases = HashMap::new();
        bases.insert(target.hash, base.hash);

        let writer = PackWriter::new(MAX_DELTA_CHAIN).unwrap();
        let info = writer
            .write(dir.path(), &[base, target.clone()], &bases)
            .unwrap();
        assert_eq!(info.delta_count, 0);

        let handle = PackHandle::open(&info.pack_path, &info.idx_path).unwrap();
        assert_eq!(handle.read(&target.hash).unwrap().unwrap().1, target.data);
    }

    /// A flipped byte in the pack body fails the trailer check on open.
    #[test]
    fn test_tampered_pack_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PackWriter::new(MAX_DELTA_CHAIN).unwrap();
        let info = writer
            .write(dir.path(), &[blob_entry(b"payload")], &HashMap::new())
            .unwrap();

        let mut bytes = fs::read(&info.pack_path).unwrap();
        bytes[14] ^= 0xff;
        fs::write(&info.pack_path, &bytes).unwrap();
        assert!(matches!(
            PackHandle::open(&info.pack_path, &info.idx_path),
            Err(MemError::PackCorrupt(_))
        ));
    }

    /// Chain depth beyond the configured limit falls back to FULL.
    #[test]
    fn test_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        // a <- b <- c, limit 1: c's chain would be depth 2.
        let a = blob_entry(b"base payload base payload base payload 0");
        let b = blob_entry(b"base payload base payload base payload 01");
        let c = blob_entry(b"base payload base payload base payload 012");
        let mut bases = HashMap::new();
        bases.insert(b.hash, a.hash);
        bases.insert(c.hash, b.hash);

        let writer = PackWriter::new(1).unwrap();
        let info = writer
            .write(dir.path(), &[a.clone(), b.clone(), c.clone()], &bases)
            .unwrap();
        assert_eq!(info.delta_count, 1);

        let handle = PackHandle::open(&info.pack_path, &info.idx_path).unwrap();
        for entry in [&a, &b, &c] {
            assert_eq!(handle.read(&entry.hash).unwrap().unwrap().1, entry.data);
        }
    }
}
