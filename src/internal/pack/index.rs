//! Pack index (`.idx`) reader/writer.
//!
//! Layout, all integers big-endian:
//!
//! ```text
//! magic "PIDX" | version u32 | entry_count u32
//!   sorted_by_hash[ { hash 32B, offset u64 } ]
//! trailer: SHA-256 of all preceding bytes
//! ```
//!
//! Lookup is a binary search over the sorted hashes; over *n* entries it
//! performs at most ⌈log₂ n⌉ + 1 hash comparisons. The search reports its
//! probe count so integrity tests can assert that bound.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::errors::MemError;
use crate::hash::{HASH_SIZE, ObjectHash};
use crate::utils::atomic_write;

pub const IDX_MAGIC: &[u8; 4] = b"PIDX";
pub const IDX_VERSION: u32 = 1;

/// Result of one index probe: the offset when found, and how many hash
/// comparisons the binary search performed.
#[derive(Debug, Clone, Copy)]
pub struct IndexLookup {
    pub offset: Option<u64>,
    pub comparisons: usize,
}

/// In-memory pack index: hash → pack-file offset, sorted by hash.
#[derive(Debug, Clone)]
pub struct PackIndex {
    entries: Vec<(ObjectHash, u64)>,
}

impl PackIndex {
    /// Build from unsorted entries.
    pub fn new(mut entries: Vec<(ObjectHash, u64)>) -> PackIndex {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        PackIndex { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All indexed hashes, in hash order.
    pub fn hashes(&self) -> impl Iterator<Item = &ObjectHash> {
        self.entries.iter().map(|(hash, _)| hash)
    }

    /// Counted binary search.
    pub fn search(&self, hash: &ObjectHash) -> IndexLookup {
        let mut lo = 0usize;
        let mut hi = self.entries.len();
        let mut comparisons = 0usize;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            comparisons += 1;
            match self.entries[mid].0.cmp(hash) {
                Ordering::Equal => {
                    return IndexLookup {
                        offset: Some(self.entries[mid].1),
                        comparisons,
                    };
                }
                Ordering::Less => lo = mid + 1,
                Ordering::Greater => hi = mid,
            }
        }
        IndexLookup {
            offset: None,
            comparisons,
        }
    }

    /// Offset of `hash`, if present.
    pub fn find(&self, hash: &ObjectHash) -> Option<u64> {
        self.search(hash).offset
    }

    /// All hashes whose lowercase hex form starts with `prefix`.
    pub fn find_prefix(&self, prefix: &str) -> Vec<ObjectHash> {
        self.entries
            .iter()
            .filter(|(hash, _)| hash.matches_prefix(prefix))
            .map(|(hash, _)| *hash)
            .collect()
    }

    /// Canonical file bytes, trailer included.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.entries.len() * (HASH_SIZE + 8) + HASH_SIZE);
        out.extend_from_slice(IDX_MAGIC);
        out.write_u32::<BigEndian>(IDX_VERSION).unwrap();
        out.write_u32::<BigEndian>(self.entries.len() as u32).unwrap();
        for (hash, offset) in &self.entries {
            out.extend_from_slice(hash.as_ref());
            out.write_u64::<BigEndian>(*offset).unwrap();
        }
        let trailer = ObjectHash::new(&out);
        out.extend_from_slice(trailer.as_ref());
        out
    }

    /// Write the index file via atomic replace.
    pub fn write_to(&self, path: &Path) -> Result<(), MemError> {
        atomic_write(path, &self.encode())?;
        Ok(())
    }

    /// Load and verify an index file (magic, version, count, trailer).
    pub fn load(path: &Path) -> Result<PackIndex, MemError> {
        let bytes = fs::read(path)?;
        let name = path.display().to_string();
        if bytes.len() < 12 + HASH_SIZE {
            return Err(MemError::PackCorrupt(format!("{name}: idx too short")));
        }
        let (body, trailer) = bytes.split_at(bytes.len() - HASH_SIZE);
        if ObjectHash::new(body).as_ref() != trailer {
            return Err(MemError::PackCorrupt(format!("{name}: idx trailer mismatch")));
        }
        if &body[0..4] != IDX_MAGIC {
            return Err(MemError::PackCorrupt(format!("{name}: bad idx magic")));
        }
        let version = BigEndian::read_u32(&body[4..8]);
        if version != IDX_VERSION {
            return Err(MemError::PackCorrupt(format!(
                "{name}: unsupported idx version {version}"
            )));
        }
        let count = BigEndian::read_u32(&body[8..12]) as usize;
        let expected_len = 12 + count * (HASH_SIZE + 8);
        if body.len() != expected_len {
            return Err(MemError::PackCorrupt(format!(
                "{name}: idx length {} != expected {expected_len}",
                body.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        let mut cursor = 12;
        for _ in 0..count {
            let hash = ObjectHash::from_bytes(&body[cursor..cursor + HASH_SIZE])?;
            let offset = BigEndian::read_u64(&body[cursor + HASH_SIZE..cursor + HASH_SIZE + 8]);
            if let Some((prev, _)) = entries.last()
                && *prev >= hash
            {
                return Err(MemError::PackCorrupt(format!(
                    "{name}: idx entries not strictly sorted"
                )));
            }
            entries.push((hash, offset));
            cursor += HASH_SIZE + 8;
        }
        Ok(PackIndex { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index(n: usize) -> PackIndex {
        let entries = (0..n)
            .map(|i| (ObjectHash::new(format!("obj-{i}").as_bytes()), i as u64 * 7))
            .collect();
        PackIndex::new(entries)
    }

    /// Every entry is found at its recorded offset; absent hashes miss.
    #[test]
    fn test_search_hits_and_misses() {
        let index = sample_index(100);
        for i in 0..100 {
            let hash = ObjectHash::new(format!("obj-{i}").as_bytes());
            assert_eq!(index.find(&hash), Some(i as u64 * 7));
        }
        assert_eq!(index.find(&ObjectHash::new(b"absent")), None);
    }

    /// Probe count stays within ⌈log₂ n⌉ + 1 for hits and misses.
    #[test]
    fn test_probe_bound() {
        for n in [1usize, 2, 3, 7, 100, 1000] {
            let index = sample_index(n);
            let bound = (n as f64).log2().ceil() as usize + 1;
            for i in 0..n {
                let hash = ObjectHash::new(format!("obj-{i}").as_bytes());
                let lookup = index.search(&hash);
                assert!(lookup.offset.is_some());
                assert!(
                    lookup.comparisons <= bound,
                    "{} probes for n={n} (bound {bound})",
                    lookup.comparisons
                );
            }
            let miss = index.search(&ObjectHash::new(b"absent"));
            assert!(miss.comparisons <= bound);
        }
    }

    /// Encode/load round-trips and the trailer detects corruption.
    #[test]
    fn test_file_roundtrip_and_tamper() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pack-test.idx");
        let index = sample_index(17);
        index.write_to(&path).unwrap();

        let loaded = PackIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 17);
        for hash in index.hashes() {
            assert_eq!(loaded.find(hash), index.find(hash));
        }

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            PackIndex::load(&path),
            Err(MemError::PackCorrupt(_))
        ));
    }

    /// Prefix scan returns every match.
    #[test]
    fn test_find_prefix() {
        let index = sample_index(50);
        let hash = ObjectHash::new(b"obj-7");
        let matches = index.find_prefix(&hash.abbrev(8));
        assert!(matches.contains(&hash));
    }
}
