//! Staging index: the set of changes queued for the next commit.
//!
//! A mapping `path → entry` with repo-relative, `/`-separated, unique
//! paths. An entry is either a file snapshot `{blob_hash, size, mtime,
//! mode}` or a deletion tombstone; the commit builder overlays snapshots
//! onto the parent tree and drops tombstoned paths. Persisted at
//! `.mem/index` in canonical binary form (bincode); the map is a
//! `BTreeMap`, so the byte form is independent of insertion order. Empty
//! after init or commit; mutated by stage/rm/unstage; consumed by the
//! commit builder.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::utils::atomic_write;

/// Regular-file mode; the only one the working tree supports.
pub const MODE_FILE: u32 = 0o100644;

/// One staged change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum StageEntry {
    /// A file snapshot to carry into the next commit.
    File {
        hash: ObjectHash,
        size: u64,
        mtime_secs: i64,
        mtime_nanos: u32,
        mode: u32,
    },
    /// Tombstone: the path is removed by the next commit.
    Deleted,
}

impl StageEntry {
    /// The staged blob hash, `None` for a tombstone.
    pub fn blob_hash(&self) -> Option<ObjectHash> {
        match self {
            StageEntry::File { hash, .. } => Some(*hash),
            StageEntry::Deleted => None,
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, StageEntry::Deleted)
    }
}

/// In-memory staging state plus its on-disk location.
#[derive(Debug, Clone)]
pub struct StagingIndex {
    path: PathBuf,
    entries: BTreeMap<String, StageEntry>,
}

#[derive(Encode, Decode)]
struct IndexFile {
    entries: BTreeMap<String, StageEntry>,
}

impl StagingIndex {
    /// Load the index, empty when the file does not exist yet.
    pub fn load(path: &Path) -> Result<StagingIndex, MemError> {
        let entries = if path.exists() {
            let bytes = fs::read(path)?;
            let (file, _): (IndexFile, usize) =
                bincode::decode_from_slice(&bytes, bincode::config::standard()).map_err(|e| {
                    MemError::InvalidObjectInfo(format!("staging index corrupt: {e}"))
                })?;
            file.entries
        } else {
            BTreeMap::new()
        };
        Ok(StagingIndex {
            path: path.to_path_buf(),
            entries,
        })
    }

    /// Persist the canonical binary form via atomic replace.
    pub fn save(&self) -> Result<(), MemError> {
        let file = IndexFile {
            entries: self.entries.clone(),
        };
        let bytes = bincode::encode_to_vec(&file, bincode::config::standard())
            .map_err(|e| MemError::InvalidObjectInfo(format!("staging index encode: {e}")))?;
        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    pub fn insert(&mut self, path: String, entry: StageEntry) {
        self.entries.insert(path, entry);
    }

    pub fn remove(&mut self, path: &str) -> Option<StageEntry> {
        self.entries.remove(path)
    }

    pub fn get(&self, path: &str) -> Option<&StageEntry> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StageEntry)> {
        self.entries.iter()
    }

    pub fn paths(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry (after a commit consumes the index).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(payload: &[u8]) -> StageEntry {
        StageEntry::File {
            hash: ObjectHash::new(payload),
            size: payload.len() as u64,
            mtime_secs: 1_767_225_600,
            mtime_nanos: 42,
            mode: MODE_FILE,
        }
    }

    /// Load/save round-trips the map, tombstones included.
    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");

        let mut index = StagingIndex::load(&path).unwrap();
        assert!(index.is_empty());
        index.insert("semantic/pref.md".to_string(), entry(b"dark mode\n"));
        index.insert("episodic/log.md".to_string(), entry(b"entry\n"));
        index.insert("semantic/stale.md".to_string(), StageEntry::Deleted);
        index.save().unwrap();

        let loaded = StagingIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(
            loaded.get("semantic/pref.md").unwrap().blob_hash(),
            Some(ObjectHash::new(b"dark mode\n"))
        );
        assert!(loaded.get("semantic/stale.md").unwrap().is_deletion());
        assert_eq!(loaded.get("semantic/stale.md").unwrap().blob_hash(), None);
        // BTreeMap keys come back sorted.
        let paths: Vec<&String> = loaded.paths().collect();
        assert_eq!(
            paths,
            vec!["episodic/log.md", "semantic/pref.md", "semantic/stale.md"]
        );
    }

    /// Re-staging a path replaces its entry; unstage removes it.
    #[test]
    fn test_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = StagingIndex::load(&dir.path().join("index")).unwrap();

        index.insert("semantic/pref.md".to_string(), entry(b"v1"));
        index.insert("semantic/pref.md".to_string(), entry(b"v2"));
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get("semantic/pref.md").unwrap().blob_hash(),
            Some(ObjectHash::new(b"v2"))
        );

        // A tombstone replaces a snapshot of the same path.
        index.insert("semantic/pref.md".to_string(), StageEntry::Deleted);
        assert!(index.get("semantic/pref.md").unwrap().is_deletion());

        assert!(index.remove("semantic/pref.md").is_some());
        assert!(index.remove("semantic/pref.md").is_none());
        assert!(index.is_empty());
    }

    /// A corrupt index file is reported, not silently reset.
    #[test]
    fn test_corrupt_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index");
        fs::write(&path, b"\xff\xff\xff garbage").unwrap();
        assert!(StagingIndex::load(&path).is_err());
    }
}
