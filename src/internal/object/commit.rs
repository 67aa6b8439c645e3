//! The Commit object records a specific version of the memory tree at a
//! point in time: the root tree hash, parent commit hashes, author and
//! committer signatures, a message, and a metadata table.
//!
//! The metadata table carries the integrity layer's fields — `merkle_root`,
//! `signature`, `signing_key_id` — plus merge annotations such as
//! review flags for procedural files resolved by timestamp. Keys are sorted
//! in the canonical form so the commit hash is independent of insertion
//! order.
//!
//! Canonical byte form:
//!
//! ```text
//! tree <hex>\n
//! parent <hex>\n          (zero or more)
//! author <signature>\n
//! committer <signature>\n
//! meta <key> <value>\n    (zero or more, sorted by key)
//! \n
//! <message>
//! ```

use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;

/// Metadata key for the Merkle root over the commit's blobs.
pub const META_MERKLE_ROOT: &str = "merkle_root";
/// Metadata key for the Ed25519 signature over the Merkle root (hex).
pub const META_SIGNATURE: &str = "signature";
/// Metadata key for the signing public key fingerprint.
pub const META_SIGNING_KEY_ID: &str = "signing_key_id";
/// Metadata key flagging procedural files auto-resolved by timestamp.
pub const META_NEEDS_REVIEW: &str = "needs_review";
/// Metadata key flagging commits accepted from a conditionally trusted key.
pub const META_CONDITIONAL_TRUST: &str = "conditional_trust";

/// The `Commit` struct represents one version of the memory tree.
///
/// - `tree_id` points to the top-level tree reflecting the complete state of
///   the repository at commit time.
/// - `parent_commit_ids` chain commits into the history DAG: zero parents for
///   the root, one for a linear commit, two for a merge.
/// - Author and committer carry name, email, and a UTC timestamp with
///   sub-second precision.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: ObjectHash,
    pub tree_id: ObjectHash,
    pub parent_commit_ids: Vec<ObjectHash>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
    pub metadata: BTreeMap<String, String>,
}

impl PartialEq for Commit {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Commit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "tree: {}", self.tree_id)?;
        for parent in self.parent_commit_ids.iter() {
            writeln!(f, "parent: {parent}")?;
        }
        writeln!(f, "author {}", self.author)?;
        writeln!(f, "committer {}", self.committer)?;
        for (key, value) in &self.metadata {
            writeln!(f, "meta {key} {value}")?;
        }
        writeln!(f, "{}", self.message)
    }
}

impl Commit {
    pub fn new(
        author: Signature,
        committer: Signature,
        tree_id: ObjectHash,
        parent_commit_ids: Vec<ObjectHash>,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Commit, MemError> {
        for (key, value) in &metadata {
            if key.is_empty() || key.contains([' ', '\n']) || value.contains('\n') {
                return Err(MemError::InvalidArgument(format!(
                    "metadata entry `{key}` is not single-line"
                )));
            }
        }
        let mut commit = Commit {
            id: ObjectHash::default(),
            tree_id,
            parent_commit_ids,
            author,
            committer,
            message: message.to_string(),
            metadata,
        };
        commit.id = ObjectHash::from_type_and_data(ObjectType::Commit, &commit.to_data()?);
        Ok(commit)
    }

    /// True for a two-parent commit.
    pub fn is_merge(&self) -> bool {
        self.parent_commit_ids.len() > 1
    }

    /// First non-empty message line (history listings).
    pub fn format_message(&self) -> String {
        self.message
            .lines()
            .find(|line| !line.trim().is_empty())
            .map(|line| line.to_owned())
            .unwrap_or_else(|| self.message.clone())
    }

    /// The recorded Merkle root, when the integrity layer stamped one.
    pub fn merkle_root(&self) -> Option<ObjectHash> {
        self.metadata
            .get(META_MERKLE_ROOT)
            .and_then(|hex| ObjectHash::from_str(hex).ok())
    }

    /// The recorded signing key fingerprint, when the commit is signed.
    pub fn signing_key_id(&self) -> Option<&str> {
        self.metadata.get(META_SIGNING_KEY_ID).map(|s| s.as_str())
    }

    /// The recorded signature bytes, when the commit is signed.
    pub fn signature_bytes(&self) -> Option<Vec<u8>> {
        self.metadata
            .get(META_SIGNATURE)
            .and_then(|hex| hex::decode(hex).ok())
    }
}

impl ObjectTrait for Commit {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, MemError> {
        let mut tree_id = None;
        let mut parent_commit_ids = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut metadata = BTreeMap::new();

        let mut rest = data;
        loop {
            let line_end = rest.find_byte(0x0a).ok_or_else(|| {
                MemError::InvalidObjectInfo("commit headers not terminated".to_string())
            })?;
            let line = &rest[..line_end];
            rest = &rest[line_end + 1..];
            if line.is_empty() {
                break;
            }

            if let Some(value) = line.strip_prefix(b"tree ") {
                tree_id = Some(ObjectHash::from_str(&String::from_utf8_lossy(value))?);
            } else if let Some(value) = line.strip_prefix(b"parent ") {
                parent_commit_ids.push(ObjectHash::from_str(&String::from_utf8_lossy(value))?);
            } else if line.starts_with(b"author ") {
                author = Some(Signature::from_data(line.to_vec())?);
            } else if line.starts_with(b"committer ") {
                committer = Some(Signature::from_data(line.to_vec())?);
            } else if let Some(value) = line.strip_prefix(b"meta ") {
                let text = String::from_utf8(value.to_vec())
                    .map_err(|e| MemError::InvalidObjectInfo(format!("meta not utf-8: {e}")))?;
                let (key, value) = text.split_once(' ').ok_or_else(|| {
                    MemError::InvalidObjectInfo(format!("bad meta line `{text}`"))
                })?;
                metadata.insert(key.to_string(), value.to_string());
            } else {
                return Err(MemError::InvalidObjectInfo(format!(
                    "unknown commit header `{}`",
                    String::from_utf8_lossy(line)
                )));
            }
        }

        let message = String::from_utf8(rest.to_vec())
            .map_err(|e| MemError::InvalidObjectInfo(format!("message not utf-8: {e}")))?;

        Ok(Commit {
            id: hash,
            tree_id: tree_id
                .ok_or_else(|| MemError::InvalidObjectInfo("commit missing tree".to_string()))?,
            parent_commit_ids,
            author: author
                .ok_or_else(|| MemError::InvalidObjectInfo("commit missing author".to_string()))?,
            committer: committer.ok_or_else(|| {
                MemError::InvalidObjectInfo("commit missing committer".to_string())
            })?,
            message,
            metadata,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Commit
    }

    fn to_data(&self) -> Result<Vec<u8>, MemError> {
        let mut data = Vec::new();

        data.extend(b"tree ");
        data.extend(self.tree_id.to_string().as_bytes());
        data.push(0x0a);

        for parent in &self.parent_commit_ids {
            data.extend(b"parent ");
            data.extend(parent.to_string().as_bytes());
            data.push(0x0a);
        }

        data.extend(self.author.to_data()?);
        data.push(0x0a);
        data.extend(self.committer.to_data()?);
        data.push(0x0a);

        for (key, value) in &self.metadata {
            data.extend(b"meta ");
            data.extend(key.as_bytes());
            data.push(b' ');
            data.extend(value.as_bytes());
            data.push(0x0a);
        }

        data.push(0x0a);
        data.extend(self.message.as_bytes());

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::internal::object::signature::SignatureType;

    fn sig(role: SignatureType, secs: i64) -> Signature {
        Signature::new(
            role,
            "curator".to_string(),
            "curator@agents.local".to_string(),
            Utc.timestamp_opt(secs, 500_000_000).unwrap(),
        )
    }

    fn basic_commit() -> Commit {
        let mut metadata = BTreeMap::new();
        metadata.insert(
            META_MERKLE_ROOT.to_string(),
            ObjectHash::new(b"root").to_string(),
        );
        Commit::new(
            sig(SignatureType::Author, 1_767_225_600),
            sig(SignatureType::Committer, 1_767_312_000),
            ObjectHash::new(b"tree"),
            vec![ObjectHash::new(b"parent")],
            "record dark mode preference\n",
            metadata,
        )
        .unwrap()
    }

    /// Canonical bytes round-trip, including metadata.
    #[test]
    fn test_commit_roundtrip() {
        let commit = basic_commit();
        let data = commit.to_data().unwrap();
        let back = Commit::from_bytes(&data, commit.id).unwrap();

        assert_eq!(back, commit);
        assert_eq!(back.tree_id, commit.tree_id);
        assert_eq!(back.parent_commit_ids.len(), 1);
        assert_eq!(back.author.name, "curator");
        assert_eq!(back.message, "record dark mode preference\n");
        assert_eq!(back.merkle_root(), Some(ObjectHash::new(b"root")));
        assert_eq!(back.object_hash().unwrap(), commit.id);
    }

    /// Metadata order does not affect the commit hash.
    #[test]
    fn test_metadata_canonical_order() {
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), "1".to_string());
        forward.insert("b".to_string(), "2".to_string());
        let mut backward = BTreeMap::new();
        backward.insert("b".to_string(), "2".to_string());
        backward.insert("a".to_string(), "1".to_string());

        let lhs = Commit::new(
            sig(SignatureType::Author, 1),
            sig(SignatureType::Committer, 1),
            ObjectHash::new(b"t"),
            vec![],
            "m",
            forward,
        )
        .unwrap();
        let rhs = Commit::new(
            sig(SignatureType::Author, 1),
            sig(SignatureType::Committer, 1),
            ObjectHash::new(b"t"),
            vec![],
            "m",
            backward,
        )
        .unwrap();
        assert_eq!(lhs.id, rhs.id);
    }

    /// A root commit has no parents; a merge commit reports itself as one.
    #[test]
    fn test_parent_shapes() {
        let root = Commit::new(
            sig(SignatureType::Author, 1),
            sig(SignatureType::Committer, 1),
            ObjectHash::new(b"t"),
            vec![],
            "root",
            BTreeMap::new(),
        )
        .unwrap();
        assert!(!root.is_merge());
        assert!(root.parent_commit_ids.is_empty());

        let merge = Commit::new(
            sig(SignatureType::Author, 2),
            sig(SignatureType::Committer, 2),
            ObjectHash::new(b"t"),
            vec![root.id, ObjectHash::new(b"other")],
            "merge",
            BTreeMap::new(),
        )
        .unwrap();
        assert!(merge.is_merge());
    }

    /// Multi-line metadata values are refused; multi-line messages parse.
    #[test]
    fn test_message_and_metadata_edges() {
        let mut bad = BTreeMap::new();
        bad.insert("k".to_string(), "line1\nline2".to_string());
        assert!(
            Commit::new(
                sig(SignatureType::Author, 1),
                sig(SignatureType::Committer, 1),
                ObjectHash::new(b"t"),
                vec![],
                "m",
                bad,
            )
            .is_err()
        );

        let commit = Commit::new(
            sig(SignatureType::Author, 1),
            sig(SignatureType::Committer, 1),
            ObjectHash::new(b"t"),
            vec![],
            "subject\n\nbody with\nmore lines\n",
            BTreeMap::new(),
        )
        .unwrap();
        let back = Commit::from_bytes(&commit.to_data().unwrap(), commit.id).unwrap();
        assert_eq!(back.message, "subject\n\nbody with\nmore lines\n");
        assert_eq!(back.format_message(), "subject");
    }
}
