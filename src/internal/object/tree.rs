//! The Tree object represents one directory level of the memory tree: an
//! ordered set of `(mode, name, hash)` entries, names unique and sorted by
//! byte value. The canonical byte form of one entry is
//! `<mode> <name>\0<hash 32B>`; entries are concatenated with no separator.
//!
//! Symlinks and executable bits are out of scope, so the only modes are
//! `100644` (blob) and `40000` (subtree); the entry kind is recovered from
//! the mode.

use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::MemError;
use crate::hash::{HASH_SIZE, ObjectHash};
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// Entry mode; doubles as the entry kind.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum TreeItemMode {
    Blob,
    Tree,
}

impl TreeItemMode {
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            TreeItemMode::Blob => b"100644",
            TreeItemMode::Tree => b"40000",
        }
    }

    pub fn tree_item_type_from_bytes(mode: &[u8]) -> Result<TreeItemMode, MemError> {
        match mode {
            b"100644" => Ok(TreeItemMode::Blob),
            b"40000" => Ok(TreeItemMode::Tree),
            _ => Err(MemError::InvalidObjectInfo(format!(
                "unsupported tree entry mode `{}`",
                String::from_utf8_lossy(mode)
            ))),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            TreeItemMode::Blob => ObjectType::Blob,
            TreeItemMode::Tree => ObjectType::Tree,
        }
    }
}

impl Display for TreeItemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.to_bytes()))
    }
}

/// One `(mode, name, hash)` entry of a tree.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct TreeItem {
    pub mode: TreeItemMode,
    pub id: ObjectHash,
    pub name: String,
}

impl TreeItem {
    pub fn new(mode: TreeItemMode, id: ObjectHash, name: String) -> TreeItem {
        TreeItem { mode, id, name }
    }

    /// Canonical byte form: `<mode> <name>\0<hash bytes>`.
    pub fn to_data(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.name.len() + HASH_SIZE + 8);
        data.extend_from_slice(self.mode.to_bytes());
        data.push(b' ');
        data.extend_from_slice(self.name.as_bytes());
        data.push(b'\x00');
        data.extend_from_slice(self.id.as_ref());
        data
    }
}

impl Display for TreeItem {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} {} {}", self.mode, self.id, self.name)
    }
}

/// Ordered set of entries addressed by the hash of their concatenation.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub id: ObjectHash,
    pub tree_items: Vec<TreeItem>,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for item in &self.tree_items {
            writeln!(f, "{item}")?;
        }
        Ok(())
    }
}

impl Tree {
    /// Build a tree from entries, sorting by name bytes and enforcing
    /// uniqueness and name validity.
    pub fn from_tree_items(mut tree_items: Vec<TreeItem>) -> Result<Tree, MemError> {
        for item in &tree_items {
            if item.name.is_empty()
                || item.name == "."
                || item.name == ".."
                || item.name.bytes().any(|b| b == b'/' || b == b'\x00' || b < 0x20)
            {
                return Err(MemError::InvalidObjectInfo(format!(
                    "invalid tree entry name `{}`",
                    item.name
                )));
            }
        }
        tree_items.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        for pair in tree_items.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(MemError::InvalidObjectInfo(format!(
                    "duplicate tree entry name `{}`",
                    pair[0].name
                )));
            }
        }
        let mut tree = Tree {
            id: ObjectHash::default(),
            tree_items,
        };
        tree.id = ObjectHash::from_type_and_data(ObjectType::Tree, &tree.to_data()?);
        Ok(tree)
    }

    /// The empty tree; base of merges with no common ancestor.
    pub fn empty() -> Tree {
        Tree::from_tree_items(Vec::new()).unwrap()
    }

    /// Look up a direct child entry by name.
    pub fn find(&self, name: &str) -> Option<&TreeItem> {
        self.tree_items.iter().find(|item| item.name == name)
    }
}

impl ObjectTrait for Tree {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, MemError> {
        let mut tree_items = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let space = rest
                .find_byte(b' ')
                .ok_or_else(|| MemError::InvalidObjectInfo("tree entry missing mode".to_string()))?;
            let mode = TreeItemMode::tree_item_type_from_bytes(&rest[..space])?;

            let nul = rest
                .find_byte(b'\x00')
                .ok_or_else(|| MemError::InvalidObjectInfo("tree entry missing name".to_string()))?;
            let name = String::from_utf8(rest[space + 1..nul].to_vec())
                .map_err(|e| MemError::InvalidObjectInfo(format!("tree name not utf-8: {e}")))?;

            if rest.len() < nul + 1 + HASH_SIZE {
                return Err(MemError::InvalidObjectInfo(
                    "tree entry truncated hash".to_string(),
                ));
            }
            let id = ObjectHash::from_bytes(&rest[nul + 1..nul + 1 + HASH_SIZE])?;
            tree_items.push(TreeItem { mode, id, name });
            rest = &rest[nul + 1 + HASH_SIZE..];
        }
        Ok(Tree {
            id: hash,
            tree_items,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tree
    }

    fn to_data(&self) -> Result<Vec<u8>, MemError> {
        let mut data = Vec::new();
        for item in &self.tree_items {
            data.extend(item.to_data());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::object::blob::Blob;

    fn item(name: &str, payload: &[u8]) -> TreeItem {
        TreeItem::new(TreeItemMode::Blob, Blob::new(payload).id, name.to_string())
    }

    /// Entries sort by byte value and the id covers the canonical bytes.
    #[test]
    fn test_tree_ordering() {
        let tree =
            Tree::from_tree_items(vec![item("pref.md", b"b"), item("fact.md", b"a")]).unwrap();
        assert_eq!(tree.tree_items[0].name, "fact.md");
        assert_eq!(tree.tree_items[1].name, "pref.md");

        let reordered =
            Tree::from_tree_items(vec![item("fact.md", b"a"), item("pref.md", b"b")]).unwrap();
        assert_eq!(tree.id, reordered.id);
    }

    /// Duplicate and invalid names are rejected.
    #[test]
    fn test_tree_validation() {
        assert!(Tree::from_tree_items(vec![item("x", b"1"), item("x", b"2")]).is_err());
        assert!(Tree::from_tree_items(vec![item("..", b"1")]).is_err());
        assert!(Tree::from_tree_items(vec![item("a/b", b"1")]).is_err());
        assert!(Tree::from_tree_items(vec![item("", b"1")]).is_err());
    }

    /// Canonical bytes round-trip through from_bytes.
    #[test]
    fn test_tree_roundtrip() {
        let sub = Tree::from_tree_items(vec![item("log.md", b"entry\n")]).unwrap();
        let tree = Tree::from_tree_items(vec![
            item("pref.md", b"dark mode\n"),
            TreeItem::new(TreeItemMode::Tree, sub.id, "episodic".to_string()),
        ])
        .unwrap();

        let data = tree.to_data().unwrap();
        let back = Tree::from_bytes(&data, tree.id).unwrap();
        assert_eq!(back, tree);
        assert_eq!(back.tree_items.len(), 2);
        assert_eq!(back.find("episodic").unwrap().mode, TreeItemMode::Tree);
        assert_eq!(back.object_hash().unwrap(), tree.id);
    }

    /// The empty tree is stable.
    #[test]
    fn test_empty_tree() {
        assert_eq!(Tree::empty().id, Tree::empty().id);
        assert!(Tree::empty().tree_items.is_empty());
    }
}
