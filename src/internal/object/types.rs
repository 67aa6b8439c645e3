//! Object type and memory class enumerations used across the store, pack,
//! and merge modules.

use std::fmt::{self, Display};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::MemError;

/// Each object type is assigned a unique integer value, which identifies the
/// type of the object in pack entries.
///
/// * `Commit` (1): a specific version of the memory tree with its ancestry.
/// * `Tree` (2): a directory of named blob and subtree entries.
/// * `Blob` (3): the content of a single memory file.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit = 1,
    Tree,
    Blob,
}

const COMMIT_OBJECT_TYPE: &[u8] = b"commit";
const TREE_OBJECT_TYPE: &[u8] = b"tree";
const BLOB_OBJECT_TYPE: &[u8] = b"blob";

impl Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ObjectType::Blob => write!(f, "blob"),
            ObjectType::Tree => write!(f, "tree"),
            ObjectType::Commit => write!(f, "commit"),
        }
    }
}

impl ObjectType {
    /// Canonical ASCII tag written at the start of the framed byte form.
    pub fn to_bytes(&self) -> &'static [u8] {
        match self {
            ObjectType::Commit => COMMIT_OBJECT_TYPE,
            ObjectType::Tree => TREE_OBJECT_TYPE,
            ObjectType::Blob => BLOB_OBJECT_TYPE,
        }
    }

    /// Parses a string representation of an object type.
    pub fn from_string(s: &str) -> Result<ObjectType, MemError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            _ => Err(MemError::InvalidObjectType(s.to_string())),
        }
    }

    /// Convert an object type to its pack-entry kind byte.
    pub fn to_u8(&self) -> u8 {
        match self {
            ObjectType::Commit => 1,
            ObjectType::Tree => 2,
            ObjectType::Blob => 3,
        }
    }

    /// Convert a pack-entry kind byte to an object type.
    pub fn from_u8(number: u8) -> Result<ObjectType, MemError> {
        match number {
            1 => Ok(ObjectType::Commit),
            2 => Ok(ObjectType::Tree),
            3 => Ok(ObjectType::Blob),
            _ => Err(MemError::InvalidObjectType(format!(
                "invalid object type number: {number}"
            ))),
        }
    }
}

/// Memory class of a working-tree path, derived from its top-level directory
/// under the working root. The merge engine dispatches on this.
#[derive(
    PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Clone, Copy, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryClass {
    /// Time-stamped events under `episodic/`.
    Episodic,
    /// Facts under `semantic/`.
    Semantic,
    /// Workflows under `procedural/`.
    Procedural,
    /// Everything else; merged like semantic content.
    Other,
}

impl MemoryClass {
    /// Classify a repo-relative path by its first component.
    pub fn of_path(path: &Path) -> MemoryClass {
        let first = path
            .components()
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .unwrap_or("");
        match first {
            "episodic" => MemoryClass::Episodic,
            "semantic" => MemoryClass::Semantic,
            "procedural" => MemoryClass::Procedural,
            _ => MemoryClass::Other,
        }
    }
}

impl Display for MemoryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryClass::Episodic => write!(f, "episodic"),
            MemoryClass::Semantic => write!(f, "semantic"),
            MemoryClass::Procedural => write!(f, "procedural"),
            MemoryClass::Other => write!(f, "other"),
        }
    }
}
