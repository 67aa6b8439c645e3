//! Lightweight representation of one object flowing through the pack codec,
//! with helpers to convert from strongly typed objects.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::{
    hash::ObjectHash,
    internal::object::{ObjectTrait, blob::Blob, commit::Commit, tree::Tree, types::ObjectType},
};

/// Object payload plus identity, as written to or read from a pack.
#[derive(Eq, Clone, Debug, Serialize, Deserialize)]
pub struct Entry {
    pub obj_type: ObjectType,
    pub data: Vec<u8>,
    pub hash: ObjectHash,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.obj_type == other.obj_type && self.hash == other.hash
    }
}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.obj_type.hash(state);
        self.hash.hash(state);
    }
}

impl Entry {
    pub fn new(obj_type: ObjectType, data: Vec<u8>, hash: ObjectHash) -> Entry {
        Entry {
            obj_type,
            data,
            hash,
        }
    }
}

impl From<Blob> for Entry {
    fn from(value: Blob) -> Self {
        Self {
            obj_type: ObjectType::Blob,
            data: value.data.clone(),
            hash: value.id,
        }
    }
}

impl From<Commit> for Entry {
    fn from(value: Commit) -> Self {
        Self {
            obj_type: ObjectType::Commit,
            // Canonical encoding of a constructed commit cannot fail.
            data: value.to_data().unwrap(),
            hash: value.id,
        }
    }
}

impl From<Tree> for Entry {
    fn from(value: Tree) -> Self {
        Self {
            obj_type: ObjectType::Tree,
            data: value.to_data().unwrap(),
            hash: value.id,
        }
    }
}
