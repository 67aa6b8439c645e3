//! The Blob object stores the raw contents of a single memory file. Blobs
//! carry no name, mode, or class; all of that lives in the tree entries that
//! reference them, so identical payloads dedupe to one object regardless of
//! where they appear in the working tree.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::MemError;
use crate::hash::ObjectHash;
use crate::internal::object::ObjectTrait;
use crate::internal::object::types::ObjectType;

/// Opaque byte payload addressed by the SHA-256 of its framed form.
#[derive(Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Blob {
    pub id: ObjectHash,
    pub data: Vec<u8>,
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Display for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "blob {}", self.id)
    }
}

impl Blob {
    pub fn new(data: &[u8]) -> Blob {
        Blob {
            id: ObjectHash::from_type_and_data(ObjectType::Blob, data),
            data: data.to_vec(),
        }
    }

    /// Payload as UTF-8 text, lossy for binary content.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

impl ObjectTrait for Blob {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, MemError> {
        Ok(Blob {
            id: hash,
            data: data.to_vec(),
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Blob
    }

    fn to_data(&self) -> Result<Vec<u8>, MemError> {
        Ok(self.data.clone())
    }
}
