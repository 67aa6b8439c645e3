//! Object model definitions for memory blobs, trees, and commits, plus the
//! trait that lets the store and pack layers create strongly typed values
//! from canonical bytes.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tree;
pub mod types;

use crate::{errors::MemError, hash::ObjectHash, internal::object::types::ObjectType};

/// **The Object Trait**
/// Defines the common interface for all object types: blobs, trees, commits.
pub trait ObjectTrait: Send + Sync {
    /// Creates a new object from its canonical payload bytes.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, MemError>
    where
        Self: Sized;

    /// Returns the type of the object.
    fn get_type(&self) -> ObjectType;

    /// Canonical payload bytes (without the `<kind> <len>\0` frame).
    fn to_data(&self) -> Result<Vec<u8>, MemError>;

    /// Computes the object hash from serialized data.
    ///
    /// Default implementation serializes the object and hashes the framed
    /// form. Override only for custom caching.
    fn object_hash(&self) -> Result<ObjectHash, MemError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(self.get_type(), &data))
    }
}
