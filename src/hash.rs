//! Hash utilities for memory objects. Object IDs are SHA-256 over the
//! canonical byte form (`<kind> <len>\0<payload>`), 32 bytes on disk,
//! 64 hex chars in text form.

use std::{fmt::Display, io, str::FromStr};

use bincode::{Decode, Encode};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::MemError;
use crate::internal::object::types::ObjectType;

/// Byte length of an object ID.
pub const HASH_SIZE: usize = 32;
/// Hex string length of an object ID.
pub const HASH_HEX_LEN: usize = 64;

/// Concrete object ID value: SHA-256 digest bytes.
///
/// Supports conversion to/from hex strings, byte slices, and stream reading.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, Encode, Decode,
)]
pub struct ObjectHash(pub [u8; HASH_SIZE]);

impl Default for ObjectHash {
    fn default() -> Self {
        ObjectHash([0u8; HASH_SIZE])
    }
}

impl Display for ObjectHash {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ObjectHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

/// Parse 64 hex chars into `ObjectHash`.
impl FromStr for ObjectHash {
    type Err = MemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_HEX_LEN {
            return Err(MemError::InvalidHashValue(s.to_string()));
        }
        let bytes = hex::decode(s).map_err(|_| MemError::InvalidHashValue(s.to_string()))?;
        let mut h = [0u8; HASH_SIZE];
        h.copy_from_slice(&bytes);
        Ok(ObjectHash(h))
    }
}

impl ObjectHash {
    /// All-zero hash value, used as the "no object" sentinel in reflog
    /// records and CAS expectations.
    pub fn zero() -> ObjectHash {
        ObjectHash([0u8; HASH_SIZE])
    }

    /// True for the all-zero sentinel.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Compute the SHA-256 of raw data.
    pub fn new(data: &[u8]) -> ObjectHash {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(digest.as_ref());
        ObjectHash(bytes)
    }

    /// Compute the object ID from a type tag and payload, framing the data
    /// as `<kind> <len>\0<payload>` first.
    pub fn from_type_and_data(object_type: ObjectType, data: &[u8]) -> ObjectHash {
        let mut d: Vec<u8> = Vec::with_capacity(data.len() + 16);
        d.extend(object_type.to_bytes());
        d.push(b' ');
        d.extend(data.len().to_string().as_bytes());
        d.push(b'\x00');
        d.extend(data);
        ObjectHash::new(&d)
    }

    /// Create `ObjectHash` from exactly 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ObjectHash, MemError> {
        if bytes.len() != HASH_SIZE {
            return Err(MemError::InvalidHashValue(format!(
                "invalid byte length: got {}, expected {}",
                bytes.len(),
                HASH_SIZE
            )));
        }
        let mut h = [0u8; HASH_SIZE];
        h.copy_from_slice(bytes);
        Ok(ObjectHash(h))
    }

    /// Read hash bytes from a stream.
    pub fn from_stream(data: &mut impl io::Read) -> io::Result<ObjectHash> {
        let mut h = [0u8; HASH_SIZE];
        data.read_exact(&mut h)?;
        Ok(ObjectHash(h))
    }

    /// Format hash as colored string (for terminal display).
    pub fn to_color_str(self) -> String {
        self.to_string().red().bold().to_string()
    }

    /// Return raw bytes of the hash.
    pub fn to_data(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Abbreviated hex form, `len` chars (host tooling display).
    pub fn abbrev(&self, len: usize) -> String {
        let mut s = self.to_string();
        s.truncate(len.clamp(4, HASH_HEX_LEN));
        s
    }

    /// True if the lowercase hex form of this hash starts with `prefix`.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.to_string().starts_with(prefix)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use crate::hash::{HASH_HEX_LEN, ObjectHash};
    use crate::internal::object::types::ObjectType;

    /// Hashing "Hello, world!" should match the known SHA-256 value.
    #[test]
    fn test_sha256_new() {
        let data = "Hello, world!".as_bytes();
        let hash = ObjectHash::new(data);
        let expected = "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3";
        assert_eq!(hash.to_string(), expected);
    }

    /// Construct a hash from raw bytes and round-trip through hex.
    #[test]
    fn test_from_bytes() {
        // Pre-calculated SHA-256 hash for "abc"
        let hash = ObjectHash::from_bytes(&[
            0xba, 0x78, 0x16, 0xbf, 0x8f, 0x01, 0xcf, 0xea, 0x41, 0x41, 0x40, 0xde, 0x5d, 0xae,
            0x22, 0x23, 0xb0, 0x03, 0x61, 0xa3, 0x96, 0x17, 0x7a, 0x9c, 0xb4, 0x10, 0xff, 0x61,
            0xf2, 0x00, 0x15, 0xad,
        ])
        .unwrap();
        assert_eq!(
            hash.to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(ObjectHash::from_str(&hash.to_string()).unwrap(), hash);
    }

    /// Reading from a stream consumes exactly 32 bytes.
    #[test]
    fn test_from_stream() {
        let source = [0xabu8; 32];
        let mut reader = std::io::Cursor::new(source);
        let hash = ObjectHash::from_stream(&mut reader).unwrap();
        assert_eq!(hash.to_data(), vec![0xab; 32]);
    }

    /// Framed hashing includes the type tag and length header.
    #[test]
    fn test_from_type_and_data() {
        let framed = ObjectHash::from_type_and_data(ObjectType::Blob, b"dark mode\n");
        let manual = ObjectHash::new(b"blob 10\x00dark mode\n");
        assert_eq!(framed, manual);
        assert_ne!(framed, ObjectHash::new(b"dark mode\n"));
    }

    /// Wrong-length inputs are rejected.
    #[test]
    fn test_invalid_lengths() {
        assert!(ObjectHash::from_bytes(&[0u8; 20]).is_err());
        assert!(ObjectHash::from_str("abcd").is_err());
    }

    /// Abbreviation clamps to the valid prefix range.
    #[test]
    fn test_abbrev() {
        let hash = ObjectHash::new(b"x");
        assert_eq!(hash.abbrev(8).len(), 8);
        assert_eq!(hash.abbrev(2).len(), 4);
        assert_eq!(hash.abbrev(1000).len(), HASH_HEX_LEN);
        assert!(hash.matches_prefix(&hash.abbrev(8)));
    }

    /// The zero sentinel is distinct from real hashes.
    #[test]
    fn test_zero() {
        assert!(ObjectHash::zero().is_zero());
        assert!(!ObjectHash::new(b"").is_zero());
    }
}
