//! Integrity and confidentiality layer: Merkle trees with single-leaf
//! proofs, Ed25519 commit signing, and optional AES-256-GCM encryption of
//! blob payloads at rest.

pub mod encrypt;
pub mod merkle;
pub mod sign;
