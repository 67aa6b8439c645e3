//! Error types for the memvc crate.
//!
//! This module defines a unified error enumeration used across the object
//! store, pack encoding/decoding, references, merge, crypto, audit, and
//! remote sync. It integrates with `thiserror` to provide rich `Display`
//! implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant is a stable error kind; callers match on the variant, never
//!   on the rendered text.
//! - Variants carry contextual details (object hash, ref name, audit seq)
//!   via their payloads.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the memvc library.
///
/// - Used across object parsing, pack encode/decode, refs, merge, crypto,
///   audit, trust, and sync.
/// - Implements `std::error::Error` via `thiserror`.
pub enum MemError {
    /// Stored bytes do not rehash to the object's name.
    #[error("Object `{0}` does not rehash to its name.")]
    HashMismatch(String),

    /// Recomputed Merkle root differs from the one recorded in the commit.
    #[error("Merkle root mismatch for commit `{0}`.")]
    MerkleMismatch(String),

    /// Ed25519 signature did not verify against the recorded key.
    #[error("Signature verification failed: {0}")]
    SignatureInvalid(String),

    /// Audit chain broke at the given sequence number.
    #[error("Audit log corrupt at seq {0}.")]
    AuditCorrupt(u64),

    /// AES-256-GCM tag mismatch or undecryptable payload.
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Malformed pack or index file (bad magic, version, trailer, or entry).
    #[error("The `{0}` is not a valid pack or index file.")]
    PackCorrupt(String),

    /// Object, ref, or path does not exist.
    #[error("Cannot find `{0}`.")]
    NotFound(String),

    /// A hash prefix matched more than one object.
    #[error("The prefix `{0}` is ambiguous.")]
    AmbiguousRef(String),

    /// Ref name is empty, contains control bytes, or escapes its root.
    #[error("The `{0}` is not a valid ref name.")]
    InvalidRefName(String),

    /// A working-tree path escaped the working root after normalization.
    #[error("Path `{0}` is outside the working root.")]
    PathOutsideRoot(String),

    /// The repository write lock could not be acquired within the timeout.
    #[error("Repository lock is busy.")]
    LockBusy,

    /// The operation observed its cancellation signal and stopped.
    #[error("Operation cancelled.")]
    Cancelled,

    /// A merge is in progress; the operation is refused until it completes.
    #[error("Repository is in merging state: {0}")]
    MergingState(String),

    /// Merge completion was requested while conflicts remain unresolved.
    #[error("{0} merge conflict(s) remain unresolved.")]
    UnresolvedConflicts(usize),

    /// Push rejected: the remote tip is not an ancestor of the local tip.
    #[error("Non-fast-forward update of `{0}` rejected.")]
    NonFastForward(String),

    /// Transport-level failure talking to a remote.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Commits signed by this key may not be used at the current trust level.
    #[error("Key `{0}` is not trusted.")]
    UntrustedKey(String),

    /// Configuration value failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Invalid function argument.
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),

    /// Malformed canonical object bytes (blob/tree/commit decode).
    #[error("Error decode in the object, info: {0}")]
    InvalidObjectInfo(String),

    /// Invalid or unsupported object type name.
    #[error("The `{0}` is not a valid object type.")]
    InvalidObjectType(String),

    /// Invalid hash formatting or value.
    #[error("The `{0}` is not a valid hash value.")]
    InvalidHashValue(String),

    /// Delta reconstruction error (bad opcode, range, or chain).
    #[error("Delta object error, info: {0}")]
    DeltaObjectError(String),

    /// I/O error from an underlying reader or writer.
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
}

impl MemError {
    /// Stable machine-readable kind identifier for reporting surfaces
    /// (fsck findings, audit fields). Never parsed back; never localized.
    pub fn kind(&self) -> &'static str {
        match self {
            MemError::HashMismatch(_) => "HashMismatch",
            MemError::MerkleMismatch(_) => "MerkleMismatch",
            MemError::SignatureInvalid(_) => "SignatureInvalid",
            MemError::AuditCorrupt(_) => "AuditCorrupt",
            MemError::DecryptionFailed(_) => "DecryptionFailed",
            MemError::PackCorrupt(_) => "PackCorrupt",
            MemError::NotFound(_) => "NotFound",
            MemError::AmbiguousRef(_) => "AmbiguousRef",
            MemError::InvalidRefName(_) => "InvalidRefName",
            MemError::PathOutsideRoot(_) => "PathOutsideRoot",
            MemError::LockBusy => "LockBusy",
            MemError::Cancelled => "Cancelled",
            MemError::MergingState(_) => "MergingState",
            MemError::UnresolvedConflicts(_) => "UnresolvedConflicts",
            MemError::NonFastForward(_) => "NonFastForward",
            MemError::TransportError(_) => "TransportError",
            MemError::UntrustedKey(_) => "UntrustedKey",
            MemError::InvalidConfig(_) => "InvalidConfig",
            MemError::InvalidArgument(_) => "InvalidArgument",
            MemError::InvalidObjectInfo(_) => "InvalidObjectInfo",
            MemError::InvalidObjectType(_) => "InvalidObjectType",
            MemError::InvalidHashValue(_) => "InvalidHashValue",
            MemError::DeltaObjectError(_) => "DeltaObjectError",
            MemError::IOError(_) => "IOError",
        }
    }
}
