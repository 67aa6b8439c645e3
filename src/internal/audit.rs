//! Append-only, hash-chained audit log of repository operations.
//!
//! Every state-changing operation appends one entry
//! `(seq, op, fields, prev_entry_hash, entry_hash)` where
//! `entry_hash = SHA-256(seq ‖ op ‖ fields ‖ prev_entry_hash)` over a
//! canonical rendering with sorted field keys. Editing any stored entry
//! invalidates its own hash and the chain of every later entry;
//! verification reports the first broken sequence number.
//!
//! Storage is one JSON record per line at `.mem/audit/log`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::MemError;
use crate::hash::ObjectHash;

/// Operations recorded in the audit journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOp {
    Init,
    Stage,
    Commit,
    Checkout,
    Merge,
    Reset,
    Push,
    Pull,
    Config,
    Tag,
    Branch,
    Resolve,
    Gc,
}

impl AuditOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOp::Init => "init",
            AuditOp::Stage => "stage",
            AuditOp::Commit => "commit",
            AuditOp::Checkout => "checkout",
            AuditOp::Merge => "merge",
            AuditOp::Reset => "reset",
            AuditOp::Push => "push",
            AuditOp::Pull => "pull",
            AuditOp::Config => "config",
            AuditOp::Tag => "tag",
            AuditOp::Branch => "branch",
            AuditOp::Resolve => "resolve",
            AuditOp::Gc => "gc",
        }
    }
}

impl Display for AuditOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One journal record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub op: AuditOp,
    pub fields: BTreeMap<String, String>,
    pub prev_entry_hash: ObjectHash,
    pub entry_hash: ObjectHash,
}

impl AuditEntry {
    /// Canonical hash input: `seq ‖ op ‖ k=v pairs (sorted) ‖ prev hash`.
    fn compute_hash(
        seq: u64,
        op: AuditOp,
        fields: &BTreeMap<String, String>,
        prev: ObjectHash,
    ) -> ObjectHash {
        let mut data = Vec::new();
        data.extend_from_slice(seq.to_string().as_bytes());
        data.push(0x00);
        data.extend_from_slice(op.as_str().as_bytes());
        data.push(0x00);
        for (key, value) in fields {
            data.extend_from_slice(key.as_bytes());
            data.push(b'=');
            data.extend_from_slice(value.as_bytes());
            data.push(0x00);
        }
        data.extend_from_slice(prev.as_ref());
        ObjectHash::new(&data)
    }
}

/// File-backed audit journal.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: &Path) -> AuditLog {
        AuditLog {
            path: path.to_path_buf(),
        }
    }

    /// All entries, oldest first. Unparseable lines surface as corruption
    /// at the failing sequence position.
    pub fn entries(&self) -> Result<Vec<AuditEntry>, MemError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)?;
        let mut entries = Vec::new();
        for (index, line) in text.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            let entry: AuditEntry = serde_json::from_str(line)
                .map_err(|_| MemError::AuditCorrupt(index as u64 + 1))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Append one record, chaining it to the current tail.
    pub fn append(
        &self,
        op: AuditOp,
        fields: BTreeMap<String, String>,
    ) -> Result<AuditEntry, MemError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let (seq, prev) = match self.entries()?.last() {
            Some(tail) => (tail.seq + 1, tail.entry_hash),
            None => (1, ObjectHash::zero()),
        };
        let entry_hash = AuditEntry::compute_hash(seq, op, &fields, prev);
        let entry = AuditEntry {
            seq,
            op,
            fields,
            prev_entry_hash: prev,
            entry_hash,
        };

        let line = serde_json::to_string(&entry)
            .map_err(|e| MemError::InvalidObjectInfo(format!("audit encode: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        debug!(seq, op = %entry.op, "audit entry appended");
        Ok(entry)
    }

    /// Scan the chain in order, recomputing every hash. Returns the entry
    /// count on success; the first tampered entry fails with
    /// `AuditCorrupt(seq)`.
    pub fn verify(&self) -> Result<u64, MemError> {
        let entries = self.entries()?;
        let mut prev = ObjectHash::zero();
        let mut expected_seq = 1u64;
        for entry in &entries {
            if entry.seq != expected_seq
                || entry.prev_entry_hash != prev
                || AuditEntry::compute_hash(entry.seq, entry.op, &entry.fields, prev)
                    != entry.entry_hash
            {
                return Err(MemError::AuditCorrupt(expected_seq));
            }
            prev = entry.entry_hash;
            expected_seq += 1;
        }
        Ok(entries.len() as u64)
    }

    /// The tail entry, if any.
    pub fn last(&self) -> Result<Option<AuditEntry>, MemError> {
        Ok(self.entries()?.into_iter().next_back())
    }
}

/// Convenience constructor for op-specific field tables.
pub fn fields<const N: usize>(pairs: [(&str, String); N]) -> BTreeMap<String, String> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}
