//! Myers-based delta codec for pack entries.
//!
//! The wire format is a flat copy/insert instruction stream, big-endian:
//!
//! ```text
//! 0x00 <off u32> <len u32>      copy `len` bytes from `off` in the base
//! 0x01 <len u32> <bytes...>     insert `len` literal bytes
//! 0x02                          end of stream
//! ```
//!
//! `apply(base, compute_delta(base, target)) == target` holds for any pair
//! of byte strings; the similarity matcher decides which pairs are worth
//! encoding at all.

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use diffs::{Diff, myers};

use crate::errors::MemError;

const OP_COPY: u8 = 0x00;
const OP_INSERT: u8 = 0x01;
const OP_END: u8 = 0x02;

/// Delta operation kind: copy-from-base or inline literal data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Optype {
    Copy,
    Data,
}

/// A single op: copy `len` bytes from `begin` in the base, or insert `len`
/// bytes from `begin` in the target.
#[derive(Debug, Clone, Copy)]
struct DeltaOp {
    ins: Optype,
    begin: usize,
    len: usize,
}

/// Collects copy/insert operations from a Myers diff between two byte
/// slices, coalescing adjacent ops of the same kind.
struct DeltaPlan<'a> {
    ops: Vec<DeltaOp>,
    target: &'a [u8],
}

impl Diff for DeltaPlan<'_> {
    type Error = ();

    fn equal(&mut self, old: usize, _new: usize, len: usize) -> Result<(), Self::Error> {
        if let Some(tail) = self.ops.last_mut()
            && tail.ins == Optype::Copy
            && tail.begin + tail.len == old
        {
            tail.len += len;
            return Ok(());
        }
        self.ops.push(DeltaOp {
            ins: Optype::Copy,
            begin: old,
            len,
        });
        Ok(())
    }

    fn insert(&mut self, _old: usize, new: usize, len: usize) -> Result<(), Self::Error> {
        if let Some(tail) = self.ops.last_mut()
            && tail.ins == Optype::Data
            && tail.begin + tail.len == new
        {
            tail.len += len;
            return Ok(());
        }
        self.ops.push(DeltaOp {
            ins: Optype::Data,
            begin: new,
            len,
        });
        Ok(())
    }
}

/// Compute the delta transforming `base` into `target`.
pub fn compute_delta(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut plan = DeltaPlan {
        ops: Vec::new(),
        target,
    };
    // Infallible: DeltaPlan callbacks never error.
    myers::diff(&mut plan, base, 0, base.len(), target, 0, target.len()).unwrap();

    let mut out = Vec::with_capacity(plan.ops.len() * 9 + 1);
    for op in &plan.ops {
        match op.ins {
            Optype::Copy => {
                out.push(OP_COPY);
                out.write_u32::<BigEndian>(op.begin as u32).unwrap();
                out.write_u32::<BigEndian>(op.len as u32).unwrap();
            }
            Optype::Data => {
                out.push(OP_INSERT);
                out.write_u32::<BigEndian>(op.len as u32).unwrap();
                out.extend_from_slice(&target[op.begin..op.begin + op.len]);
            }
        }
    }
    out.push(OP_END);
    out
}

/// Reconstruct the target from `base` and a delta stream.
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, MemError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    loop {
        let op = *delta
            .get(pos)
            .ok_or_else(|| MemError::DeltaObjectError("unterminated delta stream".to_string()))?;
        pos += 1;
        match op {
            OP_COPY => {
                if delta.len() < pos + 8 {
                    return Err(MemError::DeltaObjectError(
                        "truncated copy instruction".to_string(),
                    ));
                }
                let off = BigEndian::read_u32(&delta[pos..pos + 4]) as usize;
                let len = BigEndian::read_u32(&delta[pos + 4..pos + 8]) as usize;
                pos += 8;
                let end = off
                    .checked_add(len)
                    .ok_or_else(|| MemError::DeltaObjectError("copy overflow".to_string()))?;
                if end > base.len() {
                    return Err(MemError::DeltaObjectError(format!(
                        "copy range {off}..{end} exceeds base length {}",
                        base.len()
                    )));
                }
                out.extend_from_slice(&base[off..end]);
            }
            OP_INSERT => {
                if delta.len() < pos + 4 {
                    return Err(MemError::DeltaObjectError(
                        "truncated insert instruction".to_string(),
                    ));
                }
                let len = BigEndian::read_u32(&delta[pos..pos + 4]) as usize;
                pos += 4;
                if delta.len() < pos + len {
                    return Err(MemError::DeltaObjectError(
                        "truncated insert payload".to_string(),
                    ));
                }
                out.extend_from_slice(&delta[pos..pos + len]);
                pos += len;
            }
            OP_END => {
                if pos != delta.len() {
                    return Err(MemError::DeltaObjectError(
                        "trailing bytes after end instruction".to_string(),
                    ));
                }
                return Ok(out);
            }
            other => {
                return Err(MemError::DeltaObjectError(format!(
                    "unknown delta opcode {other:#04x}"
                )));
            }
        }
    }
}
