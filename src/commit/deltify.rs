//! The storage deltifier: skip-delta base selection along the
//! predecessor chain, and the copy/insert delta codec used inside rep
//! containers.

use crate::errors::{FsError, Result};
use crate::node::noderev::NodeRevision;
use crate::node::rep::Representation;
use crate::packed;
use crate::repo::Repository;
use std::io::Read;

/// One delta instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeltaOp {
    /// Emit literal bytes.
    Insert(Vec<u8>),
    /// Copy `len` bytes from `offset` in the base.
    Copy { offset: u64, len: u64 },
}

const OP_END: u64 = 0;
const OP_INSERT: u64 = 1;
const OP_COPY: u64 = 2;

/// A self-delimiting delta: expanded size, then instructions, then an
/// end marker, all in the packed-varint idiom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub expanded_size: u64,
    pub ops: Vec<DeltaOp>,
}

impl Delta {
    /// Produce a delta turning BASE into TARGET. Shared prefix and suffix
    /// become copies; the middle is inserted literally.
    #[must_use]
    pub fn build(base: &[u8], target: &[u8]) -> Self {
        let mut ops = Vec::new();
        if base.is_empty() {
            if !target.is_empty() {
                ops.push(DeltaOp::Insert(target.to_vec()));
            }
            return Self { expanded_size: target.len() as u64, ops };
        }

        let limit = base.len().min(target.len());
        let mut prefix = 0usize;
        while prefix < limit && base[prefix] == target[prefix] {
            prefix += 1;
        }
        let mut suffix = 0usize;
        while suffix < limit - prefix
            && base[base.len() - 1 - suffix] == target[target.len() - 1 - suffix]
        {
            suffix += 1;
        }

        if prefix > 0 {
            ops.push(DeltaOp::Copy { offset: 0, len: prefix as u64 });
        }
        let middle = &target[prefix..target.len() - suffix];
        if !middle.is_empty() {
            ops.push(DeltaOp::Insert(middle.to_vec()));
        }
        if suffix > 0 {
            ops.push(DeltaOp::Copy {
                offset: (base.len() - suffix) as u64,
                len: suffix as u64,
            });
        }
        Self { expanded_size: target.len() as u64, ops }
    }

    /// Apply this delta to BASE.
    ///
    /// # Errors
    /// `Corrupt` on out-of-range copies or a size mismatch.
    pub fn apply(&self, base: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.expanded_size as usize);
        for op in &self.ops {
            match op {
                DeltaOp::Insert(bytes) => out.extend_from_slice(bytes),
                DeltaOp::Copy { offset, len } => {
                    let start = *offset as usize;
                    let end = start
                        .checked_add(*len as usize)
                        .filter(|end| *end <= base.len())
                        .ok_or_else(|| {
                            FsError::Corrupt("delta copy outside its base".into())
                        })?;
                    out.extend_from_slice(&base[start..end]);
                }
            }
        }
        if out.len() as u64 != self.expanded_size {
            return Err(FsError::Corrupt(format!(
                "delta expands to {} bytes, declared {}",
                out.len(),
                self.expanded_size
            )));
        }
        Ok(out)
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        packed::write_uint(&mut out, self.expanded_size);
        for op in &self.ops {
            match op {
                DeltaOp::Insert(bytes) => {
                    packed::write_uint(&mut out, OP_INSERT);
                    packed::write_uint(&mut out, bytes.len() as u64);
                    out.extend_from_slice(bytes);
                }
                DeltaOp::Copy { offset, len } => {
                    packed::write_uint(&mut out, OP_COPY);
                    packed::write_uint(&mut out, *offset);
                    packed::write_uint(&mut out, *len);
                }
            }
        }
        packed::write_uint(&mut out, OP_END);
        out
    }

    /// Decode one delta from READER, consuming exactly its bytes.
    ///
    /// # Errors
    /// `Corrupt` on unknown instructions, `UnexpectedEof` on truncation.
    pub fn decode(reader: &mut impl Read) -> Result<Self> {
        let expanded_size = read_varint(reader)?;
        let mut ops = Vec::new();
        loop {
            match read_varint(reader)? {
                OP_END => break,
                OP_INSERT => {
                    let len = read_varint(reader)? as usize;
                    let mut bytes = vec![0u8; len];
                    reader
                        .read_exact(&mut bytes)
                        .map_err(|_| FsError::UnexpectedEof("delta insert data".into()))?;
                    ops.push(DeltaOp::Insert(bytes));
                }
                OP_COPY => {
                    let offset = read_varint(reader)?;
                    let len = read_varint(reader)?;
                    ops.push(DeltaOp::Copy { offset, len });
                }
                other => {
                    return Err(FsError::Corrupt(format!(
                        "unknown delta instruction {other}"
                    )));
                }
            }
        }
        Ok(Self { expanded_size, ops })
    }
}

fn read_varint(reader: &mut impl Read) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader
            .read_exact(&mut byte)
            .map_err(|_| FsError::UnexpectedEof("truncated number in delta".into()))?;
        let chunk = (byte[0] & 0x7f) as u64;
        if shift > 63 || (shift == 63 && chunk > 1) {
            return Err(FsError::Corrupt("delta number too large".into()));
        }
        if byte[0] < 0x80 {
            return Ok(value + (chunk << shift));
        }
        value += chunk << shift;
        shift += 7;
    }
}

/// Pick the deltification base for NODEREV's text (or, with PROPS, its
/// property) rep.
///
/// Clearing the lowest set bit of the predecessor count yields the skip
/// target; within `max_linear_deltification` of the tip the immediate
/// predecessor is used instead, and walks longer than
/// `max_deltification_walk` restart the chain with no base at all.
/// A base whose chain shows signs of rep sharing is rejected once the
/// chain would exceed `2 * max_linear_deltification + 2`.
///
/// # Errors
/// Corruption errors from reading predecessors.
pub fn choose_delta_base(
    repo: &Repository,
    noderev: &NodeRevision,
    props: bool,
) -> Result<Option<Representation>> {
    if noderev.predecessor_count == 0 || noderev.predecessor.is_none() {
        return Ok(None);
    }
    let config = repo.config();

    let mut count = noderev.predecessor_count & (noderev.predecessor_count - 1);
    let walk = noderev.predecessor_count - count;
    if walk < config.max_linear_deltification {
        count = noderev.predecessor_count - 1;
    }
    if walk > config.max_deltification_walk {
        return Ok(None);
    }

    let mut base = noderev.clone();
    let mut maybe_shared_rep = false;
    for _ in count..noderev.predecessor_count {
        let predecessor = base.predecessor.ok_or_else(|| {
            FsError::Corrupt(format!(
                "node '{}' claims {} predecessors but the chain ends early",
                noderev.id,
                noderev.predecessor_count
            ))
        })?;
        base = repo.read_noderev(&predecessor)?;

        // A rep living in an older revision than its node hints at rep
        // sharing; such chains need a length cap.
        if let (Some((base_revision, _)), Some(rep)) = (
            base.id.rev_item(),
            if props { base.prop_rep.as_ref() } else { base.text_rep.as_ref() },
        ) && rep.revision.is_some_and(|rep_rev| base_revision > rep_rev)
        {
            maybe_shared_rep = true;
        }
    }

    let rep = if props { base.prop_rep } else { base.text_rep };
    let Some(rep) = rep.filter(|r| !r.is_mutable()) else {
        return Ok(None);
    };

    if maybe_shared_rep {
        let chain_length = repo.rep_chain_length(&rep)?;
        if chain_length >= 2 * config.max_linear_deltification + 2 {
            return Ok(None);
        }
    }
    Ok(Some(rep))
}
