//! Writing representations into the proto-rev file: the rep container
//! framing, checksumming, and SHA-1 rep sharing (in-transaction sidecars,
//! the in-commit hash, and the persistent rep cache).

use crate::commit::deltify::Delta;
use crate::errors::{FsError, Result};
use crate::index::ItemType;
use crate::index::p2l::{ItemRef, P2lEntry};
use crate::node::id::Revision;
use crate::node::rep::{Representation, Uniquifier};
use crate::repo::{md5_of, sha1_of};
use crate::txn::store::{ProtoRevWrite, Transaction};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};

/// The header line in front of every rep's delta stream:
/// `DELTA\n` for delta-vs-empty, `DELTA <rev> <item>\n` otherwise.
/// The stream is followed by the `ENDREP\n` trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepHeader {
    pub base: Option<(Revision, u64)>,
}

impl RepHeader {
    pub fn write(&self, out: &mut Vec<u8>) {
        match self.base {
            None => out.extend_from_slice(b"DELTA\n"),
            Some((revision, item)) => {
                out.extend_from_slice(format!("DELTA {revision} {item}\n").as_bytes());
            }
        }
    }

    /// # Errors
    /// `Corrupt` on a malformed header line.
    pub fn read(reader: &mut impl BufRead) -> Result<Self> {
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(FsError::io("reading rep header".to_string()))?;
        let line = line.trim_end_matches('\n');
        if line == "DELTA" {
            return Ok(Self { base: None });
        }
        let corrupt = || FsError::Corrupt(format!("malformed rep header '{line}'"));
        let rest = line.strip_prefix("DELTA ").ok_or_else(corrupt)?;
        let (rev, item) = rest.split_once(' ').ok_or_else(corrupt)?;
        Ok(Self {
            base: Some((
                rev.parse::<u64>().map_err(|_| corrupt())?,
                item.parse::<u64>().map_err(|_| corrupt())?,
            )),
        })
    }
}

/// In-commit table of freshly written reps, keyed by SHA-1.
pub type RepsHash = HashMap<[u8; 20], Representation>;

/// Write CONTENT as a rep into the proto-rev file, deltified against
/// BASE, and run rep sharing over the result.
///
/// The bytes go out first; when a shared twin is found (in-commit hash,
/// same-transaction sidecar, then the persistent rep cache) the proto-rev
/// file is truncated back and the twin's rep is returned instead. Only
/// unshared reps get an item index and a P2L entry.
///
/// # Errors
/// I/O, index and corruption errors.
pub(crate) fn write_rep(
    txn: &Transaction,
    proto: &mut ProtoRevWrite,
    content: &[u8],
    base: Option<Representation>,
    item_type: ItemType,
    reps_hash: &mut Option<&mut RepsHash>,
) -> Result<Representation> {
    let repo = txn.repository().clone();
    let offset = proto.seek_end()?;

    let base_content = match &base {
        Some(rep) => repo.rep_content(rep)?,
        None => Vec::new(),
    };
    let delta = Delta::build(&base_content, content);
    let delta_bytes = delta.encode();

    let mut container = Vec::with_capacity(delta_bytes.len() + 32);
    let header = RepHeader {
        base: base.as_ref().and_then(|rep| rep.revision.map(|rev| (rev, rep.item_index))),
    };
    header.write(&mut container);
    container.extend_from_slice(&delta_bytes);
    container.extend_from_slice(b"ENDREP\n");
    proto
        .file
        .write_all(&container)
        .map_err(FsError::io("writing rep to proto-rev".to_string()))?;

    let sha1 = sha1_of(content);
    let md5 = md5_of(content);

    if let Some(mut shared) = find_shared_rep(txn, &sha1, reps_hash.as_deref())? {
        if shared.expanded_size == content.len() as u64 {
            proto.truncate_to(offset)?;
            shared.md5 = Some(md5);
            shared.sha1 = Some(sha1);
            log::debug!(
                "rep sharing: reused {} for {} bytes in transaction {}",
                shared.unparse(),
                content.len(),
                txn.id()
            );
            return Ok(shared);
        }
        log::warn!(
            "rep cache entry for {} disagrees on size; keeping the new rep",
            hex::encode(sha1)
        );
    }

    let item_index = txn.allocate_item_index(offset)?;
    let uniquifier = Uniquifier { txn_id: txn.id(), number: txn.new_node_number()? };
    let rep = Representation {
        revision: None,
        item_index,
        size: delta_bytes.len() as u64,
        expanded_size: content.len() as u64,
        md5: Some(md5),
        sha1: Some(sha1),
        uniquifier: Some(uniquifier),
        txn_id: Some(txn.id()),
    };

    txn.store_p2l_entry(&P2lEntry {
        offset,
        size: container.len() as u64,
        item_type,
        items: vec![ItemRef { revision: None, number: item_index }],
    })?;

    let sidecar = txn.dir().join(hex::encode(sha1));
    std::fs::write(&sidecar, rep.unparse())
        .map_err(FsError::io(format!("writing '{}'", sidecar.display())))?;
    if let Some(hash) = reps_hash.as_deref_mut() {
        hash.insert(sha1, rep);
    }
    Ok(rep)
}

/// Probe the three sharing tiers for an existing rep with this SHA-1.
fn find_shared_rep(
    txn: &Transaction,
    sha1: &[u8; 20],
    reps_hash: Option<&RepsHash>,
) -> Result<Option<Representation>> {
    if let Some(rep) = reps_hash.and_then(|hash| hash.get(sha1)) {
        return Ok(Some(*rep));
    }

    let sidecar = txn.dir().join(hex::encode(sha1));
    if sidecar.exists() {
        let text = std::fs::read_to_string(&sidecar)
            .map_err(FsError::io(format!("reading '{}'", sidecar.display())))?;
        return Ok(Some(Representation::parse(text.trim_end())?));
    }

    if txn.repository().config().rep_sharing_allowed {
        return txn.repository().inner.rep_cache.get(sha1);
    }
    Ok(None)
}

/// Expand a rep that still lives in this transaction's proto-rev file.
///
/// # Errors
/// `Corrupt` when the rep's proto index entry is missing.
pub(crate) fn read_proto_rep(txn: &Transaction, rep: &Representation) -> Result<Vec<u8>> {
    let records = crate::index::proto::read_l2p_proto(&txn.proto_l2p_path())?;
    let offset = records
        .iter()
        .rev()
        .find(|record| record.offset_plus_one > 0 && record.item_index == rep.item_index)
        .map(|record| record.offset_plus_one - 1)
        .ok_or_else(|| {
            FsError::Corrupt(format!(
                "rep item {} not present in transaction {}",
                rep.item_index,
                txn.id()
            ))
        })?;

    let path = txn.dir().join("rev");
    let file = std::fs::File::open(&path)
        .map_err(FsError::io(format!("opening '{}'", path.display())))?;
    let mut reader = BufReader::new(file);
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(FsError::io("seeking proto-rev".to_string()))?;
    let header = RepHeader::read(&mut reader)?;
    let delta = Delta::decode(&mut reader)?;
    let mut trailer = [0u8; 7];
    reader
        .read_exact(&mut trailer)
        .map_err(FsError::io("reading rep trailer".to_string()))?;
    if &trailer != b"ENDREP\n" {
        return Err(FsError::Corrupt("proto-rev rep is missing its ENDREP trailer".into()));
    }

    let base_content = match header.base {
        Some((base_rev, base_item)) => txn.repository().expand_rep_at(base_rev, base_item)?,
        None => Vec::new(),
    };
    let content = delta.apply(&base_content)?;
    if content.len() as u64 != rep.expanded_size {
        return Err(FsError::Corrupt(format!(
            "proto-rev rep expands to {} bytes, expected {}",
            content.len(),
            rep.expanded_size
        )));
    }
    Ok(content)
}
