//! Append-only proto index files kept inside transaction directories.
//!
//! Both files are streams of fixed-width little-endian u64 fields so that
//! writers never need to rewrite earlier records.

use crate::errors::{FsError, Result};
use crate::index::p2l::{ItemRef, P2lEntry};
use crate::index::ItemType;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

/// One proto-L2P record: `(offset + 1, item_index)`; `(0, 0)` marks a
/// revision boundary. An offset of -1 ("unused") is representable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtoL2pEntry {
    pub offset_plus_one: u64,
    pub item_index: u64,
}

/// Writer for the log-to-phys proto index.
pub struct ProtoL2p {
    file: File,
}

impl ProtoL2p {
    /// # Errors
    /// I/O errors opening PATH for append.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(FsError::io(format!("opening proto index '{}'", path.display())))?;
        Ok(Self { file })
    }

    /// Start the entries of the next revision.
    ///
    /// # Errors
    /// I/O errors from the append.
    pub fn add_revision(&mut self) -> Result<()> {
        self.write_pair(0, 0)
    }

    /// Record `item_index → offset`. OFFSET may be -1 for "unused".
    ///
    /// # Errors
    /// I/O errors from the append.
    pub fn add_entry(&mut self, offset: i64, item_index: u64) -> Result<()> {
        debug_assert!(offset >= -1);
        self.write_pair((offset + 1) as u64, item_index)
    }

    fn write_pair(&mut self, a: u64, b: u64) -> Result<()> {
        let mut record = [0u8; 16];
        record[..8].copy_from_slice(&a.to_le_bytes());
        record[8..].copy_from_slice(&b.to_le_bytes());
        self.file
            .write_all(&record)
            .map_err(FsError::io("appending proto-l2p entry".to_string()))
    }
}

/// Read every record of a proto-L2P file.
///
/// # Errors
/// `Corrupt` on a torn record, I/O errors otherwise.
pub fn read_l2p_proto(path: &Path) -> Result<Vec<ProtoL2pEntry>> {
    let mut data = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut data))
        .map_err(FsError::io(format!("reading proto index '{}'", path.display())))?;
    if data.len() % 16 != 0 {
        return Err(FsError::Corrupt(format!(
            "proto index '{}' has a torn record",
            path.display()
        )));
    }
    Ok(data
        .chunks_exact(16)
        .map(|chunk| ProtoL2pEntry {
            offset_plus_one: u64::from_le_bytes(chunk[..8].try_into().expect("8 bytes")),
            item_index: u64::from_le_bytes(chunk[8..].try_into().expect("8 bytes")),
        })
        .collect())
}

/// Writer for the phys-to-log proto index. Entries must be appended in
/// ascending offset order and tile the proto-rev file.
pub struct ProtoP2l {
    file: File,
}

impl ProtoP2l {
    /// # Errors
    /// I/O errors opening PATH for append.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(FsError::io(format!("opening proto index '{}'", path.display())))?;
        Ok(Self { file })
    }

    /// # Errors
    /// I/O errors from the append.
    pub fn add_entry(&mut self, entry: &P2lEntry) -> Result<()> {
        let mut record = Vec::with_capacity(32 + entry.items.len() * 16);
        record.extend_from_slice(&entry.offset.to_le_bytes());
        record.extend_from_slice(&entry.size.to_le_bytes());
        record.extend_from_slice(&entry.item_type.as_u64().to_le_bytes());
        record.extend_from_slice(&(entry.items.len() as u64).to_le_bytes());
        for item in &entry.items {
            let rev_plus_one = item.revision.map_or(0, |r| r + 1);
            record.extend_from_slice(&rev_plus_one.to_le_bytes());
            record.extend_from_slice(&item.number.to_le_bytes());
        }
        self.file
            .write_all(&record)
            .map_err(FsError::io("appending proto-p2l entry".to_string()))
    }
}

/// Read every entry of a proto-P2L file.
///
/// # Errors
/// `Corrupt` on torn records, I/O errors otherwise.
pub fn read_p2l_proto(path: &Path) -> Result<Vec<P2lEntry>> {
    let mut data = Vec::new();
    File::open(path)
        .and_then(|mut f| f.read_to_end(&mut data))
        .map_err(FsError::io(format!("reading proto index '{}'", path.display())))?;

    let mut entries = Vec::new();
    let mut pos = 0usize;
    let torn =
        || FsError::Corrupt(format!("proto index '{}' has a torn record", path.display()));
    let read_u64 = |pos: &mut usize| -> Result<u64> {
        if data.len() < *pos + 8 {
            return Err(torn());
        }
        let v = u64::from_le_bytes(data[*pos..*pos + 8].try_into().expect("8 bytes"));
        *pos += 8;
        Ok(v)
    };
    while pos < data.len() {
        let offset = read_u64(&mut pos)?;
        let size = read_u64(&mut pos)?;
        let item_type = ItemType::from_u64(read_u64(&mut pos)?)?;
        let item_count = read_u64(&mut pos)?;
        let mut items = Vec::with_capacity(item_count as usize);
        for _ in 0..item_count {
            let rev_plus_one = read_u64(&mut pos)?;
            let number = read_u64(&mut pos)?;
            items.push(ItemRef {
                revision: if rev_plus_one == 0 { None } else { Some(rev_plus_one - 1) },
                number,
            });
        }
        entries.push(P2lEntry { offset, size, item_type, items });
    }
    Ok(entries)
}

/// First offset behind the last recorded entry; 0 for an empty file.
///
/// # Errors
/// Same failure modes as [`read_p2l_proto`].
pub fn p2l_proto_next_offset(path: &Path) -> Result<u64> {
    if !path.exists() {
        return Ok(0);
    }
    let entries = read_p2l_proto(path)?;
    Ok(entries.last().map_or(0, |e| e.offset + e.size))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2p_proto_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("l2p.proto");
        let mut proto = ProtoL2p::open(&path).unwrap();
        proto.add_entry(0, 2).unwrap();
        proto.add_entry(17, 3).unwrap();
        proto.add_revision().unwrap();
        proto.add_entry(-1, 2).unwrap();
        drop(proto);

        let entries = read_l2p_proto(&path).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], ProtoL2pEntry { offset_plus_one: 1, item_index: 2 });
        assert_eq!(entries[2], ProtoL2pEntry { offset_plus_one: 0, item_index: 0 });
        assert_eq!(entries[3], ProtoL2pEntry { offset_plus_one: 0, item_index: 2 });
    }

    #[test]
    fn p2l_proto_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p2l.proto");
        let mut proto = ProtoP2l::open(&path).unwrap();
        let entry = P2lEntry {
            offset: 0,
            size: 21,
            item_type: ItemType::FileRep,
            items: vec![ItemRef { revision: None, number: 3 }],
        };
        proto.add_entry(&entry).unwrap();
        let second = P2lEntry {
            offset: 21,
            size: 40,
            item_type: ItemType::Changes,
            items: vec![ItemRef { revision: Some(4), number: 1 }],
        };
        proto.add_entry(&second).unwrap();
        drop(proto);

        let entries = read_p2l_proto(&path).unwrap();
        assert_eq!(entries, vec![entry, second]);
        assert_eq!(p2l_proto_next_offset(&path).unwrap(), 61);
    }

    #[test]
    fn missing_p2l_proto_has_offset_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(p2l_proto_next_offset(&dir.path().join("nope")).unwrap(), 0);
    }
}
