//! Phys-to-log index: `file offset → (revision, item, type, size)`.
//!
//! Same packed-number idiom as the L2P side:
//!
//! ```text
//! first_revision  page_size  page_count  file_size
//! <page_count x (page_bytes, entry_count, first_entry_offset)>
//! <page payloads>
//! ```
//!
//! Pages cover `page_size` bytes of revision-file offset space. An entry
//! is recorded in the page its offset falls into; entries are emitted in
//! offset order as `(size, type, item_count, items...)` with the offsets
//! implied by the tiling. Item revisions are zigzag deltas within the
//! entry; item numbers are plain.

use crate::config::FsConfig;
use crate::errors::{FsError, Result};
use crate::index::ItemType;
use crate::node::id::Revision;
use crate::packed::{self, PackedStream};
use crate::repo::caches::Caches;
use crate::repo::layout::{self, Layout};
use std::path::Path;
use std::sync::Arc;

/// One `(revision, number)` pair listed by a P2L entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemRef {
    pub revision: Option<Revision>,
    pub number: u64,
}

/// One entry of the phys-to-log mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2lEntry {
    pub offset: u64,
    pub size: u64,
    pub item_type: ItemType,
    pub items: Vec<ItemRef>,
}

/// Location of one page inside the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct P2lPageEntry {
    pub offset: u64,
    pub size: u64,
    pub entry_count: u64,
    /// Revision-file offset of the first entry recorded in this page.
    pub first_entry_offset: u64,
}

/// Deserialized header of one P2L index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2lHeader {
    pub first_revision: Revision,
    pub page_size: u64,
    pub file_size: u64,
    pub page_table: Vec<P2lPageEntry>,
}

/// Build the final P2L index for REVISION from the proto file, then mark
/// it read-only. Proto entries must tile `[0, file_size)` in order; items
/// without a revision are assigned REVISION.
///
/// # Errors
/// `Corrupt` when the proto entries leave gaps or overlap.
pub fn p2l_index_create(
    config: &FsConfig,
    final_path: &Path,
    proto_path: &Path,
    revision: Revision,
) -> Result<()> {
    let mut entries = super::proto::read_p2l_proto(proto_path)?;

    let mut expected_offset = 0u64;
    for entry in &mut entries {
        if entry.offset != expected_offset {
            return Err(FsError::Corrupt(format!(
                "proto-p2l entry at offset {} leaves a gap (expected {})",
                entry.offset, expected_offset
            )));
        }
        if entry.size == 0 {
            return Err(FsError::Corrupt(format!(
                "proto-p2l entry at offset {} has zero size",
                entry.offset
            )));
        }
        expected_offset = entry.offset + entry.size;
        for item in &mut entry.items {
            if item.revision.is_none() {
                item.revision = Some(revision);
            }
        }
    }
    let file_size = expected_offset;

    let page_size = config.p2l_page_size;
    let page_count = (file_size.div_ceil(page_size)).max(1);

    let mut page_sizes: Vec<u64> = vec![0; page_count as usize];
    let mut entry_counts: Vec<u64> = vec![0; page_count as usize];
    let mut first_offsets: Vec<u64> = vec![0; page_count as usize];
    let mut payload: Vec<u8> = Vec::new();

    for entry in &entries {
        let page = (entry.offset / page_size) as usize;
        if entry_counts[page] == 0 {
            first_offsets[page] = entry.offset;
        }
        let before = payload.len();
        packed::write_uint(&mut payload, entry.size);
        packed::write_uint(&mut payload, entry.item_type.as_u64());
        packed::write_uint(&mut payload, entry.items.len() as u64);
        let mut last_rev_plus_one = 0u64;
        for item in &entry.items {
            let rev_plus_one = item.revision.map_or(0, |r| r + 1);
            packed::write_int(&mut payload, rev_plus_one.wrapping_sub(last_rev_plus_one) as i64);
            last_rev_plus_one = rev_plus_one;
            packed::write_uint(&mut payload, item.number);
        }
        page_sizes[page] += (payload.len() - before) as u64;
        entry_counts[page] += 1;
    }

    let mut out = Vec::new();
    packed::write_uint(&mut out, revision);
    packed::write_uint(&mut out, page_size);
    packed::write_uint(&mut out, page_count);
    packed::write_uint(&mut out, file_size);
    for i in 0..page_count as usize {
        packed::write_uint(&mut out, page_sizes[i]);
        packed::write_uint(&mut out, entry_counts[i]);
        packed::write_uint(&mut out, first_offsets[i]);
    }
    out.extend_from_slice(&payload);

    layout::write_file_atomic(final_path, &out)?;
    layout::set_read_only(final_path)
}

fn load_header(stream: &mut PackedStream) -> Result<P2lHeader> {
    stream.seek(0);
    let first_revision = stream.get()?;
    let page_size = stream.get()?;
    let page_count = stream.get()?;
    let file_size = stream.get()?;
    if page_size == 0 {
        return Err(FsError::IndexCorruption("P2L header: zero page size".into()));
    }
    if page_count != file_size.div_ceil(page_size).max(1) {
        return Err(FsError::IndexCorruption(format!(
            "P2L header: {page_count} pages cannot cover {file_size} bytes"
        )));
    }

    let mut page_table = Vec::with_capacity(page_count as usize);
    for _ in 0..page_count {
        let size = stream.get()?;
        let entry_count = stream.get()?;
        let first_entry_offset = stream.get()?;
        page_table.push(P2lPageEntry { offset: 0, size, entry_count, first_entry_offset });
    }
    let mut offset = stream.offset();
    for entry in &mut page_table {
        entry.offset = offset;
        offset += entry.size;
    }

    Ok(P2lHeader { first_revision, page_size, file_size, page_table })
}

/// Fetch (and cache) the P2L header covering REVISION.
///
/// # Errors
/// Index corruption or I/O errors.
pub fn p2l_header(
    layout: &Layout,
    config: &FsConfig,
    caches: &Caches,
    revision: Revision,
) -> Result<Arc<P2lHeader>> {
    let key = (revision, false);
    if let Some(header) = caches.p2l_headers.get(&key) {
        return Ok(header);
    }
    let path = layout.p2l_index_path(revision);
    let mut stream = PackedStream::open(&path, config.block_size)?;
    let header = Arc::new(load_header(&mut stream)?);
    caches.p2l_headers.put(key, header.clone());
    Ok(header)
}

fn load_page(
    stream: &mut PackedStream,
    table_entry: &P2lPageEntry,
) -> Result<Vec<P2lEntry>> {
    stream.seek(table_entry.offset);
    let mut entries = Vec::with_capacity(table_entry.entry_count as usize);
    let mut offset = table_entry.first_entry_offset;
    for _ in 0..table_entry.entry_count {
        let size = stream.get()?;
        let item_type = ItemType::from_u64(stream.get()?)?;
        let item_count = stream.get()?;
        let mut items = Vec::with_capacity(item_count as usize);
        let mut last_rev_plus_one = 0u64;
        for _ in 0..item_count {
            let delta = packed::unzigzag(stream.get()?);
            last_rev_plus_one = last_rev_plus_one.wrapping_add(delta as u64);
            let number = stream.get()?;
            items.push(ItemRef {
                revision: if last_rev_plus_one == 0 { None } else { Some(last_rev_plus_one - 1) },
                number,
            });
        }
        let entry = P2lEntry { offset, size, item_type, items };
        offset += entry.size;
        entries.push(entry);
    }
    Ok(entries)
}

fn page(
    layout: &Layout,
    config: &FsConfig,
    caches: &Caches,
    header: &P2lHeader,
    revision: Revision,
    page_no: u64,
) -> Result<Arc<Vec<P2lEntry>>> {
    let key = (revision, false, page_no);
    if let Some(page) = caches.p2l_pages.get(&key) {
        return Ok(page);
    }
    let path = layout.p2l_index_path(revision);
    let mut stream = PackedStream::open(&path, config.block_size)?;
    let entries = Arc::new(load_page(&mut stream, &header.page_table[page_no as usize])?);
    caches.p2l_pages.put(key, entries.clone());
    Ok(entries)
}

/// Return the entry containing OFFSET in REVISION's file, or `None` when
/// OFFSET lies beyond the indexed range.
///
/// # Errors
/// Index corruption or I/O errors.
pub fn p2l_entry_lookup(
    layout: &Layout,
    config: &FsConfig,
    caches: &Caches,
    revision: Revision,
    offset: u64,
) -> Result<Option<P2lEntry>> {
    let header = p2l_header(layout, config, caches, revision)?;
    if offset >= header.file_size {
        return Ok(None);
    }

    // The containing entry starts in this page or, when the page records
    // no entry starts at all, in an earlier one.
    let mut page_no = offset / header.page_size;
    loop {
        let table_entry = &header.page_table[page_no as usize];
        if table_entry.entry_count > 0 && table_entry.first_entry_offset <= offset {
            break;
        }
        page_no = page_no
            .checked_sub(1)
            .ok_or_else(|| FsError::IndexCorruption("P2L: offset 0 not covered".into()))?;
    }

    let entries = page(layout, config, caches, &header, revision, page_no)?;
    let found = entries
        .iter()
        .take_while(|e| e.offset <= offset)
        .last()
        .filter(|e| offset < e.offset + e.size)
        .cloned();
    match found {
        Some(entry) => Ok(Some(entry)),
        None => Err(FsError::IndexCorruption(format!(
            "P2L: no entry covers offset {offset} of r{revision}"
        ))),
    }
}

/// All entries of REVISION in offset order.
///
/// # Errors
/// Index corruption or I/O errors.
pub fn p2l_entries(
    layout: &Layout,
    config: &FsConfig,
    caches: &Caches,
    revision: Revision,
) -> Result<Vec<P2lEntry>> {
    let header = p2l_header(layout, config, caches, revision)?;
    let mut all = Vec::new();
    for page_no in 0..header.page_table.len() as u64 {
        if header.page_table[page_no as usize].entry_count == 0 {
            continue;
        }
        all.extend(page(layout, config, caches, &header, revision, page_no)?.iter().cloned());
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::proto::ProtoP2l;

    fn sample_entries(revision: Revision) -> Vec<P2lEntry> {
        vec![
            P2lEntry {
                offset: 0,
                size: 21,
                item_type: ItemType::FileRep,
                items: vec![ItemRef { revision: Some(revision), number: 3 }],
            },
            P2lEntry {
                offset: 21,
                size: 100,
                item_type: ItemType::NodeRev,
                items: vec![ItemRef { revision: Some(revision), number: 2 }],
            },
            P2lEntry {
                offset: 121,
                size: 9,
                item_type: ItemType::Changes,
                items: vec![ItemRef { revision: Some(revision), number: 1 }],
            },
        ]
    }

    fn build(dir: &Path, revision: Revision) -> (Layout, FsConfig, Caches) {
        let config = FsConfig::default();
        let layout = Layout::new(dir.to_path_buf(), config.max_files_per_dir);
        std::fs::create_dir_all(layout.rev_shard_dir(revision)).unwrap();

        let proto_path = dir.join("p2l.proto");
        let mut proto = ProtoP2l::open(&proto_path).unwrap();
        for mut entry in sample_entries(revision) {
            // The writer records txn-local items without a revision.
            for item in &mut entry.items {
                item.revision = None;
            }
            proto.add_entry(&entry).unwrap();
        }
        drop(proto);

        p2l_index_create(&config, &layout.p2l_index_path(revision), &proto_path, revision)
            .unwrap();
        (layout, config, Caches::new())
    }

    #[test]
    fn lookup_finds_the_containing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, config, caches) = build(dir.path(), 4);

        let entry = p2l_entry_lookup(&layout, &config, &caches, 4, 0).unwrap().unwrap();
        assert_eq!(entry.item_type, ItemType::FileRep);
        // An offset in the middle of an entry resolves to that entry.
        let entry = p2l_entry_lookup(&layout, &config, &caches, 4, 70).unwrap().unwrap();
        assert_eq!(entry.offset, 21);
        assert_eq!(entry.items[0].revision, Some(4));
        // Past the end of the indexed range.
        assert!(p2l_entry_lookup(&layout, &config, &caches, 4, 130).unwrap().is_none());
    }

    #[test]
    fn entries_tile_without_gaps() {
        let dir = tempfile::tempdir().unwrap();
        let (layout, config, caches) = build(dir.path(), 4);
        let entries = p2l_entries(&layout, &config, &caches, 4).unwrap();
        assert_eq!(entries, sample_entries(4));
        let mut expected = 0;
        for entry in &entries {
            assert_eq!(entry.offset, expected);
            expected += entry.size;
        }
    }

    #[test]
    fn gap_in_proto_entries_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = FsConfig::default();
        let proto_path = dir.path().join("p2l.proto");
        let mut proto = ProtoP2l::open(&proto_path).unwrap();
        proto
            .add_entry(&P2lEntry {
                offset: 10,
                size: 4,
                item_type: ItemType::NodeRev,
                items: vec![],
            })
            .unwrap();
        drop(proto);
        let out = dir.path().join("out.p2l-index");
        assert!(matches!(
            p2l_index_create(&config, &out, &proto_path, 1),
            Err(FsError::Corrupt(_))
        ));
    }
}
