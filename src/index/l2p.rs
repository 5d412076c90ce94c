//! Log-to-phys index: `(revision, item_index) → file offset`.
//!
//! The final file is one packed-number stream:
//!
//! ```text
//! first_revision  page_size  revision_count  page_count
//! <revision_count x pages-per-revision>
//! <page_count x (page_bytes, entry_count)>
//! <page payloads>
//! ```
//!
//! Each page payload is a zigzag-delta stream of `offset + 1` values
//! (0 encodes the "unused" offset -1), indexed by `item_index % page_size`.

use crate::config::FsConfig;
use crate::errors::{FsError, Result};
use crate::node::id::Revision;
use crate::packed::{self, PackedStream};
use crate::repo::caches::Caches;
use crate::repo::layout::{self, Layout};
use std::path::Path;
use std::sync::Arc;

/// Opportunistic page prefetch stays within this many bytes of the page
/// that triggered the load.
const PREFETCH_WINDOW: u64 = 0x10000;

/// Location of one page inside the index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTableEntry {
    pub offset: u64,
    pub size: u64,
    pub entry_count: u64,
}

/// Deserialized header of one L2P index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L2pHeader {
    pub first_revision: Revision,
    pub revision_count: u64,
    pub page_size: u64,
    pub page_table: Vec<PageTableEntry>,
    /// `page_table_index[r]..page_table_index[r+1]` is the page-table
    /// slice owned by the r-th covered revision.
    pub page_table_index: Vec<usize>,
}

/// Build the final L2P index for REVISION from the proto file, then mark
/// it read-only.
///
/// # Errors
/// `Corrupt` on torn proto records, I/O errors otherwise.
pub fn l2p_index_create(
    config: &FsConfig,
    final_path: &Path,
    proto_path: &Path,
    revision: Revision,
) -> Result<()> {
    let records = super::proto::read_l2p_proto(proto_path)?;
    let page_size = config.l2p_page_size;

    let mut entries: Vec<u64> = Vec::new();
    let mut page_counts: Vec<u64> = Vec::new();
    let mut page_sizes: Vec<u64> = Vec::new();
    let mut entry_counts: Vec<u64> = Vec::new();
    let mut payload: Vec<u8> = Vec::new();
    let mut last_page_count = 0usize;

    let mut flush =
        |entries: &mut Vec<u64>, last_page_count: &mut usize| {
            for chunk in entries.chunks(page_size as usize) {
                let before = payload.len();
                let mut last_value: u64 = 0;
                for &value in chunk {
                    let diff = value.wrapping_sub(last_value) as i64;
                    last_value = value;
                    packed::write_int(&mut payload, diff);
                }
                page_sizes.push((payload.len() - before) as u64);
                entry_counts.push(chunk.len() as u64);
            }
            page_counts.push((page_sizes.len() - *last_page_count) as u64);
            *last_page_count = page_sizes.len();
            entries.clear();
        };

    for (i, record) in records.iter().enumerate() {
        if i > 0 && record.offset_plus_one == 0 {
            flush(&mut entries, &mut last_page_count);
        } else {
            let idx = record.item_index as usize;
            if entries.len() <= idx {
                entries.resize(idx + 1, 0);
            }
            entries[idx] = record.offset_plus_one;
        }
    }
    flush(&mut entries, &mut last_page_count);

    let mut out = Vec::new();
    packed::write_uint(&mut out, revision);
    packed::write_uint(&mut out, page_size);
    packed::write_uint(&mut out, page_counts.len() as u64);
    packed::write_uint(&mut out, page_sizes.len() as u64);
    for &count in &page_counts {
        packed::write_uint(&mut out, count);
    }
    for (&size, &count) in page_sizes.iter().zip(&entry_counts) {
        packed::write_uint(&mut out, size);
        packed::write_uint(&mut out, count);
    }
    out.extend_from_slice(&payload);

    layout::write_file_atomic(final_path, &out)?;
    layout::set_read_only(final_path)
}

/// Read and deserialize the header of REVISION's index file.
fn load_header(stream: &mut PackedStream) -> Result<L2pHeader> {
    stream.seek(0);
    let first_revision = stream.get()?;
    let page_size = stream.get()?;
    let revision_count = stream.get()?;
    let page_count = stream.get()?;
    if page_size == 0 {
        return Err(FsError::IndexCorruption("L2P header: zero page size".into()));
    }

    let mut page_table_index = Vec::with_capacity(revision_count as usize + 1);
    page_table_index.push(0usize);
    let mut total = 0usize;
    for _ in 0..revision_count {
        total += stream.get()? as usize;
        page_table_index.push(total);
    }
    if total != page_count as usize {
        return Err(FsError::IndexCorruption(format!(
            "L2P header: revision table covers {total} pages, header says {page_count}"
        )));
    }

    let mut page_table = Vec::with_capacity(page_count as usize);
    for _ in 0..page_count {
        let size = stream.get()?;
        let entry_count = stream.get()?;
        page_table.push(PageTableEntry { offset: 0, size, entry_count });
    }
    let mut offset = stream.offset();
    for entry in &mut page_table {
        entry.offset = offset;
        offset += entry.size;
    }

    Ok(L2pHeader { first_revision, revision_count, page_size, page_table, page_table_index })
}

/// Fetch (and cache) the header covering REVISION.
///
/// # Errors
/// Index corruption or I/O errors.
pub fn l2p_header(
    layout: &Layout,
    config: &FsConfig,
    caches: &Caches,
    revision: Revision,
) -> Result<Arc<L2pHeader>> {
    let key = (base_revision(revision), false);
    if let Some(header) = caches.l2p_headers.get(&key) {
        return Ok(header);
    }
    let path = layout.l2p_index_path(revision);
    let mut stream = PackedStream::open(&path, config.block_size)?;
    let header = Arc::new(load_header(&mut stream)?);
    caches.l2p_headers.put(key, header.clone());
    Ok(header)
}

/// Page selection for one `(revision, item_index)` pair.
struct PageInfo {
    entry: PageTableEntry,
    page_no: u64,
    /// Index into the decoded page; past the end when the item index lies
    /// beyond the revision's pages.
    page_offset: u64,
}

fn page_info(header: &L2pHeader, revision: Revision, item_index: u64) -> Result<PageInfo> {
    let rel = revision
        .checked_sub(header.first_revision)
        .filter(|rel| *rel < header.revision_count)
        .ok_or(FsError::ItemIndexRevision { revision })? as usize;

    let first = header.page_table_index[rel];
    let last = header.page_table_index[rel + 1];
    if first == last {
        return Err(FsError::ItemIndexOverflow { revision, item_index });
    }

    let page_no = item_index / header.page_size;
    let page_offset = item_index % header.page_size;
    if (last - first) as u64 > page_no {
        Ok(PageInfo { entry: header.page_table[first + page_no as usize], page_no, page_offset })
    } else {
        // Past the revision's last page; flag an overflow downstream.
        Ok(PageInfo {
            entry: header.page_table[last - 1],
            page_no,
            page_offset: header.page_size + 1,
        })
    }
}

/// Decode one page: a zigzag-delta stream of `offset + 1` values.
fn load_page(stream: &mut PackedStream, entry: &PageTableEntry) -> Result<Vec<u64>> {
    stream.seek(entry.offset);
    let mut offsets = Vec::with_capacity(entry.entry_count as usize);
    let mut last_value: u64 = 0;
    for _ in 0..entry.entry_count {
        let value = stream.get()?;
        last_value = last_value.wrapping_add(packed::unzigzag(value) as u64);
        offsets.push(last_value);
    }
    Ok(offsets)
}

/// After a page miss, opportunistically pull nearby pages of this and
/// neighbouring revisions into the cache. Stops as soon as an already
/// cached page shows up (the working set is hot).
fn prefetch_pages(
    header: &L2pHeader,
    stream: &mut PackedStream,
    caches: &Caches,
    target_rev: Revision,
    target_page: u64,
    window_center: &PageTableEntry,
) {
    let min = window_center.offset.saturating_sub(PREFETCH_WINDOW);
    let max = window_center.offset + window_center.size + PREFETCH_WINDOW;

    for rel in 0..header.revision_count as usize {
        let revision = header.first_revision + rel as u64;
        let first = header.page_table_index[rel];
        let last = header.page_table_index[rel + 1];
        for (page_no, entry) in header.page_table[first..last].iter().enumerate() {
            let page_no = page_no as u64;
            if revision == target_rev && page_no == target_page {
                continue;
            }
            if entry.offset < min || entry.offset + entry.size > max {
                continue;
            }
            let key = (revision, false, page_no);
            if caches.l2p_pages.contains(&key) {
                return;
            }
            match load_page(stream, entry) {
                Ok(page) => caches.l2p_pages.put(key, Arc::new(page)),
                Err(_) => return,
            }
        }
    }
}

/// Resolve `(revision, item_index)` to the item's offset in the revision
/// file.
///
/// # Errors
/// `ItemIndexRevision` when the index does not cover REVISION,
/// `ItemIndexOverflow` when the entry is absent, corruption/I-O otherwise.
pub fn l2p_lookup(
    layout: &Layout,
    config: &FsConfig,
    caches: &Caches,
    revision: Revision,
    item_index: u64,
) -> Result<u64> {
    let header_key = (base_revision(revision), false);

    // Partial get: only the page-table slot is extracted from a cached
    // header; the header itself is deserialized at most once.
    let info = match caches
        .l2p_headers
        .with(&header_key, |header| page_info(header, revision, item_index))
    {
        Some(info) => info?,
        None => {
            let header = l2p_header(layout, config, caches, revision)?;
            page_info(&header, revision, item_index)?
        }
    };

    let page_key = (revision, false, info.page_no);
    let page = match caches.l2p_pages.get(&page_key) {
        Some(page) => page,
        None => {
            let path = layout.l2p_index_path(revision);
            let mut stream = PackedStream::open(&path, config.block_size)?;
            let page = Arc::new(load_page(&mut stream, &info.entry)?);
            caches.l2p_pages.put(page_key, page.clone());
            let header = l2p_header(layout, config, caches, revision)?;
            prefetch_pages(&header, &mut stream, caches, revision, info.page_no, &info.entry);
            page
        }
    };

    let stored = page
        .get(info.page_offset as usize)
        .copied()
        .ok_or(FsError::ItemIndexOverflow { revision, item_index })?;
    if stored == 0 {
        return Err(FsError::ItemIndexOverflow { revision, item_index });
    }
    Ok(stored - 1)
}

/// The revision identifying the index file that covers REVISION. Packed
/// shards would floor this to the shard start; this build never packs.
fn base_revision(revision: Revision) -> Revision {
    revision
}
