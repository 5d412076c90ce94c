//! Index verification: checks that the P2L entries of a revision tile its
//! file exactly and that every recorded item resolves to the same offset
//! through the L2P side.

use crate::errors::{FsError, Result};
use crate::index::l2p::l2p_lookup;
use crate::index::p2l::{p2l_entries, p2l_header};
use crate::index::{ITEM_INDEX_CHANGES, ITEM_INDEX_ROOT_NODE, ItemType};
use crate::node::id::Revision;
use crate::repo::Repository;

impl Repository {
    /// Verify the indexes of every committed revision, then the rep
    /// cache.
    ///
    /// # Errors
    /// `IndexCorruption` on the first violation found.
    pub fn verify(&self) -> Result<()> {
        for revision in 0..=self.youngest()? {
            self.verify_revision(revision)?;
        }
        self.verify_rep_cache()
    }

    /// Check that every rep-cache row points at a rep whose expanded
    /// bytes hash back to the recorded SHA-1.
    ///
    /// # Errors
    /// `Corrupt` on a mismatch.
    pub fn verify_rep_cache(&self) -> Result<()> {
        for rep in self.inner.rep_cache.entries()? {
            let content = self.rep_content(&rep)?;
            if Some(crate::repo::sha1_of(&content)) != rep.sha1 {
                return Err(FsError::Corrupt(format!(
                    "rep cache: r{}/{} does not hash to its recorded SHA-1",
                    rep.revision.unwrap_or(0),
                    rep.item_index
                )));
            }
        }
        Ok(())
    }

    /// Verify one revision's indexes against its revision file.
    ///
    /// # Errors
    /// `IndexCorruption` describing the offending offset.
    pub fn verify_revision(&self, revision: Revision) -> Result<()> {
        let rev_path = self.layout().rev_path(revision);
        let file_size = std::fs::metadata(&rev_path)
            .map_err(FsError::io(format!("reading metadata of '{}'", rev_path.display())))?
            .len();

        let header = p2l_header(self.layout(), self.config(), self.caches(), revision)?;
        if header.file_size != file_size {
            return Err(FsError::IndexCorruption(format!(
                "r{revision}: P2L covers {} bytes but the revision file has {}",
                header.file_size, file_size
            )));
        }

        let entries = p2l_entries(self.layout(), self.config(), self.caches(), revision)?;
        let mut expected_offset = 0u64;
        for entry in &entries {
            if entry.offset != expected_offset {
                return Err(FsError::IndexCorruption(format!(
                    "r{revision}: P2L entry at offset {} breaks the tiling (expected {})",
                    entry.offset, expected_offset
                )));
            }
            if entry.size == 0 || entry.offset + entry.size > file_size {
                return Err(FsError::IndexCorruption(format!(
                    "r{revision}: P2L entry at offset {} has invalid size {}",
                    entry.offset, entry.size
                )));
            }
            if entry.item_type == ItemType::Unused {
                return Err(FsError::IndexCorruption(format!(
                    "r{revision}: unused P2L entry covers data at offset {}",
                    entry.offset
                )));
            }
            expected_offset = entry.offset + entry.size;

            for item in &entry.items {
                let item_rev = item.revision.ok_or_else(|| {
                    FsError::IndexCorruption(format!(
                        "r{revision}: P2L item at offset {} lacks a revision",
                        entry.offset
                    ))
                })?;
                let resolved = l2p_lookup(
                    self.layout(),
                    self.config(),
                    self.caches(),
                    item_rev,
                    item.number,
                )
                .map_err(|e| {
                    e.context(format!(
                        "r{revision}: item ({item_rev}, {}) listed at offset {} does not \
                         resolve",
                        item.number, entry.offset
                    ))
                })?;
                if resolved != entry.offset {
                    return Err(FsError::IndexCorruption(format!(
                        "r{revision}: L2P maps item ({item_rev}, {}) to {} but P2L lists it \
                         at {}",
                        item.number, resolved, entry.offset
                    )));
                }
            }
        }
        if expected_offset != file_size {
            return Err(FsError::IndexCorruption(format!(
                "r{revision}: P2L tiling ends at {expected_offset} of {file_size} bytes"
            )));
        }

        // The two reserved items must always resolve.
        for item in [ITEM_INDEX_ROOT_NODE, ITEM_INDEX_CHANGES] {
            l2p_lookup(self.layout(), self.config(), self.caches(), revision, item).map_err(
                |e| e.context(format!("r{revision}: reserved item {item} does not resolve")),
            )?;
        }
        Ok(())
    }
}
