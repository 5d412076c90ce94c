//! Turning a transaction into the next revision: id rewriting, rep
//! finalisation, the changed-paths block, index finalisation, and the
//! atomic promotion dance that ends with the `current` update.

use crate::commit::deltify;
use crate::commit::fold::{self, is_child};
use crate::commit::rep_write::{self, RepsHash};
use crate::errors::{FsError, Result};
use crate::hashdump;
use crate::index::l2p::l2p_index_create;
use crate::index::p2l::{ItemRef, P2lEntry, p2l_index_create};
use crate::index::{ITEM_INDEX_CHANGES, ITEM_INDEX_ROOT_NODE, ItemType};
use crate::node::change::{self, ChangeKind, ChangeRecord};
use crate::node::dirent;
use crate::node::id::{NodeRevId, Revision, Token};
use crate::node::noderev::{NodeKind, NodeRevision};
use crate::node::rep::Representation;
use crate::repo::current;
use crate::repo::layout;
use crate::repo::lock::FileLock;
use crate::txn::store::{ProtoRevWrite, Transaction};
use std::collections::BTreeMap;
use std::io::Write;

/// Transaction properties that exist only to carry commit-time flags;
/// they are stripped before the props are promoted to revprops.
const TEMP_TXN_PROPS: &[&str] = &["svn:check-out-of-date", "svn:check-locks"];

/// Verifies that the committing identity may touch a path. Deletions and
/// replacements are checked recursively.
pub trait PathLockChecker {
    /// # Errors
    /// `PathLocked` when the path (or, with RECURSE, some descendant) is
    /// locked by someone else.
    fn allow(&self, path: &str, recurse: bool) -> Result<()>;
}

/// Injected commit hooks.
#[derive(Default)]
pub struct CommitOptions<'a> {
    /// Polled between node-revision writes and before long index work;
    /// returning `true` aborts the commit with `Cancelled`.
    pub cancel: Option<&'a dyn Fn() -> bool>,
    pub lock_checker: Option<&'a dyn PathLockChecker>,
}

impl CommitOptions<'_> {
    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_some_and(|cancel| cancel()) {
            return Err(FsError::Cancelled);
        }
        Ok(())
    }
}

/// Current UTC time in the revision-date format.
pub(crate) fn date_now() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

impl Transaction {
    /// Commit this transaction and return the new revision number.
    ///
    /// # Errors
    /// `TxnOutOfDate` when the base revision is no longer the youngest;
    /// see [`Transaction::commit_with`] for the rest.
    pub fn commit(&self) -> Result<Revision> {
        self.commit_with(&CommitOptions::default())
    }

    /// Commit with injected cancellation and path-lock hooks.
    ///
    /// The write order is proto-rev content, then both indexes, then the
    /// rename into the shard, then `current`; a crash at any step leaves
    /// the repository at the previous revision with at most an orphan
    /// transaction directory. Queued rep-cache rows are inserted after
    /// the write lock is released and never fail the commit.
    ///
    /// # Errors
    /// `TxnOutOfDate`, `RepBeingWritten`, `Cancelled`, `PathLocked`, and
    /// the usual I/O / corruption errors.
    pub fn commit_with(&self, options: &CommitOptions<'_>) -> Result<Revision> {
        self.ensure_open()?;
        let mut reps_to_cache: Vec<Representation> = Vec::new();

        let new_rev = {
            let repo = self.repository().clone();
            let _process_lock = repo.inner.write_mutex.lock();
            let _write_lock = FileLock::acquire(&repo.layout().write_lock_path())?;
            // No packing support: the minimum unpacked revision stays 0,
            // but it is refreshed whenever the write lock is taken.
            *repo.caches().min_unpacked.write() = 0;

            self.commit_body(options, &mut reps_to_cache)
                .map_err(|e| e.context(format!("committing transaction {}", self.id())))?
        };

        if self.repository().config().rep_sharing_allowed && !reps_to_cache.is_empty() {
            if let Err(e) = self.repository().inner.rep_cache.insert_many(&reps_to_cache) {
                log::warn!("rep-cache update after commit of r{new_rev} failed: {e}");
            }
        }
        log::info!("committed r{new_rev}");
        Ok(new_rev)
    }

    /// The commit proper, run with the write lock held.
    fn commit_body(
        &self,
        options: &CommitOptions<'_>,
        reps_to_cache: &mut Vec<Representation>,
    ) -> Result<Revision> {
        let repo = self.repository().clone();

        // Re-read the youngest revision now that we hold the lock.
        let youngest = repo.youngest_uncached()?;
        if self.base_rev() != youngest {
            return Err(FsError::TxnOutOfDate { base_rev: self.base_rev(), youngest });
        }
        let new_rev = youngest + 1;

        // Locks may have appeared since the changes were made; re-verify
        // every changed path.
        let folded = fold::fold_changes(&self.changes()?)?;
        verify_locks(&folded, options.lock_checker)?;
        options.check_cancel()?;

        let mut proto = self.open_proto_rev()?;
        proto.seek_end()?;

        // Walk the transaction tree depth-first, rewriting ids and
        // writing the remaining mutable reps and all node-revisions.
        let mut reps_hash = RepsHash::new();
        let root_id = self.root_id();
        self.write_final_rev(
            &mut proto,
            new_rev,
            &root_id,
            reps_to_cache,
            &mut reps_hash,
            true,
            options,
        )?;

        // The changed-paths block is the last item of the revision.
        let changes_offset = proto.seek_end()?;
        let records: Vec<ChangeRecord> = folded.into_values().collect();
        let changes_bytes = change::unparse_changes(&records);
        proto
            .file
            .write_all(&changes_bytes)
            .map_err(FsError::io("writing changed-paths block".to_string()))?;
        self.store_p2l_entry(&P2lEntry {
            offset: changes_offset,
            size: changes_bytes.len() as u64,
            item_type: ItemType::Changes,
            items: vec![ItemRef { revision: None, number: ITEM_INDEX_CHANGES }],
        })?;
        self.store_l2p_entry(changes_offset, ITEM_INDEX_CHANGES)?;
        proto
            .file
            .sync_data()
            .map_err(FsError::io("syncing proto-rev".to_string()))?;

        // Strip the ephemeral flag properties before promotion.
        let proplist = self.proplist()?;
        let strip: Vec<(&str, Option<&[u8]>)> = TEMP_TXN_PROPS
            .iter()
            .filter(|name| proplist.contains_key(**name))
            .map(|name| (*name, None))
            .collect();
        if !strip.is_empty() {
            self.change_props(&strip)?;
        }

        options.check_cancel()?;
        repo.layout().ensure_shard(new_rev)?;
        l2p_index_create(
            repo.config(),
            &repo.layout().l2p_index_path(new_rev),
            &self.proto_l2p_path(),
            new_rev,
        )
        .map_err(|e| e.context(format!("finalizing L2P index of r{new_rev}")))?;
        p2l_index_create(
            repo.config(),
            &repo.layout().p2l_index_path(new_rev),
            &self.proto_p2l_path(),
            new_rev,
        )
        .map_err(|e| e.context(format!("finalizing P2L index of r{new_rev}")))?;

        // Promote the proto-rev into its shard.
        let rev_path = repo.layout().rev_path(new_rev);
        std::fs::rename(self.dir().join("rev"), &rev_path)
            .map_err(FsError::io(format!("moving r{new_rev} into place")))?;
        layout::set_read_only(&rev_path)?;
        drop(proto);

        // Stamp the commit time, then promote the revprops.
        self.set_prop("svn:date", &date_now())?;
        std::fs::rename(self.props_path(), repo.layout().revprops_path(new_rev))
            .map_err(FsError::io(format!("moving revprops of r{new_rev} into place")))?;

        // Point 'current' at the new revision; the commit is now
        // globally visible and cannot be cancelled.
        current::write_current(repo.layout(), new_rev)?;
        *repo.caches().youngest.write() = Some(new_rev);

        repo.purge_txn(&self.name())?;
        Ok(new_rev)
    }

    /// Write one node-revision (recursing into directory children first),
    /// assigning its permanent id. Returns `None` for nodes that were
    /// never touched by this transaction.
    #[allow(clippy::too_many_arguments)]
    fn write_final_rev(
        &self,
        proto: &mut ProtoRevWrite,
        new_rev: Revision,
        id: &NodeRevId,
        reps_to_cache: &mut Vec<Representation>,
        reps_hash: &mut RepsHash,
        at_root: bool,
        options: &CommitOptions<'_>,
    ) -> Result<Option<NodeRevId>> {
        if !id.is_txn() {
            return Ok(None);
        }
        options.check_cancel()?;
        let repo = self.repository().clone();
        let mut noderev = repo.read_noderev(id)?;

        if noderev.kind == NodeKind::Dir {
            // Children first, so their permanent ids can be referenced.
            let mut entries = repo.dir_entries_of(&noderev)?;
            for entry in entries.values_mut() {
                if let Some(new_id) = self.write_final_rev(
                    proto,
                    new_rev,
                    &entry.id,
                    reps_to_cache,
                    reps_hash,
                    false,
                    options,
                )? {
                    entry.id = new_id;
                }
            }

            if noderev.text_rep.as_ref().is_some_and(Representation::is_mutable) {
                let dump = dirent::unparse_entries(&entries);
                let base = if repo.config().deltify_directories {
                    deltify::choose_delta_base(&repo, &noderev, false)?
                } else {
                    None
                };
                let mut rep =
                    rep_write::write_rep(self, proto, &dump, base, ItemType::DirRep, &mut None)?;
                if rep.is_mutable() {
                    rep.finalize(new_rev);
                }
                noderev.text_rep = Some(rep);
            }
        } else if let Some(rep) = noderev.text_rep.as_mut()
            && rep.is_mutable()
        {
            // File contents were already written into the proto-rev
            // during the transaction; only the marker moves.
            rep.finalize(new_rev);
        }

        if noderev.prop_rep.as_ref().is_some_and(Representation::is_mutable) {
            let props = crate::txn::store::txn_node_props(&repo, &noderev)?;
            let mut dump = Vec::new();
            hashdump::write_hash(&mut dump, &props);
            let base = if repo.config().deltify_properties {
                deltify::choose_delta_base(&repo, &noderev, true)?
            } else {
                None
            };
            let item_type = match noderev.kind {
                NodeKind::Dir => ItemType::DirProps,
                NodeKind::File => ItemType::FileProps,
            };
            let mut rep = rep_write::write_rep(
                self,
                proto,
                &dump,
                base,
                item_type,
                &mut Some(&mut *reps_hash),
            )?;
            if rep.is_mutable() {
                rep.finalize(new_rev);
            }
            noderev.prop_rep = Some(rep);
        }

        // Permanent identity: sentinels become the committing revision.
        let mut node_id = noderev.id.node_id;
        node_id.finalize(new_rev);
        let mut copy_id = noderev.id.copy_id;
        copy_id.finalize(new_rev);
        if noderev.copyroot_rev.is_none() {
            noderev.copyroot_rev = Some(new_rev);
        }

        let my_offset = proto.seek_end()?;
        let item = if at_root {
            self.store_l2p_entry(my_offset, ITEM_INDEX_ROOT_NODE)?;
            ITEM_INDEX_ROOT_NODE
        } else {
            self.allocate_item_index(my_offset)?
        };
        let new_id = NodeRevId {
            node_id,
            copy_id,
            token: Token::Revision { revision: new_rev, item },
        };
        noderev.id = new_id;

        if repo.config().rep_sharing_allowed {
            if let Some(rep) = &noderev.text_rep
                && noderev.kind == NodeKind::File
                && rep.revision == Some(new_rev)
            {
                reps_to_cache.push(*rep);
            }
            if let Some(rep) = &noderev.prop_rep
                && rep.revision == Some(new_rev)
            {
                reps_to_cache.push(*rep);
                if let Some(sha1) = rep.sha1 {
                    reps_hash.insert(sha1, *rep);
                }
            }
        }

        // SHA-1s of directory and property reps are not worth their disk
        // space in the noderev record.
        if noderev.kind == NodeKind::Dir
            && let Some(rep) = noderev.text_rep.as_mut()
        {
            rep.sha1 = None;
        }
        if let Some(rep) = noderev.prop_rep.as_mut() {
            rep.sha1 = None;
        }

        noderev.is_fresh_txn_root = false;
        if at_root {
            validate_root_noderev(self, &noderev, new_rev)?;
        }

        let bytes = noderev.unparse();
        proto
            .file
            .write_all(&bytes)
            .map_err(FsError::io("writing node-revision".to_string()))?;
        self.store_p2l_entry(&P2lEntry {
            offset: my_offset,
            size: bytes.len() as u64,
            item_type: ItemType::NodeRev,
            items: vec![ItemRef { revision: None, number: item }],
        })?;

        Ok(Some(new_id))
    }
}

/// Root noderev sanity check: its predecessor count must advance by
/// exactly one per revision.
fn validate_root_noderev(
    txn: &Transaction,
    root: &NodeRevision,
    new_rev: Revision,
) -> Result<()> {
    let head_root = txn.repository().rev_root(new_rev - 1)?;
    if root.predecessor_count != head_root.predecessor_count + 1 {
        return Err(FsError::Corrupt(format!(
            "predecessor count for the root node-revision is wrong: found ({} + 1 != {}), \
             committing r{new_rev}",
            head_root.predecessor_count, root.predecessor_count
        )));
    }
    Ok(())
}

/// Re-verify path locks over the folded change set. Modifications check
/// one path; everything else checks the whole subtree, and descendants
/// of an already-verified subtree are skipped.
fn verify_locks(
    folded: &BTreeMap<String, ChangeRecord>,
    checker: Option<&dyn PathLockChecker>,
) -> Result<()> {
    let Some(checker) = checker else {
        return Ok(());
    };
    let mut last_recursed: Option<&str> = None;
    for (path, chg) in folded {
        if let Some(last) = last_recursed
            && is_child(last, path)
        {
            continue;
        }
        let recurse = chg.kind != ChangeKind::Modify;
        checker.allow(path, recurse)?;
        if recurse {
            last_recursed = Some(path);
        }
    }
    Ok(())
}
