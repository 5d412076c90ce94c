//! Transaction directory management: creation under the `txn-current`
//! lock, the per-transaction counters, node-revision storage and the
//! proto-rev writer lock.

use crate::errors::{FsError, Result};
use crate::hashdump::{self, HashMapDump};
use crate::index::proto::{ProtoL2p, ProtoP2l};
use crate::index::{ITEM_INDEX_FIRST_USER, p2l::P2lEntry};
use crate::node::dirent::Entries;
use crate::node::id::{self, NodeRevId, Revision, Token, TxnId};
use crate::node::noderev::NodeRevision;
use crate::repo::layout;
use crate::repo::lock::FileLock;
use crate::repo::Repository;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::PathBuf;

impl Repository {
    /// Begin a transaction based on the current youngest revision.
    ///
    /// # Errors
    /// I/O and corruption errors.
    pub fn begin_txn(&self) -> Result<Transaction> {
        let base_rev = self.youngest()?;
        self.begin_txn_at(base_rev)
    }

    /// Begin a transaction based on BASE_REV (which may be older than the
    /// youngest revision; the commit will then fail out-of-date).
    ///
    /// # Errors
    /// I/O and corruption errors.
    pub fn begin_txn_at(&self, base_rev: Revision) -> Result<Transaction> {
        let txn_id = self.allocate_txn_id(base_rev)?;
        let dir = self.layout().txn_dir(txn_id);
        std::fs::create_dir(&dir)
            .map_err(FsError::io(format!("creating '{}'", dir.display())))?;

        // Clone the base root as this transaction's root node-revision.
        let base_root = self.rev_root(base_rev)?;
        let mut root = base_root.clone();
        root.predecessor = Some(base_root.id);
        root.predecessor_count = base_root.predecessor_count + 1;
        root.copyfrom = None;
        root.is_fresh_txn_root = true;
        root.id = NodeRevId {
            node_id: base_root.id.node_id,
            copy_id: base_root.id.copy_id,
            token: Token::Txn(txn_id),
        };
        write_txn_noderev_in(&dir, &root)?;

        std::fs::write(dir.join("next-ids"), b"0 0\n")
            .map_err(FsError::io("creating 'next-ids'".to_string()))?;
        std::fs::write(dir.join("changes"), b"")
            .map_err(FsError::io("creating 'changes'".to_string()))?;
        std::fs::write(dir.join("item-index"), format!("{}\n", id::to_base36(ITEM_INDEX_FIRST_USER)))
            .map_err(FsError::io("creating 'item-index'".to_string()))?;
        std::fs::write(dir.join("rev"), b"")
            .map_err(FsError::io("creating 'rev'".to_string()))?;
        std::fs::write(dir.join("rev-lock"), b"")
            .map_err(FsError::io("creating 'rev-lock'".to_string()))?;

        let txn = Transaction { repo: self.clone(), id: txn_id };
        txn.write_initial_props()?;
        log::info!("created transaction {txn_id} based on r{base_rev}");
        Ok(txn)
    }

    /// Draw the next transaction sequence number from `txn-current`,
    /// holding its dedicated lock across the read-modify-write.
    fn allocate_txn_id(&self, base_rev: Revision) -> Result<TxnId> {
        let _lock = FileLock::acquire(&self.layout().txn_current_lock_path())?;
        let path = self.layout().txn_current_path();
        let text = std::fs::read_to_string(&path)
            .map_err(FsError::io(format!("reading '{}'", path.display())))?;
        let seq = id::from_base36(text.trim_end_matches('\n'))?;
        layout::write_file_atomic(&path, format!("{}\n", id::to_base36(seq + 1)).as_bytes())?;
        Ok(TxnId { base_rev, seq })
    }

    /// Re-attach to an existing transaction by name.
    ///
    /// # Errors
    /// `NoSuchTransaction` when the directory is gone.
    pub fn open_txn(&self, name: &str) -> Result<Transaction> {
        let txn_id =
            TxnId::parse(name).map_err(|_| FsError::NoSuchTransaction(name.to_string()))?;
        if !self.layout().txn_dir(txn_id).is_dir() {
            return Err(FsError::NoSuchTransaction(name.to_string()));
        }
        Ok(Transaction { repo: self.clone(), id: txn_id })
    }

    /// Names of all open transactions.
    ///
    /// # Errors
    /// I/O errors listing the `txns` directory.
    pub fn list_transactions(&self) -> Result<Vec<String>> {
        let dir = self.layout().txns_dir();
        let mut names = Vec::new();
        let entries = std::fs::read_dir(&dir)
            .map_err(FsError::io(format!("listing '{}'", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(FsError::io("listing transactions".to_string()))?;
            let file_name = entry.file_name();
            if let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".txn")) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a transaction directory and its cached state.
    ///
    /// # Errors
    /// `NoSuchTransaction` when it does not exist.
    pub fn purge_txn(&self, name: &str) -> Result<()> {
        let txn_id =
            TxnId::parse(name).map_err(|_| FsError::NoSuchTransaction(name.to_string()))?;
        let dir = self.layout().txn_dir(txn_id);
        if !dir.is_dir() {
            return Err(FsError::NoSuchTransaction(name.to_string()));
        }
        std::fs::remove_dir_all(&dir)
            .map_err(FsError::io(format!("removing '{}'", dir.display())))?;
        self.caches().forget_txn(&format!("t{txn_id}."));
        Ok(())
    }
}

/// An open write transaction.
pub struct Transaction {
    pub(crate) repo: Repository,
    pub(crate) id: TxnId,
}

impl Transaction {
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.id.to_string()
    }

    #[must_use]
    pub fn base_rev(&self) -> Revision {
        self.id.base_rev
    }

    #[must_use]
    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    /// The transaction root's node-revision id.
    #[must_use]
    pub fn root_id(&self) -> NodeRevId {
        // The root node keeps its node/copy line across all revisions.
        NodeRevId {
            node_id: crate::node::id::IdPart::committed(0, 0),
            copy_id: crate::node::id::IdPart::committed(0, 0),
            token: Token::Txn(self.id),
        }
    }

    pub(crate) fn dir(&self) -> PathBuf {
        self.repo.layout().txn_dir(self.id)
    }

    /// Abort: remove the transaction directory; committed data is never
    /// touched.
    ///
    /// # Errors
    /// `NoSuchTransaction` when already purged.
    pub fn abort(self) -> Result<()> {
        log::info!("aborting transaction {}", self.id);
        self.repo.purge_txn(&self.name())
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.dir().is_dir() {
            Ok(())
        } else {
            Err(FsError::NoSuchTransaction(self.name()))
        }
    }

    /// Proto-L2P and proto-P2L index writers for this transaction.
    pub(crate) fn proto_l2p(&self) -> Result<ProtoL2p> {
        ProtoL2p::open(&self.dir().join("index.l2p"))
    }

    pub(crate) fn proto_p2l(&self) -> Result<ProtoP2l> {
        ProtoP2l::open(&self.dir().join("index.p2l"))
    }

    pub(crate) fn proto_l2p_path(&self) -> PathBuf {
        self.dir().join("index.l2p")
    }

    pub(crate) fn proto_p2l_path(&self) -> PathBuf {
        self.dir().join("index.p2l")
    }

    pub(crate) fn store_p2l_entry(&self, entry: &P2lEntry) -> Result<()> {
        self.proto_p2l()?.add_entry(entry)
    }

    /// Allocate the next item index and record its offset in the proto
    /// L2P index.
    ///
    /// # Errors
    /// I/O and corruption errors.
    pub(crate) fn allocate_item_index(&self, offset: u64) -> Result<u64> {
        let path = self.dir().join("item-index");
        let text = std::fs::read_to_string(&path)
            .map_err(FsError::io("reading 'item-index'".to_string()))?;
        let item_index = id::from_base36(text.trim_end_matches('\n'))?;
        layout::write_file_atomic(
            &path,
            format!("{}\n", id::to_base36(item_index + 1)).as_bytes(),
        )?;
        self.proto_l2p()?.add_entry(offset as i64, item_index)?;
        Ok(item_index)
    }

    /// Record an L2P mapping for a reserved item index (the root node).
    pub(crate) fn store_l2p_entry(&self, offset: u64, item_index: u64) -> Result<()> {
        self.proto_l2p()?.add_entry(offset as i64, item_index)
    }

    fn read_next_ids(&self) -> Result<(u64, u64)> {
        let path = self.dir().join("next-ids");
        let text = std::fs::read_to_string(&path)
            .map_err(FsError::io("reading 'next-ids'".to_string()))?;
        let body = text.strip_suffix('\n').unwrap_or(&text);
        let (node, copy) = body
            .split_once(' ')
            .ok_or_else(|| FsError::Corrupt("next-ids file corrupt".into()))?;
        Ok((id::from_base36(node)?, id::from_base36(copy)?))
    }

    fn write_next_ids(&self, node_id: u64, copy_id: u64) -> Result<()> {
        let text = format!("{} {}\n", id::to_base36(node_id), id::to_base36(copy_id));
        std::fs::write(self.dir().join("next-ids"), text)
            .map_err(FsError::io("writing 'next-ids'".to_string()))
    }

    /// Draw a node number unique within this transaction. Also used to
    /// uniquify freshly written representations.
    pub(crate) fn new_node_number(&self) -> Result<u64> {
        let (node_id, copy_id) = self.read_next_ids()?;
        self.write_next_ids(node_id + 1, copy_id)?;
        Ok(node_id)
    }

    /// Reserve a copy number unique within this transaction.
    pub(crate) fn reserve_copy_number(&self) -> Result<u64> {
        let (node_id, copy_id) = self.read_next_ids()?;
        self.write_next_ids(node_id, copy_id + 1)?;
        Ok(copy_id)
    }

    /// Path of the stored node-revision record for ID.
    pub(crate) fn noderev_path(&self, id: &NodeRevId) -> PathBuf {
        self.dir().join(noderev_file_name(id))
    }

    pub(crate) fn children_path(&self, id: &NodeRevId) -> PathBuf {
        self.dir().join(format!("{}.children", noderev_file_name(id)))
    }

    pub(crate) fn node_props_path(&self, id: &NodeRevId) -> PathBuf {
        self.dir().join(format!("{}.props", noderev_file_name(id)))
    }

    pub(crate) fn write_noderev(&self, noderev: &NodeRevision) -> Result<()> {
        write_txn_noderev_in(&self.dir(), noderev)
    }

    /// Open the proto-rev file for writing, holding both the in-process
    /// `being_written` flag and the OS advisory lock on `rev-lock`.
    ///
    /// # Errors
    /// `RepBeingWritten` when any other writer holds either lock.
    pub(crate) fn open_proto_rev(&self) -> Result<ProtoRevWrite> {
        ProtoRevWrite::acquire(self)
    }
}

fn noderev_file_name(id: &NodeRevId) -> String {
    let node = match id.node_id.revision {
        None => format!("_{}", id::to_base36(id.node_id.number)),
        Some(rev) => format!("{}-{}", id::to_base36(id.node_id.number), rev),
    };
    let copy = match id.copy_id.revision {
        None => format!("_{}", id::to_base36(id.copy_id.number)),
        Some(rev) => format!("{}-{}", id::to_base36(id.copy_id.number), rev),
    };
    format!("node.{node}.{copy}")
}

fn write_txn_noderev_in(dir: &std::path::Path, noderev: &NodeRevision) -> Result<()> {
    let path = dir.join(noderev_file_name(&noderev.id));
    layout::write_file_atomic(&path, &noderev.unparse())
}

/// Read a transaction-local node-revision record.
///
/// # Errors
/// `NoSuchTransaction` when the transaction is gone, `Corrupt` on a
/// malformed record.
pub(crate) fn read_txn_noderev(repo: &Repository, id: &NodeRevId) -> Result<NodeRevision> {
    let txn_id = id
        .txn_id()
        .ok_or_else(|| FsError::Corrupt(format!("'{id}' is not transaction-local")))?;
    let dir = repo.layout().txn_dir(txn_id);
    if !dir.is_dir() {
        return Err(FsError::NoSuchTransaction(txn_id.to_string()));
    }
    let path = dir.join(noderev_file_name(id));
    let data = std::fs::read(&path)
        .map_err(FsError::io(format!("reading node-revision '{id}'")))?;
    let mut pos = 0;
    NodeRevision::parse(&data, &mut pos)
}

/// Entry map of a transaction-local directory, merged from its children
/// log and cached for in-place patching.
///
/// # Errors
/// Corruption or I/O errors.
pub(crate) fn txn_dir_entries(repo: &Repository, noderev: &NodeRevision) -> Result<Entries> {
    let key = noderev.id.unparse();
    if let Some(shared) = repo.caches().dir_entries(&key) {
        return Ok(shared.read().clone());
    }
    let txn_id = noderev
        .id
        .txn_id()
        .ok_or_else(|| FsError::Corrupt("not a transaction directory".into()))?;
    let txn = Transaction { repo: repo.clone(), id: txn_id };
    let children_path = txn.children_path(&noderev.id);
    let entries = if children_path.exists() {
        let data = std::fs::read(&children_path)
            .map_err(FsError::io(format!("reading '{}'", children_path.display())))?;
        crate::node::dirent::parse_children_log(&data)?
    } else if let Some(rep) = noderev.text_rep.as_ref().filter(|r| !r.is_mutable()) {
        crate::node::dirent::parse_entries(&repo.rep_content(rep)?)?
    } else {
        Entries::new()
    };
    repo.caches().set_dir_entries(&key, entries.clone());
    Ok(entries)
}

/// Node properties of a transaction-local node.
///
/// # Errors
/// Corruption or I/O errors.
pub(crate) fn txn_node_props(repo: &Repository, noderev: &NodeRevision) -> Result<HashMapDump> {
    let txn_id = noderev
        .id
        .txn_id()
        .ok_or_else(|| FsError::Corrupt("not a transaction-local node".into()))?;
    let txn = Transaction { repo: repo.clone(), id: txn_id };
    let props_path = txn.node_props_path(&noderev.id);
    if props_path.exists() {
        let data = std::fs::read(&props_path)
            .map_err(FsError::io(format!("reading '{}'", props_path.display())))?;
        hashdump::parse_hash(&data, &mut 0)
    } else if let Some(rep) = noderev.prop_rep.as_ref().filter(|r| !r.is_mutable()) {
        hashdump::parse_hash(&repo.rep_content(rep)?, &mut 0)
    } else {
        Ok(HashMapDump::new())
    }
}

/// Exclusive handle on a transaction's proto-rev file.
///
/// Holds the in-process `being_written` flag and the advisory lock on
/// `rev-lock` for as long as it lives; both are released on drop.
pub(crate) struct ProtoRevWrite {
    repo: Repository,
    txn_id: TxnId,
    pub(crate) file: File,
    _lock: FileLock,
}

impl ProtoRevWrite {
    fn acquire(txn: &Transaction) -> Result<Self> {
        txn.ensure_open()?;
        txn.repo.inner.txn_list.begin_proto_write(txn.id)?;
        let lock_path = txn.dir().join("rev-lock");
        let lock = match FileLock::try_acquire(&lock_path) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                txn.repo.inner.txn_list.end_proto_write(txn.id);
                return Err(FsError::RepBeingWritten(txn.name()));
            }
            Err(e) => {
                txn.repo.inner.txn_list.end_proto_write(txn.id);
                return Err(e);
            }
        };
        let path = txn.dir().join("rev");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(FsError::io(format!("opening proto-rev '{}'", path.display())))?;
        Ok(Self { repo: txn.repo.clone(), txn_id: txn.id, file, _lock: lock })
    }

    /// Current end of the proto-rev file; positions the cursor there.
    pub(crate) fn seek_end(&mut self) -> Result<u64> {
        self.file
            .seek(SeekFrom::End(0))
            .map_err(FsError::io("seeking proto-rev".to_string()))
    }

    /// Roll back to OFFSET, discarding a rep that found a shared twin.
    pub(crate) fn truncate_to(&mut self, offset: u64) -> Result<()> {
        self.file
            .set_len(offset)
            .map_err(FsError::io("truncating proto-rev".to_string()))?;
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(FsError::io("seeking proto-rev".to_string()))?;
        Ok(())
    }
}

impl Drop for ProtoRevWrite {
    fn drop(&mut self) {
        self.repo.inner.txn_list.end_proto_write(self.txn_id);
    }
}
