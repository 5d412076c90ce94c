//! The repository handle: process-shared state, open/create, and the read
//! side of committed revisions.

pub mod caches;
pub mod current;
pub mod layout;
pub mod lock;

use crate::commit::deltify::Delta;
use crate::commit::rep_write::RepHeader;
use crate::commit::repcache::RepCache;
use crate::config::FsConfig;
use crate::errors::{FsError, Result};
use crate::hashdump::{self, HashMapDump};
use crate::index::{
    self, ITEM_INDEX_CHANGES, ITEM_INDEX_FIRST_USER, ITEM_INDEX_ROOT_NODE, ItemType,
};
use crate::index::l2p;
use crate::index::p2l::{self, ItemRef, P2lEntry};
use crate::index::proto::{ProtoL2p, ProtoP2l};
use crate::node::change::{self, ChangeRecord};
use crate::node::dirent::{self, Entries};
use crate::node::id::{IdPart, NodeRevId, Revision, Token};
use crate::node::noderev::{NodeKind, NodeRevision};
use crate::node::rep::Representation;
use caches::Caches;
use layout::Layout;
use lock::TxnList;
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

pub(crate) struct RepoInner {
    pub(crate) layout: Layout,
    pub(crate) config: FsConfig,
    pub(crate) caches: Caches,
    pub(crate) txn_list: TxnList,
    pub(crate) write_mutex: Mutex<()>,
    pub(crate) rep_cache: RepCache,
}

/// Handle to one on-disk repository. Cheap to clone; all clones share the
/// caches, the in-process locks and the rep-cache connection.
#[derive(Clone)]
pub struct Repository {
    pub(crate) inner: Arc<RepoInner>,
}

impl Repository {
    pub(crate) fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub(crate) fn config(&self) -> &FsConfig {
        &self.inner.config
    }

    pub(crate) fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    /// Create a new repository at PATH (which must not already contain
    /// one) and commit the empty revision 0.
    ///
    /// # Errors
    /// I/O errors, or `Config` if PATH already holds a repository.
    pub fn create(path: &Path) -> Result<Self> {
        let config = FsConfig::default();
        Self::create_with_config(path, config)
    }

    /// [`Repository::create`] with explicit configuration.
    ///
    /// # Errors
    /// See [`Repository::create`].
    pub fn create_with_config(path: &Path, config: FsConfig) -> Result<Self> {
        let layout = Layout::new(path.to_path_buf(), config.max_files_per_dir);
        if layout.current_path().exists() {
            return Err(FsError::Config(format!(
                "'{}' already contains a repository",
                path.display()
            )));
        }
        for dir in [
            path.to_path_buf(),
            layout.txns_dir(),
            layout.revs_dir(),
            layout.revprops_dir(),
            layout.db_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .map_err(FsError::io(format!("creating '{}'", dir.display())))?;
        }
        config.store(path)?;
        std::fs::write(layout.write_lock_path(), b"")
            .map_err(FsError::io("creating 'write-lock'".to_string()))?;
        std::fs::write(layout.txn_current_lock_path(), b"")
            .map_err(FsError::io("creating 'txn-current-lock'".to_string()))?;
        std::fs::write(layout.txn_current_path(), b"0\n")
            .map_err(FsError::io("creating 'txn-current'".to_string()))?;

        write_revision_zero(&layout, &config)?;
        current::write_current(&layout, 0)?;

        if let (Some(base), Some(name)) =
            (path.parent(), path.file_name().and_then(|n| n.to_str()))
        {
            let _ = crate::logger::init_for_repo_in(base, name);
        }
        log::info!("created repository at '{}'", path.display());
        Self::open(path)
    }

    /// Open an existing repository.
    ///
    /// # Errors
    /// `Config` on a format mismatch, `Corrupt` if the layout is damaged.
    pub fn open(path: &Path) -> Result<Self> {
        let config = FsConfig::load(path)?;
        let layout = Layout::new(path.to_path_buf(), config.max_files_per_dir);
        if !layout.current_path().exists() {
            return Err(FsError::Corrupt(format!(
                "'{}' is not a repository (no 'current' file)",
                path.display()
            )));
        }
        let rep_cache = RepCache::new(layout.rep_cache_path());
        Ok(Self {
            inner: Arc::new(RepoInner {
                layout,
                config,
                caches: Caches::new(),
                txn_list: TxnList::default(),
                write_mutex: Mutex::new(()),
                rep_cache,
            }),
        })
    }

    /// The youngest committed revision; trusts the in-process cache once
    /// a commit has populated it.
    ///
    /// # Errors
    /// I/O or `Corrupt` errors reading `current`.
    pub fn youngest(&self) -> Result<Revision> {
        if let Some(youngest) = *self.caches().youngest.read() {
            return Ok(youngest);
        }
        let youngest = current::read_current(self.layout())?;
        *self.caches().youngest.write() = Some(youngest);
        Ok(youngest)
    }

    /// Re-read `current` from disk, bypassing the cache. The commit
    /// pipeline does this under the write lock.
    pub(crate) fn youngest_uncached(&self) -> Result<Revision> {
        current::read_current(self.layout())
    }

    /// Properties of a committed revision.
    ///
    /// # Errors
    /// I/O or `Corrupt` errors.
    pub fn revision_proplist(&self, revision: Revision) -> Result<HashMapDump> {
        let path = self.layout().revprops_path(revision);
        let data = std::fs::read(&path)
            .map_err(FsError::io(format!("reading revprops of r{revision}")))?;
        hashdump::parse_hash(&data, &mut 0)
    }

    /// The root directory's node-revision of REVISION.
    ///
    /// # Errors
    /// Index or corruption errors.
    pub fn rev_root(&self, revision: Revision) -> Result<NodeRevision> {
        self.read_noderev_at(revision, ITEM_INDEX_ROOT_NODE)
    }

    /// Resolve PATH inside committed REVISION to its node-revision.
    ///
    /// # Errors
    /// `NotFound` when a component is missing, `NotDirectory` when the
    /// walk hits a file.
    pub fn node_at(&self, revision: Revision, path: &str) -> Result<NodeRevision> {
        let mut noderev = self.rev_root(revision)?;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            if noderev.kind != NodeKind::Dir {
                return Err(FsError::NotDirectory(noderev.created_path.clone()));
            }
            let entries = self.dir_entries_of(&noderev)?;
            let entry = entries
                .get(component)
                .ok_or_else(|| FsError::NotFound(format!("{path} in r{revision}")))?;
            noderev = self.read_noderev(&entry.id)?;
        }
        Ok(noderev)
    }

    /// Expanded file contents at PATH in REVISION.
    ///
    /// # Errors
    /// `NotFound`, or corruption errors from the rep chain.
    pub fn file_contents(&self, revision: Revision, path: &str) -> Result<Vec<u8>> {
        let noderev = self.node_at(revision, path)?;
        match &noderev.text_rep {
            Some(rep) => self.rep_content(rep),
            None => Ok(Vec::new()),
        }
    }

    /// Entry map of the directory at PATH in REVISION.
    ///
    /// # Errors
    /// `NotFound` / `NotDirectory`, or corruption errors.
    pub fn dir_entries(&self, revision: Revision, path: &str) -> Result<Entries> {
        let noderev = self.node_at(revision, path)?;
        if noderev.kind != NodeKind::Dir {
            return Err(FsError::NotDirectory(path.to_string()));
        }
        self.dir_entries_of(&noderev)
    }

    /// Properties of the node at PATH in REVISION.
    ///
    /// # Errors
    /// `NotFound`, or corruption errors.
    pub fn node_proplist(&self, revision: Revision, path: &str) -> Result<HashMapDump> {
        let noderev = self.node_at(revision, path)?;
        match &noderev.prop_rep {
            Some(rep) => {
                let data = self.rep_content(rep)?;
                hashdump::parse_hash(&data, &mut 0)
            }
            None => Ok(HashMapDump::new()),
        }
    }

    /// Resolve `(revision, item_index)` through the log-to-phys index.
    ///
    /// # Errors
    /// `ItemIndexRevision` / `ItemIndexOverflow` per the index contract.
    pub fn l2p_lookup(&self, revision: Revision, item_index: u64) -> Result<u64> {
        l2p::l2p_lookup(self.layout(), self.config(), self.caches(), revision, item_index)
    }

    /// All phys-to-log entries of REVISION, in offset order.
    ///
    /// # Errors
    /// Index corruption or I/O errors.
    pub fn p2l_entries(&self, revision: Revision) -> Result<Vec<P2lEntry>> {
        p2l::p2l_entries(self.layout(), self.config(), self.caches(), revision)
    }

    /// Look up a committed representation in the rep cache by content
    /// SHA-1.
    ///
    /// # Errors
    /// `RepCache` on database errors.
    pub fn rep_cache_get(&self, sha1: &[u8; 20]) -> Result<Option<Representation>> {
        self.inner.rep_cache.get(sha1)
    }

    /// The folded changed-paths list of REVISION.
    ///
    /// # Errors
    /// Index or corruption errors.
    pub fn changed_paths(&self, revision: Revision) -> Result<Vec<ChangeRecord>> {
        let offset = l2p::l2p_lookup(
            self.layout(),
            self.config(),
            self.caches(),
            revision,
            ITEM_INDEX_CHANGES,
        )?;
        let entry = p2l::p2l_entry_lookup(
            self.layout(),
            self.config(),
            self.caches(),
            revision,
            offset,
        )?
        .ok_or_else(|| {
            FsError::IndexCorruption(format!("changes of r{revision} not covered by P2L"))
        })?;
        let mut reader = self.open_rev_file(revision)?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(FsError::io(format!("seeking r{revision}")))?;
        let mut data = vec![0u8; entry.size as usize];
        reader
            .read_exact(&mut data)
            .map_err(FsError::io(format!("reading changes of r{revision}")))?;
        change::parse_changes(&data)
    }

    pub(crate) fn dir_entries_of(&self, noderev: &NodeRevision) -> Result<Entries> {
        if noderev.id.is_txn() {
            return crate::txn::store::txn_dir_entries(self, noderev);
        }
        match &noderev.text_rep {
            Some(rep) => {
                let data = self.rep_content(rep)?;
                dirent::parse_entries(&data)
            }
            None => Ok(Entries::new()),
        }
    }

    /// Read a node-revision, committed or transaction-local.
    ///
    /// # Errors
    /// Index, I/O or corruption errors.
    pub fn read_noderev(&self, id: &NodeRevId) -> Result<NodeRevision> {
        match id.token {
            Token::Revision { revision, item } => self.read_noderev_at(revision, item),
            Token::Txn(_) => crate::txn::store::read_txn_noderev(self, id),
        }
    }

    pub(crate) fn read_noderev_at(&self, revision: Revision, item: u64) -> Result<NodeRevision> {
        let offset =
            l2p::l2p_lookup(self.layout(), self.config(), self.caches(), revision, item)?;
        let mut reader = self.open_rev_file(revision)?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(FsError::io(format!("seeking r{revision}")))?;
        let block = read_until_blank_line(&mut reader)
            .map_err(FsError::io(format!("reading node-revision in r{revision}")))?;
        let mut pos = 0;
        NodeRevision::parse(&block, &mut pos)
    }

    pub(crate) fn open_rev_file(&self, revision: Revision) -> Result<BufReader<File>> {
        let path = self.layout().rev_path(revision);
        let file =
            File::open(&path).map_err(FsError::io(format!("opening '{}'", path.display())))?;
        Ok(BufReader::new(file))
    }

    /// Expand a committed representation by walking its delta chain.
    ///
    /// # Errors
    /// `Corrupt` on ordering violations or a size mismatch.
    pub(crate) fn rep_content(&self, rep: &Representation) -> Result<Vec<u8>> {
        let revision = rep
            .revision
            .ok_or_else(|| FsError::Corrupt("cannot expand an unwritten mutable rep".into()))?;
        let content = self.expand_rep_at(revision, rep.item_index)?;
        if content.len() as u64 != rep.expanded_size {
            return Err(FsError::Corrupt(format!(
                "rep r{}/{} expands to {} bytes, expected {}",
                revision,
                rep.item_index,
                content.len(),
                rep.expanded_size
            )));
        }
        Ok(content)
    }

    /// Expand the rep stored at `(revision, item)` without an expected
    /// size to check against (delta bases are referenced this way).
    pub(crate) fn expand_rep_at(&self, revision: Revision, item: u64) -> Result<Vec<u8>> {
        let mut revision = revision;
        let mut item = item;
        let mut deltas = Vec::new();
        loop {
            let (header, delta) = self.read_rep_container(revision, item)?;
            deltas.push(delta);
            match header.base {
                Some((base_rev, base_item)) => {
                    if !(base_rev < revision || (base_rev == revision && base_item < item)) {
                        return Err(FsError::Corrupt(format!(
                            "rep r{revision}/{item} has a non-ancestral delta base \
                             r{base_rev}/{base_item}"
                        )));
                    }
                    revision = base_rev;
                    item = base_item;
                }
                None => break,
            }
        }

        let mut content = Vec::new();
        for delta in deltas.iter().rev() {
            content = delta.apply(&content)?;
        }
        Ok(content)
    }

    fn read_rep_container(&self, revision: Revision, item: u64) -> Result<(RepHeader, Delta)> {
        let offset =
            l2p::l2p_lookup(self.layout(), self.config(), self.caches(), revision, item)?;
        let mut reader = self.open_rev_file(revision)?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(FsError::io(format!("seeking r{revision}")))?;
        let header = RepHeader::read(&mut reader)?;
        let delta = Delta::decode(&mut reader)?;
        let mut trailer = [0u8; 7];
        reader
            .read_exact(&mut trailer)
            .map_err(FsError::io(format!("reading rep trailer in r{revision}")))?;
        if &trailer != b"ENDREP\n" {
            return Err(FsError::Corrupt(format!(
                "rep r{revision}/{item} is missing its ENDREP trailer"
            )));
        }
        Ok((header, delta))
    }

    /// Number of reps in REP's delta chain (itself included).
    ///
    /// # Errors
    /// `Corrupt` on cycles or ordering violations.
    pub(crate) fn rep_chain_length(&self, rep: &Representation) -> Result<u64> {
        let mut revision = rep
            .revision
            .ok_or_else(|| FsError::Corrupt("mutable rep has no chain yet".into()))?;
        let mut item = rep.item_index;
        let mut length = 1u64;
        loop {
            let (header, _) = self.read_rep_container(revision, item)?;
            match header.base {
                Some((base_rev, base_item)) => {
                    if !(base_rev < revision || (base_rev == revision && base_item < item)) {
                        return Err(FsError::Corrupt("rep chain does not descend".into()));
                    }
                    revision = base_rev;
                    item = base_item;
                    length += 1;
                }
                None => return Ok(length),
            }
        }
    }
}

/// Read bytes up to and including the blank line that terminates a
/// node-revision block.
fn read_until_blank_line(reader: &mut impl BufRead) -> std::io::Result<Vec<u8>> {
    let mut block = Vec::new();
    loop {
        let before = block.len();
        let n = reader.read_until(b'\n', &mut block)?;
        if n == 0 || block.len() - before == 1 {
            return Ok(block);
        }
    }
}

/// Materialize revision 0: an empty root directory, an empty changed-paths
/// list and both indexes.
fn write_revision_zero(layout: &Layout, config: &FsConfig) -> Result<()> {
    let scratch = tempfile::tempdir_in(layout.root())
        .map_err(FsError::io("creating bootstrap scratch dir".to_string()))?;
    let rev_path = scratch.path().join("rev");
    let l2p_proto_path = scratch.path().join("index.l2p");
    let p2l_proto_path = scratch.path().join("index.p2l");

    let mut rev_file = File::create(&rev_path)
        .map_err(FsError::io("creating bootstrap rev file".to_string()))?;
    let mut proto_l2p = ProtoL2p::open(&l2p_proto_path)?;
    let mut proto_p2l = ProtoP2l::open(&p2l_proto_path)?;
    let mut offset = 0u64;

    // Empty directory rep for the root.
    let mut dir_dump = Vec::new();
    hashdump::write_hash(&mut dir_dump, &HashMapDump::new());
    let delta = Delta::build(&[], &dir_dump);
    let mut container = Vec::new();
    RepHeader { base: None }.write(&mut container);
    let delta_bytes = delta.encode();
    container.extend_from_slice(&delta_bytes);
    container.extend_from_slice(b"ENDREP\n");
    rev_file
        .write_all(&container)
        .map_err(FsError::io("writing bootstrap dir rep".to_string()))?;
    proto_l2p.add_entry(offset as i64, ITEM_INDEX_FIRST_USER)?;
    proto_p2l.add_entry(&P2lEntry {
        offset,
        size: container.len() as u64,
        item_type: ItemType::DirRep,
        items: vec![ItemRef { revision: Some(0), number: ITEM_INDEX_FIRST_USER }],
    })?;
    let dir_rep = Representation {
        revision: Some(0),
        item_index: ITEM_INDEX_FIRST_USER,
        size: delta_bytes.len() as u64,
        expanded_size: dir_dump.len() as u64,
        md5: Some(md5_of(&dir_dump)),
        sha1: None,
        uniquifier: None,
        txn_id: None,
    };
    offset += container.len() as u64;

    // Root node-revision.
    let root_id = NodeRevId {
        node_id: IdPart::committed(0, 0),
        copy_id: IdPart::committed(0, 0),
        token: Token::Revision { revision: 0, item: ITEM_INDEX_ROOT_NODE },
    };
    let mut root = NodeRevision::new(NodeKind::Dir, root_id, "/");
    root.copyroot_rev = Some(0);
    root.text_rep = Some(dir_rep);
    let root_bytes = root.unparse();
    rev_file
        .write_all(&root_bytes)
        .map_err(FsError::io("writing bootstrap root noderev".to_string()))?;
    proto_l2p.add_entry(offset as i64, ITEM_INDEX_ROOT_NODE)?;
    proto_p2l.add_entry(&P2lEntry {
        offset,
        size: root_bytes.len() as u64,
        item_type: ItemType::NodeRev,
        items: vec![ItemRef { revision: Some(0), number: ITEM_INDEX_ROOT_NODE }],
    })?;
    offset += root_bytes.len() as u64;

    // Empty changed-paths list.
    let changes = change::unparse_changes(&[]);
    rev_file
        .write_all(&changes)
        .map_err(FsError::io("writing bootstrap changes".to_string()))?;
    proto_l2p.add_entry(offset as i64, ITEM_INDEX_CHANGES)?;
    proto_p2l.add_entry(&P2lEntry {
        offset,
        size: changes.len() as u64,
        item_type: ItemType::Changes,
        items: vec![ItemRef { revision: Some(0), number: ITEM_INDEX_CHANGES }],
    })?;
    rev_file
        .sync_data()
        .map_err(FsError::io("syncing bootstrap rev file".to_string()))?;
    drop(rev_file);
    drop(proto_l2p);
    drop(proto_p2l);

    layout.ensure_shard(0)?;
    index::l2p::l2p_index_create(config, &layout.l2p_index_path(0), &l2p_proto_path, 0)?;
    index::p2l::p2l_index_create(config, &layout.p2l_index_path(0), &p2l_proto_path, 0)?;
    std::fs::rename(&rev_path, layout.rev_path(0))
        .map_err(FsError::io("moving r0 into place".to_string()))?;
    layout::set_read_only(&layout.rev_path(0))?;

    let mut revprops = HashMapDump::new();
    revprops.insert("svn:date".into(), crate::commit::pipeline::date_now().into_bytes());
    let mut dump = Vec::new();
    hashdump::write_hash(&mut dump, &revprops);
    layout::write_file_atomic(&layout.revprops_path(0), &dump)?;
    Ok(())
}

/// MD5 of a byte slice (content checksums in rep records).
#[must_use]
pub fn md5_of(data: &[u8]) -> [u8; 16] {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-1 of a byte slice (the rep-sharing key).
#[must_use]
pub fn sha1_of(data: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}
