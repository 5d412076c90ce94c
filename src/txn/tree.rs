//! Tree mutations inside an open transaction: cloning nodes into the
//! transaction on first touch, directory entry updates, content and
//! property writes. Every operation appends to the change log.

use crate::commit::deltify;
use crate::commit::rep_write;
use crate::errors::{FsError, Result};
use crate::hashdump;
use crate::index::ItemType;
use crate::node::change::{ChangeKind, ChangeRecord};
use crate::node::dirent::DirEntry;
use crate::node::id::{IdPart, NodeRevId, Revision, Token};
use crate::node::noderev::{NodeKind, NodeRevision};
use crate::node::rep::Representation;
use crate::repo::layout;
use crate::txn::store::{self, Transaction};

/// Require an absolute path and strip any trailing separator.
fn canonical(path: &str) -> Result<&str> {
    if !path.starts_with('/') {
        return Err(FsError::NotFound(format!("'{path}' is not an absolute path")));
    }
    Ok(if path.len() > 1 { path.trim_end_matches('/') } else { path })
}

fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty())
}

fn split_parent(path: &str) -> Result<(&str, &str)> {
    let (parent, name) = path
        .rsplit_once('/')
        .ok_or_else(|| FsError::NotFound(format!("'{path}' has no parent")))?;
    if name.is_empty() {
        return Err(FsError::NotFound(format!("'{path}' names no entry")));
    }
    Ok((if parent.is_empty() { "/" } else { parent }, name))
}

impl Transaction {
    /// The transaction root's node-revision.
    ///
    /// # Errors
    /// `NoSuchTransaction` when purged.
    pub fn root(&self) -> Result<NodeRevision> {
        self.ensure_open()?;
        self.repo.read_noderev(&self.root_id())
    }

    /// Resolve PATH within this transaction's tree.
    ///
    /// # Errors
    /// `NotFound` / `NotDirectory` on bad paths.
    pub fn node_at(&self, path: &str) -> Result<NodeRevision> {
        let path = canonical(path)?;
        let mut noderev = self.root()?;
        for component in components(path) {
            if noderev.kind != NodeKind::Dir {
                return Err(FsError::NotDirectory(noderev.created_path.clone()));
            }
            let entries = self.repo.dir_entries_of(&noderev)?;
            let entry = entries
                .get(component)
                .ok_or_else(|| FsError::NotFound(format!("{path} in transaction {}", self.id())))?;
            noderev = self.repo.read_noderev(&entry.id)?;
        }
        Ok(noderev)
    }

    /// File contents at PATH as the transaction currently sees them.
    ///
    /// # Errors
    /// `NotFound` / `NotFile`, corruption errors from the rep chain.
    pub fn file_contents(&self, path: &str) -> Result<Vec<u8>> {
        let noderev = self.node_at(path)?;
        if noderev.kind != NodeKind::File {
            return Err(FsError::NotFile(path.to_string()));
        }
        match &noderev.text_rep {
            Some(rep) if !rep.is_mutable() => self.repo.rep_content(rep),
            Some(rep) => self.read_txn_rep(rep),
            None => Ok(Vec::new()),
        }
    }

    /// Expand a rep that was written into this transaction's proto-rev.
    fn read_txn_rep(&self, rep: &Representation) -> Result<Vec<u8>> {
        rep_write::read_proto_rep(self, rep)
    }

    /// Create an empty file at PATH.
    ///
    /// # Errors
    /// `AlreadyExists` when the name is taken, `NotFound` for a missing
    /// parent.
    pub fn make_file(&self, path: &str) -> Result<NodeRevId> {
        self.make_node(path, NodeKind::File)
    }

    /// Create an empty directory at PATH.
    ///
    /// # Errors
    /// Same failure modes as [`Transaction::make_file`].
    pub fn make_dir(&self, path: &str) -> Result<NodeRevId> {
        self.make_node(path, NodeKind::Dir)
    }

    fn make_node(&self, path: &str, kind: NodeKind) -> Result<NodeRevId> {
        let path = canonical(path)?;
        let (parent_path, name) = split_parent(path)?;
        let mut parent = self.make_path_mutable(parent_path)?;
        if self.repo.dir_entries_of(&parent)?.contains_key(name) {
            return Err(FsError::AlreadyExists(path.to_string()));
        }

        let number = self.new_node_number()?;
        let id = NodeRevId {
            node_id: IdPart::txn_local(number),
            copy_id: IdPart::txn_local(0),
            token: Token::Txn(self.id()),
        };
        let mut noderev = NodeRevision::new(kind, id, path);
        noderev.copyroot_path = path.to_string();
        if kind == NodeKind::Dir {
            // A fresh directory needs its (empty) rep written at commit.
            noderev.text_rep = Some(Representation::mutable_placeholder(self.id()));
        }
        self.write_noderev(&noderev)?;
        self.set_dir_entry(&mut parent, name, Some(DirEntry { kind, id }))?;
        self.append_change(&ChangeRecord {
            path: path.to_string(),
            id: Some(id),
            kind: ChangeKind::Add,
            text_mod: false,
            prop_mod: false,
            node_kind: Some(kind),
            copyfrom: None,
        })?;
        Ok(id)
    }

    /// Delete the node at PATH.
    ///
    /// # Errors
    /// `NotFound` when absent.
    pub fn delete(&self, path: &str) -> Result<()> {
        let path = canonical(path)?;
        let (parent_path, name) = split_parent(path)?;
        let mut parent = self.make_path_mutable(parent_path)?;
        let entries = self.repo.dir_entries_of(&parent)?;
        let entry = *entries
            .get(name)
            .ok_or_else(|| FsError::NotFound(path.to_string()))?;
        self.set_dir_entry(&mut parent, name, None)?;
        self.append_change(&ChangeRecord {
            path: path.to_string(),
            id: Some(entry.id),
            kind: ChangeKind::Delete,
            text_mod: false,
            prop_mod: false,
            node_kind: Some(entry.kind),
            copyfrom: None,
        })?;
        Ok(())
    }

    /// Copy FROM_PATH@FROM_REV to TO_PATH, recording copy history.
    ///
    /// # Errors
    /// `NotFound` for the source, `AlreadyExists` for the target.
    pub fn copy(&self, from_rev: Revision, from_path: &str, to_path: &str) -> Result<NodeRevId> {
        let from_path = canonical(from_path)?;
        let to_path = canonical(to_path)?;
        let source = self.repo.node_at(from_rev, from_path)?;
        let (parent_path, name) = split_parent(to_path)?;
        let mut parent = self.make_path_mutable(parent_path)?;
        if self.repo.dir_entries_of(&parent)?.contains_key(name) {
            return Err(FsError::AlreadyExists(to_path.to_string()));
        }

        let copy_number = self.reserve_copy_number()?;
        let id = NodeRevId {
            node_id: source.id.node_id,
            copy_id: IdPart::txn_local(copy_number),
            token: Token::Txn(self.id()),
        };
        let mut noderev = source.clone();
        noderev.id = id;
        noderev.predecessor = Some(source.id);
        noderev.predecessor_count = source.predecessor_count + 1;
        noderev.created_path = to_path.to_string();
        noderev.copyfrom = Some((from_rev, from_path.to_string()));
        noderev.copyroot_rev = None;
        noderev.copyroot_path = to_path.to_string();
        self.write_noderev(&noderev)?;
        self.set_dir_entry(
            &mut parent,
            name,
            Some(DirEntry { kind: noderev.kind, id }),
        )?;
        self.append_change(&ChangeRecord {
            path: to_path.to_string(),
            id: Some(id),
            kind: ChangeKind::Add,
            text_mod: false,
            prop_mod: false,
            node_kind: Some(noderev.kind),
            copyfrom: Some((from_rev, from_path.to_string())),
        })?;
        Ok(id)
    }

    /// Replace the file contents at PATH; the rep is deltified and
    /// written into the proto-rev file immediately.
    ///
    /// # Errors
    /// `NotFile` for directories, `RepBeingWritten` on writer collisions.
    pub fn set_file_contents(&self, path: &str, data: &[u8]) -> Result<()> {
        let path = canonical(path)?;
        let mut noderev = self.make_path_mutable(path)?;
        if noderev.kind != NodeKind::File {
            return Err(FsError::NotFile(path.to_string()));
        }

        let base = deltify::choose_delta_base(&self.repo, &noderev, false)?;
        let mut proto = self.open_proto_rev()?;
        let rep =
            rep_write::write_rep(self, &mut proto, data, base, ItemType::FileRep, &mut None)?;
        drop(proto);

        noderev.text_rep = Some(rep);
        self.write_noderev(&noderev)?;
        self.append_change(&ChangeRecord {
            path: path.to_string(),
            id: Some(noderev.id),
            kind: ChangeKind::Modify,
            text_mod: true,
            prop_mod: false,
            node_kind: Some(NodeKind::File),
            copyfrom: None,
        })?;
        Ok(())
    }

    /// Set (`Some`) or delete (`None`) one node property at PATH.
    ///
    /// # Errors
    /// `NotFound` on bad paths.
    pub fn set_node_prop(&self, path: &str, name: &str, value: Option<&[u8]>) -> Result<()> {
        let path = canonical(path)?;
        let mut noderev = self.make_path_mutable(path)?;
        let mut props = store::txn_node_props(&self.repo, &noderev)?;
        match value {
            Some(value) => {
                props.insert(name.to_string(), value.to_vec());
            }
            None => {
                props.remove(name);
            }
        }
        let mut dump = Vec::new();
        hashdump::write_hash(&mut dump, &props);
        layout::write_file_atomic(&self.node_props_path(&noderev.id), &dump)?;

        if !noderev.prop_rep.as_ref().is_some_and(Representation::is_mutable) {
            noderev.prop_rep = Some(Representation::mutable_placeholder(self.id()));
            self.write_noderev(&noderev)?;
        }
        self.append_change(&ChangeRecord {
            path: path.to_string(),
            id: Some(noderev.id),
            kind: ChangeKind::Modify,
            text_mod: false,
            prop_mod: true,
            node_kind: Some(noderev.kind),
            copyfrom: None,
        })?;
        Ok(())
    }

    /// Walk PATH from the transaction root, cloning every committed node
    /// along the way into the transaction, and return the (now mutable)
    /// node-revision at PATH.
    ///
    /// # Errors
    /// `NotFound` / `NotDirectory` on bad paths.
    pub(crate) fn make_path_mutable(&self, path: &str) -> Result<NodeRevision> {
        let path = canonical(path)?;
        let mut current = self.root()?;
        let mut current_path = String::new();
        for component in components(path) {
            if current.kind != NodeKind::Dir {
                return Err(FsError::NotDirectory(current.created_path.clone()));
            }
            current_path.push('/');
            current_path.push_str(component);

            let entries = self.repo.dir_entries_of(&current)?;
            let entry = *entries
                .get(component)
                .ok_or_else(|| FsError::NotFound(current_path.clone()))?;
            let child = self.repo.read_noderev(&entry.id)?;
            let child = if child.id.is_txn() {
                child
            } else {
                let cloned = self.clone_into_txn(&child, &current_path)?;
                self.set_dir_entry(
                    &mut current,
                    component,
                    Some(DirEntry { kind: cloned.kind, id: cloned.id }),
                )?;
                cloned
            };
            current = child;
        }
        Ok(current)
    }

    /// Copy a committed node-revision into the transaction as the next
    /// link of its predecessor chain.
    fn clone_into_txn(&self, committed: &NodeRevision, path: &str) -> Result<NodeRevision> {
        let mut cloned = committed.clone();
        cloned.id = NodeRevId {
            node_id: committed.id.node_id,
            copy_id: committed.id.copy_id,
            token: Token::Txn(self.id()),
        };
        cloned.predecessor = Some(committed.id);
        cloned.predecessor_count = committed.predecessor_count + 1;
        cloned.created_path = path.to_string();
        cloned.copyfrom = None;
        self.write_noderev(&cloned)?;
        Ok(cloned)
    }

    /// Apply one entry change to a mutable directory: initialise the
    /// children log on first touch, append the incremental record, patch
    /// the cached entry map, and flag the directory rep as mutable.
    fn set_dir_entry(
        &self,
        parent: &mut NodeRevision,
        name: &str,
        entry: Option<DirEntry>,
    ) -> Result<()> {
        debug_assert!(parent.id.is_txn());
        let children_path = self.children_path(&parent.id);
        if !children_path.exists() {
            let existing = store::txn_dir_entries(&self.repo, parent)?;
            let dump = crate::node::dirent::unparse_entries(&existing);
            std::fs::write(&children_path, dump)
                .map_err(FsError::io(format!("creating '{}'", children_path.display())))?;
        }

        let mut record = Vec::new();
        match &entry {
            Some(entry) => hashdump::append_set(&mut record, name, entry.unparse().as_bytes()),
            None => hashdump::append_delete(&mut record, name),
        }
        use std::io::Write;
        std::fs::OpenOptions::new()
            .append(true)
            .open(&children_path)
            .and_then(|mut f| f.write_all(&record))
            .map_err(FsError::io(format!("appending to '{}'", children_path.display())))?;

        self.repo.caches().patch_dir_entry(&parent.id.unparse(), name, entry);

        if !parent.text_rep.as_ref().is_some_and(Representation::is_mutable) {
            parent.text_rep = Some(Representation::mutable_placeholder(self.id()));
            self.write_noderev(parent)?;
        }
        Ok(())
    }
}
