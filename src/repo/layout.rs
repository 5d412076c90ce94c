use crate::errors::{FsError, Result};
use crate::node::id::{Revision, TxnId};
use std::fs;
use std::path::{Path, PathBuf};

/// Path helpers for the on-disk repository layout:
///
/// ```text
/// current
/// fsfs.toml
/// write-lock
/// txn-current
/// txn-current-lock
/// txns/<txn>.txn/
/// revs/<shard>/<N>            (+ <N>.l2p-index, <N>.p2l-index)
/// revprops/<shard>/<N>
/// db/rep-cache.db
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
    shard_size: u64,
}

impl Layout {
    #[must_use]
    pub fn new(root: PathBuf, shard_size: u64) -> Self {
        Self { root, shard_size: shard_size.max(1) }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn current_path(&self) -> PathBuf {
        self.root.join("current")
    }

    #[must_use]
    pub fn write_lock_path(&self) -> PathBuf {
        self.root.join("write-lock")
    }

    #[must_use]
    pub fn txn_current_path(&self) -> PathBuf {
        self.root.join("txn-current")
    }

    #[must_use]
    pub fn txn_current_lock_path(&self) -> PathBuf {
        self.root.join("txn-current-lock")
    }

    #[must_use]
    pub fn txns_dir(&self) -> PathBuf {
        self.root.join("txns")
    }

    #[must_use]
    pub fn txn_dir(&self, txn_id: TxnId) -> PathBuf {
        self.txns_dir().join(format!("{txn_id}.txn"))
    }

    #[must_use]
    pub fn revs_dir(&self) -> PathBuf {
        self.root.join("revs")
    }

    #[must_use]
    pub fn shard(&self, revision: Revision) -> u64 {
        revision / self.shard_size
    }

    #[must_use]
    pub fn rev_shard_dir(&self, revision: Revision) -> PathBuf {
        self.revs_dir().join(self.shard(revision).to_string())
    }

    #[must_use]
    pub fn rev_path(&self, revision: Revision) -> PathBuf {
        self.rev_shard_dir(revision).join(revision.to_string())
    }

    #[must_use]
    pub fn l2p_index_path(&self, revision: Revision) -> PathBuf {
        self.rev_shard_dir(revision).join(format!("{revision}.l2p-index"))
    }

    #[must_use]
    pub fn p2l_index_path(&self, revision: Revision) -> PathBuf {
        self.rev_shard_dir(revision).join(format!("{revision}.p2l-index"))
    }

    #[must_use]
    pub fn revprops_dir(&self) -> PathBuf {
        self.root.join("revprops")
    }

    #[must_use]
    pub fn revprops_shard_dir(&self, revision: Revision) -> PathBuf {
        self.revprops_dir().join(self.shard(revision).to_string())
    }

    #[must_use]
    pub fn revprops_path(&self, revision: Revision) -> PathBuf {
        self.revprops_shard_dir(revision).join(revision.to_string())
    }

    #[must_use]
    pub fn db_dir(&self) -> PathBuf {
        self.root.join("db")
    }

    #[must_use]
    pub fn rep_cache_path(&self) -> PathBuf {
        self.db_dir().join("rep-cache.db")
    }

    /// Create the shard directories for REVISION if it starts a new shard,
    /// inheriting permissions from the `revs` / `revprops` roots.
    ///
    /// # Errors
    /// I/O errors other than "already exists".
    pub fn ensure_shard(&self, revision: Revision) -> Result<()> {
        for (parent, dir) in [
            (self.revs_dir(), self.rev_shard_dir(revision)),
            (self.revprops_dir(), self.revprops_shard_dir(revision)),
        ] {
            match fs::create_dir(&dir) {
                Ok(()) => copy_permissions(&parent, &dir)?,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(FsError::Io {
                        context: format!("creating shard '{}'", dir.display()),
                        source: e,
                    });
                }
            }
        }
        Ok(())
    }
}

fn copy_permissions(from: &Path, to: &Path) -> Result<()> {
    let meta = fs::metadata(from)
        .map_err(FsError::io(format!("reading permissions of '{}'", from.display())))?;
    fs::set_permissions(to, meta.permissions())
        .map_err(FsError::io(format!("setting permissions of '{}'", to.display())))
}

/// Write CONTENTS to PATH atomically: temp file in the same directory,
/// then rename over the target.
///
/// # Errors
/// I/O errors from the write or the rename.
pub fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| FsError::Corrupt(format!("no parent for '{}'", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(FsError::io(format!("creating temp file in '{}'", dir.display())))?;
    use std::io::Write;
    tmp.write_all(contents)
        .map_err(FsError::io(format!("writing temp file for '{}'", path.display())))?;
    tmp.as_file()
        .sync_data()
        .map_err(FsError::io(format!("syncing temp file for '{}'", path.display())))?;
    tmp.persist(path)
        .map_err(|e| FsError::Io {
            context: format!("renaming into '{}'", path.display()),
            source: e.error,
        })?;
    Ok(())
}

/// Mark PATH read-only (published revision data is never rewritten).
///
/// # Errors
/// I/O errors from the metadata update.
pub fn set_read_only(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)
        .map_err(FsError::io(format!("reading metadata of '{}'", path.display())))?;
    let mut perms = meta.permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms)
        .map_err(FsError::io(format!("marking '{}' read-only", path.display())))
}
