use crate::errors::{FsError, Result};
use crate::node::id::TxnId;
use fs4::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// RAII holder of an exclusive OS advisory lock on a lock file.
/// The lock is released when the guard drops.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .map_err(FsError::io(format!("opening lock file '{}'", path.display())))
}

impl FileLock {
    /// Block until the exclusive lock on PATH is held.
    ///
    /// # Errors
    /// I/O errors opening or locking the file.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .map_err(FsError::io(format!("locking '{}'", path.display())))?;
        Ok(Self { file })
    }

    /// Take the exclusive lock on PATH without blocking; `None` when some
    /// other process holds it.
    ///
    /// # Errors
    /// I/O errors opening the file.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Debug, Default)]
struct TxnListEntry {
    being_written: bool,
}

#[derive(Debug, Default)]
struct TxnListInner {
    entries: HashMap<TxnId, TxnListEntry>,
    /// Recycled entry allocation; transactions usually follow one another.
    free: Option<TxnListEntry>,
}

/// In-process registry of per-transaction state, guarded by one mutex.
///
/// Two threads of the same process racing for a proto-rev file fail fast
/// on the `being_written` flag here instead of blocking on the kernel
/// lock.
#[derive(Debug, Default)]
pub struct TxnList {
    inner: Mutex<TxnListInner>,
}

impl TxnList {
    /// Flag TXN_ID's proto-rev as being written.
    ///
    /// # Errors
    /// `RepBeingWritten` when another thread already holds the flag.
    pub fn begin_proto_write(&self, txn_id: TxnId) -> Result<()> {
        let mut inner = self.inner.lock();
        let recycled = inner.free.take().unwrap_or_default();
        let entry = inner.entries.entry(txn_id).or_insert(recycled);
        if entry.being_written {
            return Err(FsError::RepBeingWritten(txn_id.to_string()));
        }
        entry.being_written = true;
        Ok(())
    }

    /// Clear the flag set by [`TxnList::begin_proto_write`].
    pub fn end_proto_write(&self, txn_id: TxnId) {
        let mut inner = self.inner.lock();
        if let Some(mut entry) = inner.entries.remove(&txn_id) {
            entry.being_written = false;
            inner.free = Some(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_writer_fails_fast() {
        let list = TxnList::default();
        let txn_id = TxnId { base_rev: 3, seq: 0 };
        list.begin_proto_write(txn_id).unwrap();
        assert!(matches!(
            list.begin_proto_write(txn_id),
            Err(FsError::RepBeingWritten(_))
        ));
        list.end_proto_write(txn_id);
        list.begin_proto_write(txn_id).unwrap();
    }

    #[test]
    fn distinct_txns_do_not_interfere() {
        let list = TxnList::default();
        list.begin_proto_write(TxnId { base_rev: 3, seq: 0 }).unwrap();
        list.begin_proto_write(TxnId { base_rev: 3, seq: 1 }).unwrap();
    }

    #[test]
    fn file_lock_excludes_and_releases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("write-lock");
        let held = FileLock::acquire(&path).unwrap();
        drop(held);
        let reheld = FileLock::try_acquire(&path).unwrap();
        assert!(reheld.is_some());
    }
}
