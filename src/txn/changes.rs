//! The transaction's append-only change log, one record per tree
//! operation. Folding into the minimal per-path set happens at commit.

use crate::errors::{FsError, Result};
use crate::node::change::{self, ChangeRecord};
use crate::txn::store::Transaction;
use std::io::Write;

impl Transaction {
    /// Append one change record to the log.
    ///
    /// # Errors
    /// I/O errors from the append.
    pub(crate) fn append_change(&self, record: &ChangeRecord) -> Result<()> {
        let path = self.dir().join("changes");
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(FsError::io(format!("opening '{}'", path.display())))?;
        file.write_all(&record.unparse())
            .map_err(FsError::io("appending change record".to_string()))
    }

    /// The raw (unfolded) change log.
    ///
    /// # Errors
    /// `Corrupt` on framing violations.
    pub fn changes(&self) -> Result<Vec<ChangeRecord>> {
        self.ensure_open()?;
        let path = self.dir().join("changes");
        let data = std::fs::read(&path)
            .map_err(FsError::io(format!("reading '{}'", path.display())))?;
        change::parse_changes(&data)
    }
}
