//! Transaction properties: a hash dump in the transaction directory,
//! promoted to the revision properties at commit.

use crate::errors::{FsError, Result};
use crate::hashdump::{self, HashMapDump};
use crate::repo::layout;
use crate::txn::store::Transaction;
use std::path::PathBuf;

impl Transaction {
    pub(crate) fn props_path(&self) -> PathBuf {
        self.dir().join("props")
    }

    /// Bootstrap the props file at transaction creation. This is the only
    /// writer allowed to run against a missing file; everything else goes
    /// through [`Transaction::change_props`].
    pub(crate) fn write_initial_props(&self) -> Result<()> {
        let mut props = HashMapDump::new();
        props.insert("svn:date".into(), crate::commit::pipeline::date_now().into_bytes());
        let mut dump = Vec::new();
        hashdump::write_hash(&mut dump, &props);
        layout::write_file_atomic(&self.props_path(), &dump)
    }

    /// All transaction properties.
    ///
    /// # Errors
    /// `NoSuchTransaction` when purged, `Corrupt` on a malformed dump.
    pub fn proplist(&self) -> Result<HashMapDump> {
        self.ensure_open()?;
        let data = std::fs::read(self.props_path())
            .map_err(FsError::io(format!("reading props of transaction {}", self.id())))?;
        hashdump::parse_hash(&data, &mut 0)
    }

    /// One transaction property.
    ///
    /// # Errors
    /// Same failure modes as [`Transaction::proplist`].
    pub fn prop(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.proplist()?.remove(name))
    }

    /// Set (`Some`) or delete (`None`) a batch of properties, rewriting
    /// the props file atomically.
    ///
    /// # Errors
    /// Same failure modes as [`Transaction::proplist`].
    pub fn change_props(&self, props: &[(&str, Option<&[u8]>)]) -> Result<()> {
        let mut all = self.proplist()?;
        for (name, value) in props {
            match value {
                Some(value) => {
                    all.insert((*name).to_string(), value.to_vec());
                }
                None => {
                    all.remove(*name);
                }
            }
        }
        let mut dump = Vec::new();
        hashdump::write_hash(&mut dump, &all);
        layout::write_file_atomic(&self.props_path(), &dump)
    }

    /// Convenience for the common string-valued properties.
    ///
    /// # Errors
    /// Same failure modes as [`Transaction::change_props`].
    pub fn set_prop(&self, name: &str, value: &str) -> Result<()> {
        self.change_props(&[(name, Some(value.as_bytes()))])
    }
}
