use crate::errors::{FsError, Result};
use crate::hashdump::{self, HashMapDump};
use crate::node::id::NodeRevId;
use crate::node::noderev::NodeKind;
use std::collections::BTreeMap;

/// One directory entry: kind plus the id of the child's node-revision.
/// Serialized inside hash dumps as `<kind> <id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub kind: NodeKind,
    pub id: NodeRevId,
}

impl DirEntry {
    #[must_use]
    pub fn unparse(&self) -> String {
        format!("{} {}", self.kind.as_str(), self.id.unparse())
    }

    /// # Errors
    /// `Corrupt` if TEXT is not `<kind> <id>`.
    pub fn parse(text: &str) -> Result<Self> {
        let (kind, id) = text
            .split_once(' ')
            .ok_or_else(|| FsError::Corrupt(format!("malformed directory entry '{text}'")))?;
        Ok(Self { kind: NodeKind::parse(kind)?, id: NodeRevId::parse(id)? })
    }
}

pub type Entries = BTreeMap<String, DirEntry>;

/// Serialize ENTRIES as a terminated hash dump (the directory rep format).
#[must_use]
pub fn unparse_entries(entries: &Entries) -> Vec<u8> {
    let mut dump = HashMapDump::new();
    for (name, entry) in entries {
        dump.insert(name.clone(), entry.unparse().into_bytes());
    }
    let mut out = Vec::new();
    hashdump::write_hash(&mut out, &dump);
    out
}

/// Parse a directory rep (a terminated hash dump).
///
/// # Errors
/// `Corrupt` on framing or entry-format errors.
pub fn parse_entries(data: &[u8]) -> Result<Entries> {
    let mut pos = 0usize;
    let dump = hashdump::parse_hash(data, &mut pos)?;
    dump_to_entries(dump)
}

/// Parse a mutable directory's children log: a full dump followed by
/// incremental set/delete records.
///
/// # Errors
/// `Corrupt` on framing or entry-format errors.
pub fn parse_children_log(data: &[u8]) -> Result<Entries> {
    dump_to_entries(hashdump::parse_incremental(data)?)
}

fn dump_to_entries(dump: HashMapDump) -> Result<Entries> {
    let mut entries = Entries::new();
    for (name, value) in dump {
        let text = std::str::from_utf8(&value)
            .map_err(|_| FsError::Corrupt("directory entry is not UTF-8".into()))?;
        entries.insert(name, DirEntry::parse(text)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::id::{IdPart, Token, TxnId};

    fn entry(item: u64) -> DirEntry {
        DirEntry {
            kind: NodeKind::File,
            id: NodeRevId {
                node_id: IdPart::committed(1, item),
                copy_id: IdPart::committed(1, 0),
                token: Token::Revision { revision: 1, item },
            },
        }
    }

    #[test]
    fn entries_round_trip() {
        let mut entries = Entries::new();
        entries.insert("alpha".into(), entry(3));
        entries.insert("beta".into(), entry(4));
        let bytes = unparse_entries(&entries);
        assert_eq!(parse_entries(&bytes).unwrap(), entries);
    }

    #[test]
    fn children_log_applies_mutations() {
        let mut entries = Entries::new();
        entries.insert("keep".into(), entry(3));
        entries.insert("drop".into(), entry(4));
        let mut log = unparse_entries(&entries);

        let txn_entry = DirEntry {
            kind: NodeKind::Dir,
            id: NodeRevId {
                node_id: IdPart::txn_local(7),
                copy_id: IdPart::txn_local(0),
                token: Token::Txn(TxnId { base_rev: 1, seq: 2 }),
            },
        };
        hashdump::append_set(&mut log, "fresh", txn_entry.unparse().as_bytes());
        hashdump::append_delete(&mut log, "drop");

        let merged = parse_children_log(&log).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["fresh"], txn_entry);
        assert!(!merged.contains_key("drop"));
    }
}
