//! The log-to-phys and phys-to-log index engine.
//!
//! During a transaction both indexes are grown as raw fixed-record proto
//! files ([`proto`]); commit turns them into the packed, read-only final
//! files ([`l2p`], [`p2l`]).

pub mod l2p;
pub mod p2l;
pub mod proto;

use crate::errors::{FsError, Result};

/// Item indexes below this value are reserved.
pub const ITEM_INDEX_FIRST_USER: u64 = 3;
/// Reserved item index of the root node-revision.
pub const ITEM_INDEX_ROOT_NODE: u64 = 2;
/// Reserved item index of the changed-paths list.
pub const ITEM_INDEX_CHANGES: u64 = 1;
/// The "no item" index.
pub const ITEM_INDEX_UNUSED: u64 = 0;

/// What a phys-to-log entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemType {
    Unused,
    FileRep,
    DirRep,
    FileProps,
    DirProps,
    NodeRev,
    Changes,
}

impl ItemType {
    #[must_use]
    pub fn as_u64(self) -> u64 {
        match self {
            ItemType::Unused => 0,
            ItemType::FileRep => 1,
            ItemType::DirRep => 2,
            ItemType::FileProps => 3,
            ItemType::DirProps => 4,
            ItemType::NodeRev => 5,
            ItemType::Changes => 6,
        }
    }

    /// # Errors
    /// `IndexCorruption` on an unknown type tag.
    pub fn from_u64(value: u64) -> Result<Self> {
        Ok(match value {
            0 => ItemType::Unused,
            1 => ItemType::FileRep,
            2 => ItemType::DirRep,
            3 => ItemType::FileProps,
            4 => ItemType::DirProps,
            5 => ItemType::NodeRev,
            6 => ItemType::Changes,
            other => {
                return Err(FsError::IndexCorruption(format!("unknown item type {other}")));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_types_round_trip() {
        for t in [
            ItemType::Unused,
            ItemType::FileRep,
            ItemType::DirRep,
            ItemType::FileProps,
            ItemType::DirProps,
            ItemType::NodeRev,
            ItemType::Changes,
        ] {
            assert_eq!(ItemType::from_u64(t.as_u64()).unwrap(), t);
        }
        assert!(ItemType::from_u64(99).is_err());
    }
}
