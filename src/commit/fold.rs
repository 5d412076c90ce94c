//! Folding the transaction's change log into the minimal per-path set
//! written into the revision's changed-paths block.

use crate::errors::{FsError, Result};
use crate::node::change::{ChangeKind, ChangeRecord};
use std::collections::BTreeMap;

/// True when CHILD lies strictly below PARENT.
pub(crate) fn is_child(parent: &str, child: &str) -> bool {
    if parent == "/" {
        return child != "/";
    }
    child.len() > parent.len() + 1
        && child.starts_with(parent)
        && child.as_bytes()[parent.len()] == b'/'
}

/// Collapse RECORDS into one change per path.
///
/// The rules: `reset` cancels all prior changes on the path; a `delete`
/// cancels a same-transaction `add` entirely and overrides anything else;
/// an `add` after a `delete` becomes a `replace`; consecutive `modify`
/// records union their mod flags. A `delete` or `replace` of a directory
/// drops all recorded changes below it.
///
/// # Errors
/// `Corrupt` on impossible orderings (the sanity checks mirror the change
/// log writer's guarantees).
pub fn fold_changes(records: &[ChangeRecord]) -> Result<BTreeMap<String, ChangeRecord>> {
    let mut folded: BTreeMap<String, ChangeRecord> = BTreeMap::new();

    for change in records {
        fold_one(&mut folded, change)?;

        // A deletion or replacement wipes out recorded changes on
        // descendants; the new subtree starts from a clean slate.
        if matches!(change.kind, ChangeKind::Delete | ChangeKind::Replace) {
            let path = change.path.clone();
            folded.retain(|other, _| !is_child(&path, other));
        }
    }
    Ok(folded)
}

fn fold_one(
    folded: &mut BTreeMap<String, ChangeRecord>,
    change: &ChangeRecord,
) -> Result<()> {
    let Some(old_change) = folded.get_mut(&change.path) else {
        if change.kind == ChangeKind::Reset {
            return Ok(());
        }
        if change.id.is_none() {
            return Err(FsError::Corrupt("missing required node revision ID".into()));
        }
        folded.insert(change.path.clone(), change.clone());
        return Ok(());
    };

    // Sanity checks on the ordering the editor may produce.
    if change.id.is_none() && change.kind != ChangeKind::Reset {
        return Err(FsError::Corrupt("missing required node revision ID".into()));
    }
    if let Some(id) = &change.id
        && old_change.id.as_ref() != Some(id)
        && old_change.kind != ChangeKind::Delete
    {
        return Err(FsError::Corrupt(
            "invalid change ordering: new node revision ID without delete".into(),
        ));
    }
    if old_change.kind == ChangeKind::Delete
        && !matches!(change.kind, ChangeKind::Replace | ChangeKind::Reset | ChangeKind::Add)
    {
        return Err(FsError::Corrupt(
            "invalid change ordering: non-add change on deleted path".into(),
        ));
    }
    if change.kind == ChangeKind::Add && old_change.kind != ChangeKind::Delete {
        return Err(FsError::Corrupt(
            "invalid change ordering: add change on preexisting path".into(),
        ));
    }

    match change.kind {
        ChangeKind::Reset => {
            folded.remove(&change.path);
        }
        ChangeKind::Delete => {
            if old_change.kind == ChangeKind::Add {
                // Added and deleted within this transaction: no change.
                folded.remove(&change.path);
            } else {
                old_change.kind = ChangeKind::Delete;
                old_change.text_mod = change.text_mod;
                old_change.prop_mod = change.prop_mod;
                old_change.copyfrom = None;
                old_change.node_kind = change.node_kind;
            }
        }
        ChangeKind::Add | ChangeKind::Replace => {
            // An add here follows a delete, so it is a replacement.
            old_change.kind = ChangeKind::Replace;
            old_change.id = change.id;
            old_change.text_mod = change.text_mod;
            old_change.prop_mod = change.prop_mod;
            old_change.copyfrom = change.copyfrom.clone();
            old_change.node_kind = change.node_kind;
        }
        ChangeKind::Modify => {
            old_change.text_mod |= change.text_mod;
            old_change.prop_mod |= change.prop_mod;
            old_change.node_kind = change.node_kind;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::id::{IdPart, NodeRevId, Token, TxnId};
    use crate::node::noderev::NodeKind;

    fn id(number: u64) -> NodeRevId {
        NodeRevId {
            node_id: IdPart::txn_local(number),
            copy_id: IdPart::txn_local(0),
            token: Token::Txn(TxnId { base_rev: 1, seq: 0 }),
        }
    }

    fn change(path: &str, number: u64, kind: ChangeKind) -> ChangeRecord {
        ChangeRecord {
            path: path.to_string(),
            id: Some(id(number)),
            kind,
            text_mod: false,
            prop_mod: false,
            node_kind: Some(NodeKind::File),
            copyfrom: None,
        }
    }

    #[test]
    fn add_then_delete_cancels_out() {
        let records =
            vec![change("/a", 1, ChangeKind::Add), change("/a", 1, ChangeKind::Delete)];
        assert!(fold_changes(&records).unwrap().is_empty());
    }

    #[test]
    fn add_after_delete_is_replace() {
        let records = vec![
            change("/a", 1, ChangeKind::Delete),
            change("/a", 2, ChangeKind::Add),
        ];
        let folded = fold_changes(&records).unwrap();
        assert_eq!(folded["/a"].kind, ChangeKind::Replace);
        assert_eq!(folded["/a"].id, Some(id(2)));
    }

    #[test]
    fn modifies_union_their_flags() {
        let mut first = change("/a", 1, ChangeKind::Modify);
        first.text_mod = true;
        let mut second = change("/a", 1, ChangeKind::Modify);
        second.prop_mod = true;
        let folded = fold_changes(&[first, second]).unwrap();
        assert!(folded["/a"].text_mod && folded["/a"].prop_mod);
    }

    #[test]
    fn add_then_modify_keeps_the_add() {
        let mut modify = change("/a", 1, ChangeKind::Modify);
        modify.text_mod = true;
        let folded = fold_changes(&[change("/a", 1, ChangeKind::Add), modify]).unwrap();
        assert_eq!(folded["/a"].kind, ChangeKind::Add);
        assert!(folded["/a"].text_mod);
    }

    #[test]
    fn delete_of_dir_drops_descendants() {
        let mut dir_delete = change("/d", 1, ChangeKind::Delete);
        dir_delete.node_kind = Some(NodeKind::Dir);
        let records = vec![
            change("/d/inner", 2, ChangeKind::Modify),
            change("/dx", 3, ChangeKind::Modify),
            dir_delete,
        ];
        let folded = fold_changes(&records).unwrap();
        assert!(folded.contains_key("/d"));
        assert!(!folded.contains_key("/d/inner"));
        assert!(folded.contains_key("/dx"), "sibling with a shared name prefix survives");
    }

    #[test]
    fn reset_cancels_everything_prior() {
        let mut reset = change("/a", 1, ChangeKind::Reset);
        reset.id = None;
        let folded = fold_changes(&[change("/a", 1, ChangeKind::Add), reset]).unwrap();
        assert!(folded.is_empty());
    }

    #[test]
    fn new_id_without_delete_is_corrupt() {
        let records =
            vec![change("/a", 1, ChangeKind::Modify), change("/a", 2, ChangeKind::Modify)];
        assert!(matches!(fold_changes(&records), Err(FsError::Corrupt(_))));
    }
}
