use crate::errors::{FsError, Result};
use crate::node::id::{NodeRevId, Revision};
use crate::node::rep::Representation;

/// Kind of tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Dir,
}

impl NodeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::File => "file",
            NodeKind::Dir => "dir",
        }
    }

    /// # Errors
    /// `Corrupt` on anything but `file` or `dir`.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "file" => Ok(NodeKind::File),
            "dir" => Ok(NodeKind::Dir),
            other => Err(FsError::Corrupt(format!("unknown node kind '{other}'"))),
        }
    }
}

/// One node-revision record, as stored in transaction directories and in
/// committed revision files.
///
/// The record is a `key: value` block terminated by a blank line:
///
/// ```text
/// id: r1/4.2-1.0-1
/// type: file
/// pred: r0/2.2-0.0-0
/// count: 1
/// text: 1 5 21 128 <md5>
/// props: 1 6 14 14 <md5>
/// cpath: /a
/// copyroot: 0 /
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRevision {
    pub kind: NodeKind,
    pub id: NodeRevId,
    pub predecessor: Option<NodeRevId>,
    pub predecessor_count: u64,
    pub text_rep: Option<Representation>,
    pub prop_rep: Option<Representation>,
    pub created_path: String,
    /// `None` means "the revision being committed".
    pub copyroot_rev: Option<Revision>,
    pub copyroot_path: String,
    pub copyfrom: Option<(Revision, String)>,
    pub mergeinfo_count: u64,
    pub has_mergeinfo: bool,
    pub is_fresh_txn_root: bool,
}

impl NodeRevision {
    #[must_use]
    pub fn new(kind: NodeKind, id: NodeRevId, created_path: &str) -> Self {
        Self {
            kind,
            id,
            predecessor: None,
            predecessor_count: 0,
            text_rep: None,
            prop_rep: None,
            created_path: created_path.to_string(),
            copyroot_rev: None,
            copyroot_path: "/".to_string(),
            copyfrom: None,
            mergeinfo_count: 0,
            has_mergeinfo: false,
            is_fresh_txn_root: false,
        }
    }

    /// Serialize the record, including the blank-line terminator.
    #[must_use]
    pub fn unparse(&self) -> Vec<u8> {
        let mut out = String::new();
        out.push_str(&format!("id: {}\n", self.id.unparse()));
        out.push_str(&format!("type: {}\n", self.kind.as_str()));
        if let Some(pred) = &self.predecessor {
            out.push_str(&format!("pred: {}\n", pred.unparse()));
        }
        out.push_str(&format!("count: {}\n", self.predecessor_count));
        if let Some(rep) = &self.text_rep {
            out.push_str(&format!("text: {}\n", rep.unparse()));
        }
        if let Some(rep) = &self.prop_rep {
            out.push_str(&format!("props: {}\n", rep.unparse()));
        }
        out.push_str(&format!("cpath: {}\n", self.created_path));
        match self.copyroot_rev {
            Some(rev) => out.push_str(&format!("copyroot: {} {}\n", rev, self.copyroot_path)),
            None => out.push_str(&format!("copyroot: -1 {}\n", self.copyroot_path)),
        }
        if let Some((rev, path)) = &self.copyfrom {
            out.push_str(&format!("copyfrom: {rev} {path}\n"));
        }
        if self.mergeinfo_count > 0 {
            out.push_str(&format!("minfo-cnt: {}\n", self.mergeinfo_count));
        }
        if self.has_mergeinfo {
            out.push_str("minfo-here: true\n");
        }
        if self.is_fresh_txn_root {
            out.push_str("is-fresh-txn-root: true\n");
        }
        out.push('\n');
        out.into_bytes()
    }

    /// Parse one record starting at `*pos`; advances `*pos` past the blank
    /// terminator line.
    ///
    /// # Errors
    /// `Corrupt` on framing or field errors.
    pub fn parse(data: &[u8], pos: &mut usize) -> Result<Self> {
        let corrupt = |what: &str| FsError::Corrupt(format!("node-revision: {what}"));

        let mut id = None;
        let mut kind = None;
        let mut predecessor = None;
        let mut predecessor_count = 0;
        let mut text_rep = None;
        let mut prop_rep = None;
        let mut created_path = None;
        let mut copyroot_rev = None;
        let mut copyroot_path = "/".to_string();
        let mut copyfrom = None;
        let mut mergeinfo_count = 0;
        let mut has_mergeinfo = false;
        let mut is_fresh_txn_root = false;

        loop {
            let rest = &data[*pos..];
            let end = rest
                .iter()
                .position(|&b| b == b'\n')
                .ok_or_else(|| corrupt("missing terminator"))?;
            *pos += end + 1;
            if end == 0 {
                break;
            }
            let line = std::str::from_utf8(&rest[..end])
                .map_err(|_| corrupt("record is not UTF-8"))?;
            let (key, value) =
                line.split_once(": ").ok_or_else(|| corrupt("missing ': ' separator"))?;
            match key {
                "id" => id = Some(NodeRevId::parse(value)?),
                "type" => kind = Some(NodeKind::parse(value)?),
                "pred" => predecessor = Some(NodeRevId::parse(value)?),
                "count" => {
                    predecessor_count =
                        value.parse::<u64>().map_err(|_| corrupt("bad count"))?;
                }
                "text" => text_rep = Some(Representation::parse(value)?),
                "props" => prop_rep = Some(Representation::parse(value)?),
                "cpath" => created_path = Some(value.to_string()),
                "copyroot" => {
                    let (rev, path) =
                        value.split_once(' ').ok_or_else(|| corrupt("bad copyroot"))?;
                    copyroot_rev = if rev == "-1" {
                        None
                    } else {
                        Some(rev.parse::<u64>().map_err(|_| corrupt("bad copyroot"))?)
                    };
                    copyroot_path = path.to_string();
                }
                "copyfrom" => {
                    let (rev, path) =
                        value.split_once(' ').ok_or_else(|| corrupt("bad copyfrom"))?;
                    copyfrom = Some((
                        rev.parse::<u64>().map_err(|_| corrupt("bad copyfrom"))?,
                        path.to_string(),
                    ));
                }
                "minfo-cnt" => {
                    mergeinfo_count =
                        value.parse::<u64>().map_err(|_| corrupt("bad minfo-cnt"))?;
                }
                "minfo-here" => has_mergeinfo = value == "true",
                "is-fresh-txn-root" => is_fresh_txn_root = value == "true",
                _ => return Err(corrupt(&format!("unknown field '{key}'"))),
            }
        }

        Ok(Self {
            kind: kind.ok_or_else(|| corrupt("missing type"))?,
            id: id.ok_or_else(|| corrupt("missing id"))?,
            predecessor,
            predecessor_count,
            text_rep,
            prop_rep,
            created_path: created_path.ok_or_else(|| corrupt("missing cpath"))?,
            copyroot_rev,
            copyroot_path,
            copyfrom,
            mergeinfo_count,
            has_mergeinfo,
            is_fresh_txn_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::id::{IdPart, Token, TxnId};

    fn sample() -> NodeRevision {
        let txn_id = TxnId { base_rev: 1, seq: 0 };
        let mut noderev = NodeRevision::new(
            NodeKind::File,
            NodeRevId {
                node_id: IdPart::txn_local(2),
                copy_id: IdPart::txn_local(0),
                token: Token::Txn(txn_id),
            },
            "/a",
        );
        noderev.predecessor = Some(NodeRevId {
            node_id: IdPart::committed(0, 2),
            copy_id: IdPart::committed(0, 0),
            token: Token::Revision { revision: 0, item: 5 },
        });
        noderev.predecessor_count = 1;
        noderev.copyfrom = Some((0, "/old".into()));
        noderev.is_fresh_txn_root = true;
        noderev
    }

    #[test]
    fn record_round_trips() {
        let noderev = sample();
        let bytes = noderev.unparse();
        let mut pos = 0;
        let parsed = NodeRevision::parse(&bytes, &mut pos).unwrap();
        assert_eq!(parsed, noderev);
        assert_eq!(pos, bytes.len());
    }

    #[test]
    fn two_records_parse_in_sequence() {
        let mut bytes = sample().unparse();
        let mut second = sample();
        second.is_fresh_txn_root = false;
        second.copyfrom = None;
        bytes.extend_from_slice(&second.unparse());

        let mut pos = 0;
        let first = NodeRevision::parse(&bytes, &mut pos).unwrap();
        let next = NodeRevision::parse(&bytes, &mut pos).unwrap();
        assert!(first.is_fresh_txn_root);
        assert!(!next.is_fresh_txn_root);
    }

    #[test]
    fn missing_type_is_corrupt() {
        let data = b"id: r0/2.0-0.0-0\ncpath: /\ncopyroot: 0 /\n\n";
        let mut pos = 0;
        assert!(matches!(
            NodeRevision::parse(data, &mut pos),
            Err(FsError::Corrupt(_))
        ));
    }
}
