use crate::errors::{FsError, Result};
use std::fmt;

/// A committed revision number.
pub type Revision = u64;

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Render VALUE in base-36 (lowercase).
#[must_use]
pub fn to_base36(mut value: u64) -> String {
    let mut buf = [0u8; 13];
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = BASE36[(value % 36) as usize];
        value /= 36;
        if value == 0 {
            break;
        }
    }
    String::from_utf8_lossy(&buf[i..]).into_owned()
}

/// Parse a base-36 number.
///
/// # Errors
/// `Corrupt` on an empty or non-base-36 string.
pub fn from_base36(text: &str) -> Result<u64> {
    if text.is_empty() {
        return Err(FsError::Corrupt("empty base-36 number".into()));
    }
    let mut value: u64 = 0;
    for c in text.bytes() {
        let digit = match c {
            b'0'..=b'9' => c - b'0',
            b'a'..=b'z' => c - b'a' + 10,
            _ => return Err(FsError::Corrupt(format!("bad base-36 digit in '{text}'"))),
        };
        value = value
            .checked_mul(36)
            .and_then(|v| v.checked_add(u64::from(digit)))
            .ok_or_else(|| FsError::Corrupt(format!("base-36 overflow in '{text}'")))?;
    }
    Ok(value)
}

/// Transaction identifier: the base revision plus a repository-wide
/// sequence number. Rendered `<base_rev>-<seq base36>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxnId {
    pub base_rev: Revision,
    pub seq: u64,
}

impl TxnId {
    /// # Errors
    /// `Corrupt` if TEXT is not `<rev>-<seq>`.
    pub fn parse(text: &str) -> Result<Self> {
        let (rev, seq) = text
            .split_once('-')
            .ok_or_else(|| FsError::Corrupt(format!("malformed txn id '{text}'")))?;
        let base_rev = rev
            .parse::<u64>()
            .map_err(|_| FsError::Corrupt(format!("malformed txn id '{text}'")))?;
        Ok(Self { base_rev, seq: from_base36(seq)? })
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.base_rev, to_base36(self.seq))
    }
}

/// One component of a node-revision id: a `(revision, number)` pair where
/// the revision is the "unspecified" sentinel until commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdPart {
    pub revision: Option<Revision>,
    pub number: u64,
}

impl IdPart {
    #[must_use]
    pub fn committed(revision: Revision, number: u64) -> Self {
        Self { revision: Some(revision), number }
    }

    #[must_use]
    pub fn txn_local(number: u64) -> Self {
        Self { revision: None, number }
    }

    /// Replace the unspecified sentinel with REVISION; committed parts are
    /// left alone.
    pub fn finalize(&mut self, revision: Revision) {
        if self.revision.is_none() {
            self.revision = Some(revision);
        }
    }

    fn unparse(self) -> String {
        match self.revision {
            None => format!("_{}", to_base36(self.number)),
            Some(rev) => format!("{}-{}", to_base36(self.number), rev),
        }
    }

    fn parse(text: &str) -> Result<Self> {
        if let Some(rest) = text.strip_prefix('_') {
            return Ok(Self { revision: None, number: from_base36(rest)? });
        }
        let (number, rev) = text
            .split_once('-')
            .ok_or_else(|| FsError::Corrupt(format!("malformed id part '{text}'")))?;
        Ok(Self {
            revision: Some(
                rev.parse::<u64>()
                    .map_err(|_| FsError::Corrupt(format!("malformed id part '{text}'")))?,
            ),
            number: from_base36(number)?,
        })
    }
}

/// The addressing token of a node-revision: its place in a committed
/// revision, or the transaction it still lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Revision { revision: Revision, item: u64 },
    Txn(TxnId),
}

/// Node-revision identifier.
///
/// Textual form `r<rev>/<item base36>.<node>.<copy>` for committed nodes,
/// `t<txn-id>.<node>.<copy>` inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRevId {
    pub node_id: IdPart,
    pub copy_id: IdPart,
    pub token: Token,
}

impl NodeRevId {
    /// True iff this id still addresses an uncommitted node.
    #[must_use]
    pub fn is_txn(&self) -> bool {
        matches!(self.token, Token::Txn(_))
    }

    #[must_use]
    pub fn txn_id(&self) -> Option<TxnId> {
        match self.token {
            Token::Txn(txn_id) => Some(txn_id),
            Token::Revision { .. } => None,
        }
    }

    /// Revision and item index of a committed node.
    #[must_use]
    pub fn rev_item(&self) -> Option<(Revision, u64)> {
        match self.token {
            Token::Revision { revision, item } => Some((revision, item)),
            Token::Txn(_) => None,
        }
    }

    #[must_use]
    pub fn unparse(&self) -> String {
        let token = match self.token {
            Token::Revision { revision, item } => {
                format!("r{}/{}", revision, to_base36(item))
            }
            Token::Txn(txn_id) => format!("t{txn_id}"),
        };
        format!("{}.{}.{}", token, self.node_id.unparse(), self.copy_id.unparse())
    }

    /// # Errors
    /// `Corrupt` if TEXT is not a well-formed id.
    pub fn parse(text: &str) -> Result<Self> {
        let mut fields = text.splitn(3, '.');
        let token_text = fields.next().unwrap_or("");
        let node_text = fields
            .next()
            .ok_or_else(|| FsError::Corrupt(format!("malformed node-rev id '{text}'")))?;
        let copy_text = fields
            .next()
            .ok_or_else(|| FsError::Corrupt(format!("malformed node-rev id '{text}'")))?;

        let token = if let Some(rest) = token_text.strip_prefix('r') {
            let (rev, item) = rest
                .split_once('/')
                .ok_or_else(|| FsError::Corrupt(format!("malformed node-rev id '{text}'")))?;
            Token::Revision {
                revision: rev
                    .parse::<u64>()
                    .map_err(|_| FsError::Corrupt(format!("malformed node-rev id '{text}'")))?,
                item: from_base36(item)?,
            }
        } else if let Some(rest) = token_text.strip_prefix('t') {
            Token::Txn(TxnId::parse(rest)?)
        } else {
            return Err(FsError::Corrupt(format!("malformed node-rev id '{text}'")));
        };

        Ok(Self { node_id: IdPart::parse(node_text)?, copy_id: IdPart::parse(copy_text)?, token })
    }
}

impl fmt::Display for NodeRevId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unparse())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base36_round_trips() {
        for v in [0u64, 1, 35, 36, 1295, u64::MAX] {
            assert_eq!(from_base36(&to_base36(v)).unwrap(), v);
        }
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert!(from_base36("NOPE!").is_err());
    }

    #[test]
    fn committed_id_round_trips() {
        let id = NodeRevId {
            node_id: IdPart::committed(1, 3),
            copy_id: IdPart::committed(1, 0),
            token: Token::Revision { revision: 2, item: 4 },
        };
        let text = id.unparse();
        assert_eq!(text, "r2/4.3-1.0-1");
        assert_eq!(NodeRevId::parse(&text).unwrap(), id);
        assert!(!id.is_txn());
    }

    #[test]
    fn txn_id_round_trips() {
        let id = NodeRevId {
            node_id: IdPart::txn_local(5),
            copy_id: IdPart::txn_local(0),
            token: Token::Txn(TxnId { base_rev: 7, seq: 37 }),
        };
        let text = id.unparse();
        assert_eq!(text, "t7-11._5._0");
        assert_eq!(NodeRevId::parse(&text).unwrap(), id);
        assert!(id.is_txn());
    }

    #[test]
    fn finalize_replaces_only_the_sentinel() {
        let mut part = IdPart::txn_local(9);
        part.finalize(4);
        assert_eq!(part, IdPart::committed(4, 9));
        part.finalize(5);
        assert_eq!(part.revision, Some(4));
    }
}
