use crate::errors::{FsError, Result};
use crate::node::id::{Revision, TxnId, from_base36, to_base36};
use std::fmt;

/// Uniquifier tag carried by unshared transaction-local reps so that two
/// byte-identical reps written by the same transaction stay distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uniquifier {
    pub txn_id: TxnId,
    pub number: u64,
}

impl fmt::Display for Uniquifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.txn_id, to_base36(self.number))
    }
}

impl Uniquifier {
    fn parse(text: &str) -> Result<Self> {
        let (txn, number) = text
            .split_once('/')
            .ok_or_else(|| FsError::Corrupt(format!("malformed uniquifier '{text}'")))?;
        Ok(Self { txn_id: TxnId::parse(txn)?, number: from_base36(number)? })
    }
}

/// An immutable byte sequence addressed by `(revision, item_index)`.
///
/// While the owning transaction is open the revision is unset and the
/// transaction id marks the rep as mutable; commit replaces the marker
/// with the new revision number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Representation {
    pub revision: Option<Revision>,
    pub item_index: u64,
    /// Bytes occupied in the revision file (delta form).
    pub size: u64,
    /// Bytes of the expanded content.
    pub expanded_size: u64,
    pub md5: Option<[u8; 16]>,
    pub sha1: Option<[u8; 20]>,
    pub uniquifier: Option<Uniquifier>,
    /// Present while the rep is still owned by an open transaction.
    pub txn_id: Option<TxnId>,
}

impl Representation {
    /// A rep that has been promised but whose bytes have not been written
    /// yet (directory contents and property lists are written at commit).
    #[must_use]
    pub fn mutable_placeholder(txn_id: TxnId) -> Self {
        Self {
            revision: None,
            item_index: 0,
            size: 0,
            expanded_size: 0,
            md5: None,
            sha1: None,
            uniquifier: None,
            txn_id: Some(txn_id),
        }
    }

    /// True while the rep still belongs to an open transaction.
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.txn_id.is_some()
    }

    /// Rewrite the transaction marker to the committing revision.
    pub fn finalize(&mut self, revision: Revision) {
        self.txn_id = None;
        self.revision = Some(revision);
    }

    #[must_use]
    pub fn unparse(&self) -> String {
        let mut out = match (self.revision, self.txn_id) {
            (Some(rev), _) => format!("{rev}"),
            (None, Some(txn_id)) => format!("-1 {txn_id}"),
            (None, None) => "-1 -".to_string(),
        };
        if self.md5.is_none() {
            // Placeholder: no content has been written yet.
            return out;
        }
        out.push_str(&format!(
            " {} {} {} {}",
            self.item_index,
            self.size,
            self.expanded_size,
            hex::encode(self.md5.unwrap_or_default())
        ));
        if let Some(sha1) = self.sha1 {
            out.push_str(&format!(" {}", hex::encode(sha1)));
            if let Some(uniquifier) = self.uniquifier {
                out.push_str(&format!(" {uniquifier}"));
            }
        }
        out
    }

    /// # Errors
    /// `Corrupt` if TEXT does not follow the representation string form.
    pub fn parse(text: &str) -> Result<Self> {
        let corrupt = || FsError::Corrupt(format!("malformed representation '{text}'"));
        let mut fields = text.split(' ');
        let rev_field = fields.next().ok_or_else(corrupt)?;

        let (revision, txn_id) = if rev_field == "-1" {
            let txn_field = fields.next().ok_or_else(corrupt)?;
            let txn_id =
                if txn_field == "-" { None } else { Some(TxnId::parse(txn_field)?) };
            (None, txn_id)
        } else {
            (Some(rev_field.parse::<u64>().map_err(|_| corrupt())?), None)
        };

        let Some(item_field) = fields.next() else {
            // Placeholder form: nothing written yet.
            return Ok(Self { txn_id, ..Self::mutable_placeholder(TxnId { base_rev: 0, seq: 0 }) });
        };

        let item_index = item_field.parse::<u64>().map_err(|_| corrupt())?;
        let size = fields.next().ok_or_else(corrupt)?.parse::<u64>().map_err(|_| corrupt())?;
        let expanded_size =
            fields.next().ok_or_else(corrupt)?.parse::<u64>().map_err(|_| corrupt())?;
        let md5_hex = fields.next().ok_or_else(corrupt)?;
        let md5: [u8; 16] =
            hex::decode(md5_hex).ok().and_then(|v| v.try_into().ok()).ok_or_else(corrupt)?;

        let mut sha1 = None;
        let mut uniquifier = None;
        if let Some(sha1_hex) = fields.next() {
            let digest: [u8; 20] = hex::decode(sha1_hex)
                .ok()
                .and_then(|v| v.try_into().ok())
                .ok_or_else(corrupt)?;
            sha1 = Some(digest);
            if let Some(tail) = fields.next() {
                uniquifier = Some(Uniquifier::parse(tail)?);
            }
        }
        if fields.next().is_some() {
            return Err(corrupt());
        }

        Ok(Self {
            revision,
            item_index,
            size,
            expanded_size,
            md5: Some(md5),
            sha1,
            uniquifier,
            txn_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_rep() -> Representation {
        Representation {
            revision: Some(4),
            item_index: 7,
            size: 21,
            expanded_size: 128,
            md5: Some([0x11; 16]),
            sha1: Some([0x22; 20]),
            uniquifier: Some(Uniquifier { txn_id: TxnId { base_rev: 3, seq: 2 }, number: 9 }),
            txn_id: None,
        }
    }

    #[test]
    fn committed_rep_round_trips() {
        let rep = full_rep();
        let text = rep.unparse();
        assert!(text.starts_with("4 7 21 128 "));
        assert_eq!(Representation::parse(&text).unwrap(), rep);
    }

    #[test]
    fn txn_rep_round_trips() {
        let txn_id = TxnId { base_rev: 3, seq: 2 };
        let mut rep = full_rep();
        rep.revision = None;
        rep.txn_id = Some(txn_id);
        let text = rep.unparse();
        assert!(text.starts_with("-1 3-2 "));
        assert_eq!(Representation::parse(&text).unwrap(), rep);
    }

    #[test]
    fn placeholder_rep_round_trips() {
        let rep = Representation::mutable_placeholder(TxnId { base_rev: 5, seq: 1 });
        let text = rep.unparse();
        assert_eq!(text, "-1 5-1");
        let parsed = Representation::parse(&text).unwrap();
        assert!(parsed.is_mutable());
        assert!(parsed.md5.is_none());
    }

    #[test]
    fn finalize_clears_the_marker() {
        let mut rep = Representation::mutable_placeholder(TxnId { base_rev: 5, seq: 1 });
        rep.finalize(6);
        assert!(!rep.is_mutable());
        assert_eq!(rep.revision, Some(6));
    }

    #[test]
    fn sha1_less_rep_omits_the_tail() {
        let mut rep = full_rep();
        rep.sha1 = None;
        rep.uniquifier = None;
        let text = rep.unparse();
        assert_eq!(text.split(' ').count(), 5);
        assert_eq!(Representation::parse(&text).unwrap(), rep);
    }
}
