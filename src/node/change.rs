use crate::errors::{FsError, Result};
use crate::node::id::{NodeRevId, Revision};
use crate::node::noderev::NodeKind;

/// What happened to a path in a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Delete,
    Replace,
    Modify,
    Reset,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Delete => "delete",
            ChangeKind::Replace => "replace",
            ChangeKind::Modify => "modify",
            ChangeKind::Reset => "reset",
        }
    }

    /// # Errors
    /// `Corrupt` on an unknown action name.
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "add" => Ok(ChangeKind::Add),
            "delete" => Ok(ChangeKind::Delete),
            "replace" => Ok(ChangeKind::Replace),
            "modify" => Ok(ChangeKind::Modify),
            "reset" => Ok(ChangeKind::Reset),
            other => Err(FsError::Corrupt(format!("unknown change kind '{other}'"))),
        }
    }
}

/// One record of the changed-paths list.
///
/// Framing is two newline-terminated lines per record:
///
/// ```text
/// <id> <action>[-<kind>] <text-mod> <prop-mod> <path>
/// [<copyfrom-rev> <copyfrom-path>]
/// ```
///
/// The id field is `-` for `reset` records and the second line is empty
/// when the change has no copy history. A list is terminated by one extra
/// empty line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub path: String,
    pub id: Option<NodeRevId>,
    pub kind: ChangeKind,
    pub text_mod: bool,
    pub prop_mod: bool,
    pub node_kind: Option<NodeKind>,
    pub copyfrom: Option<(Revision, String)>,
}

impl ChangeRecord {
    #[must_use]
    pub fn unparse(&self) -> Vec<u8> {
        let id = self.id.as_ref().map_or_else(|| "-".to_string(), NodeRevId::unparse);
        let action = match self.node_kind {
            Some(kind) => format!("{}-{}", self.kind.as_str(), kind.as_str()),
            None => self.kind.as_str().to_string(),
        };
        let mut out = format!(
            "{} {} {} {} {}\n",
            id, action, self.text_mod, self.prop_mod, self.path
        );
        if let Some((rev, path)) = &self.copyfrom {
            out.push_str(&format!("{rev} {path}"));
        }
        out.push('\n');
        out.into_bytes()
    }

    /// Parse one record starting at `*pos`. Returns `None` at the list
    /// terminator (an empty line) or at the end of DATA.
    ///
    /// # Errors
    /// `Corrupt` on framing violations.
    pub fn parse(data: &[u8], pos: &mut usize) -> Result<Option<Self>> {
        let corrupt = |what: &str| FsError::Corrupt(format!("changes list: {what}"));
        if *pos >= data.len() {
            return Ok(None);
        }
        let rest = &data[*pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("unterminated record"))?;
        *pos += end + 1;
        if end == 0 {
            return Ok(None);
        }
        let line =
            std::str::from_utf8(&rest[..end]).map_err(|_| corrupt("record is not UTF-8"))?;

        let mut fields = line.splitn(5, ' ');
        let id_field = fields.next().ok_or_else(|| corrupt("missing id"))?;
        let action_field = fields.next().ok_or_else(|| corrupt("missing action"))?;
        let text_field = fields.next().ok_or_else(|| corrupt("missing text-mod"))?;
        let prop_field = fields.next().ok_or_else(|| corrupt("missing prop-mod"))?;
        let path = fields.next().ok_or_else(|| corrupt("missing path"))?.to_string();

        let id = if id_field == "-" { None } else { Some(NodeRevId::parse(id_field)?) };
        let (kind, node_kind) = match action_field.split_once('-') {
            Some((action, kind)) => (ChangeKind::parse(action)?, Some(NodeKind::parse(kind)?)),
            None => (ChangeKind::parse(action_field)?, None),
        };
        let text_mod = text_field == "true";
        let prop_mod = prop_field == "true";

        // Copyfrom line (may be empty).
        let rest = &data[*pos..];
        let end = rest
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| corrupt("missing copyfrom line"))?;
        *pos += end + 1;
        let copyfrom = if end == 0 {
            None
        } else {
            let line = std::str::from_utf8(&rest[..end])
                .map_err(|_| corrupt("copyfrom is not UTF-8"))?;
            let (rev, path) = line.split_once(' ').ok_or_else(|| corrupt("bad copyfrom"))?;
            Some((rev.parse::<u64>().map_err(|_| corrupt("bad copyfrom"))?, path.to_string()))
        };

        Ok(Some(Self { path, id, kind, text_mod, prop_mod, node_kind, copyfrom }))
    }
}

/// Serialize RECORDS as a terminated changes list.
#[must_use]
pub fn unparse_changes(records: &[ChangeRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&record.unparse());
    }
    out.push(b'\n');
    out
}

/// Parse a whole changes list (terminated or running to the end of DATA).
///
/// # Errors
/// `Corrupt` on framing violations.
pub fn parse_changes(data: &[u8]) -> Result<Vec<ChangeRecord>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while let Some(record) = ChangeRecord::parse(data, &mut pos)? {
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::id::{IdPart, Token};

    fn sample_id() -> NodeRevId {
        NodeRevId {
            node_id: IdPart::committed(1, 2),
            copy_id: IdPart::committed(1, 0),
            token: Token::Revision { revision: 1, item: 3 },
        }
    }

    #[test]
    fn records_round_trip() {
        let records = vec![
            ChangeRecord {
                path: "/a".into(),
                id: Some(sample_id()),
                kind: ChangeKind::Add,
                text_mod: true,
                prop_mod: false,
                node_kind: Some(NodeKind::File),
                copyfrom: None,
            },
            ChangeRecord {
                path: "/b c".into(),
                id: Some(sample_id()),
                kind: ChangeKind::Replace,
                text_mod: true,
                prop_mod: true,
                node_kind: Some(NodeKind::Dir),
                copyfrom: Some((1, "/a".into())),
            },
            ChangeRecord {
                path: "/gone".into(),
                id: None,
                kind: ChangeKind::Reset,
                text_mod: false,
                prop_mod: false,
                node_kind: None,
                copyfrom: None,
            },
        ];
        let bytes = unparse_changes(&records);
        assert_eq!(parse_changes(&bytes).unwrap(), records);
    }

    #[test]
    fn paths_with_spaces_survive() {
        let record = ChangeRecord {
            path: "/dir with spaces/file".into(),
            id: Some(sample_id()),
            kind: ChangeKind::Modify,
            text_mod: true,
            prop_mod: false,
            node_kind: Some(NodeKind::File),
            copyfrom: None,
        };
        let bytes = record.unparse();
        let mut pos = 0;
        let parsed = ChangeRecord::parse(&bytes, &mut pos).unwrap().unwrap();
        assert_eq!(parsed.path, "/dir with spaces/file");
    }

    #[test]
    fn empty_list_is_one_blank_line() {
        let bytes = unparse_changes(&[]);
        assert_eq!(bytes, b"\n");
        assert!(parse_changes(&bytes).unwrap().is_empty());
    }
}
