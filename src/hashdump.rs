//! Textual hash serialisation used for directory contents, transaction
//! properties and revision properties.
//!
//! Full dumps are `K <len>\n<key>\nV <len>\n<value>\n ... END\n`. The
//! incremental variant appended to mutable-directory logs adds
//! `D <len>\n<key>\n` deletion records after the initial dump.

use crate::errors::{FsError, Result};
use std::collections::BTreeMap;

pub type HashMapDump = BTreeMap<String, Vec<u8>>;

/// Serialize MAP as a terminated hash dump.
pub fn write_hash(out: &mut Vec<u8>, map: &HashMapDump) {
    for (key, value) in map {
        append_set(out, key, value);
    }
    out.extend_from_slice(b"END\n");
}

/// Append one `K`/`V` record pair.
pub fn append_set(out: &mut Vec<u8>, key: &str, value: &[u8]) {
    out.extend_from_slice(format!("K {}\n", key.len()).as_bytes());
    out.extend_from_slice(key.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(format!("V {}\n", value.len()).as_bytes());
    out.extend_from_slice(value);
    out.push(b'\n');
}

/// Append one `D` deletion record.
pub fn append_delete(out: &mut Vec<u8>, key: &str) {
    out.extend_from_slice(format!("D {}\n", key.len()).as_bytes());
    out.extend_from_slice(key.as_bytes());
    out.push(b'\n');
}

fn read_line<'a>(data: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let rest = &data[*pos..];
    let end = rest
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| FsError::Corrupt("hash dump: unterminated line".into()))?;
    *pos += end + 1;
    Ok(&rest[..end])
}

fn read_counted<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    if data.len() < *pos + len + 1 {
        return Err(FsError::Corrupt("hash dump: truncated record".into()));
    }
    let body = &data[*pos..*pos + len];
    if data[*pos + len] != b'\n' {
        return Err(FsError::Corrupt("hash dump: record not newline-terminated".into()));
    }
    *pos += len + 1;
    Ok(body)
}

fn parse_len(line: &[u8], tag: u8) -> Result<usize> {
    if line.len() < 2 || line[0] != tag || line[1] != b' ' {
        return Err(FsError::Corrupt(format!(
            "hash dump: malformed '{}' header",
            char::from(tag)
        )));
    }
    std::str::from_utf8(&line[2..])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| FsError::Corrupt("hash dump: bad length field".into()))
}

/// Parse a terminated hash dump starting at `*pos`; advances `*pos` past
/// the `END` line.
///
/// # Errors
/// `Corrupt` on framing violations or a missing terminator.
pub fn parse_hash(data: &[u8], pos: &mut usize) -> Result<HashMapDump> {
    let mut map = HashMapDump::new();
    loop {
        let line = read_line(data, pos)?;
        if line == b"END" {
            return Ok(map);
        }
        let klen = parse_len(line, b'K')?;
        let key = read_counted(data, pos, klen)?;
        let key = String::from_utf8(key.to_vec())
            .map_err(|_| FsError::Corrupt("hash dump: key is not UTF-8".into()))?;
        let vline = read_line(data, pos)?;
        let vlen = parse_len(vline, b'V')?;
        let value = read_counted(data, pos, vlen)?.to_vec();
        map.insert(key, value);
    }
}

/// Parse a full dump followed by incremental `K`/`V` and `D` records until
/// the end of DATA, applying each record in order.
///
/// # Errors
/// `Corrupt` on framing violations.
pub fn parse_incremental(data: &[u8]) -> Result<HashMapDump> {
    let mut pos = 0usize;
    let mut map = parse_hash(data, &mut pos)?;
    while pos < data.len() {
        let line = read_line(data, &mut pos)?;
        if line.is_empty() {
            continue;
        }
        match line[0] {
            b'K' => {
                let klen = parse_len(line, b'K')?;
                let key = read_counted(data, &mut pos, klen)?;
                let key = String::from_utf8(key.to_vec())
                    .map_err(|_| FsError::Corrupt("hash dump: key is not UTF-8".into()))?;
                let vline = read_line(data, &mut pos)?;
                let vlen = parse_len(vline, b'V')?;
                let value = read_counted(data, &mut pos, vlen)?.to_vec();
                map.insert(key, value);
            }
            b'D' => {
                let klen = parse_len(line, b'D')?;
                let key = read_counted(data, &mut pos, klen)?;
                map.remove(std::str::from_utf8(key).unwrap_or(""));
            }
            _ => {
                return Err(FsError::Corrupt("hash dump: unknown incremental record".into()));
            }
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_map() {
        let mut map = HashMapDump::new();
        map.insert("svn:log".into(), b"init".to_vec());
        map.insert("svn:author".into(), b"alice".to_vec());
        let mut out = Vec::new();
        write_hash(&mut out, &map);

        let mut pos = 0;
        let parsed = parse_hash(&out, &mut pos).unwrap();
        assert_eq!(parsed, map);
        assert_eq!(pos, out.len());
    }

    #[test]
    fn empty_map_is_just_end() {
        let mut out = Vec::new();
        write_hash(&mut out, &HashMapDump::new());
        assert_eq!(out, b"END\n");
    }

    #[test]
    fn incremental_records_apply_in_order() {
        let mut out = Vec::new();
        let mut base = HashMapDump::new();
        base.insert("a".into(), b"dir 1.r0/2".to_vec());
        base.insert("b".into(), b"file 2.r0/3".to_vec());
        write_hash(&mut out, &base);
        append_set(&mut out, "c", b"file 3.r0/4");
        append_delete(&mut out, "a");
        append_set(&mut out, "b", b"file 9.r0/9");

        let merged = parse_incremental(&out).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged["b"], b"file 9.r0/9".to_vec());
        assert!(merged.contains_key("c"));
    }

    #[test]
    fn truncated_dump_is_corrupt() {
        let data = b"K 3\nfoo\nV 5\nbar";
        let mut pos = 0;
        assert!(matches!(parse_hash(data, &mut pos), Err(FsError::Corrupt(_))));
    }

    #[test]
    fn binary_values_survive() {
        let mut map = HashMapDump::new();
        map.insert("blob".into(), vec![0u8, 10, 13, 255]);
        let mut out = Vec::new();
        write_hash(&mut out, &map);
        let mut pos = 0;
        assert_eq!(parse_hash(&out, &mut pos).unwrap()["blob"], vec![0u8, 10, 13, 255]);
    }
}
