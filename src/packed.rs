//! 7-bit/byte packed integer codec and a prefetching reader for files made
//! of such numbers. Every index file in the store is a stream of these.

use crate::errors::{FsError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Longest possible encoding of a 64-bit value.
pub const MAX_ENCODED_LEN: usize = 10;

/// How many numbers a [`PackedStream`] prefetches per file read.
const MAX_NUMBER_PREFETCH: usize = 64;

/// Append VALUE to OUT as a little-endian base-128 sequence. Every byte
/// except the last carries the continuation bit.
pub fn write_uint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value % 0x80) as u8 + 0x80);
        value /= 0x80;
    }
    out.push(value as u8);
}

/// Append VALUE to OUT, mapping signed onto unsigned first.
pub fn write_int(out: &mut Vec<u8>, value: i64) {
    write_uint(out, zigzag(value));
}

/// The signed-to-unsigned map used by [`write_int`]:
/// `v < 0 ? -1 - 2v : 2v`.
#[must_use]
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag`].
#[must_use]
pub fn unzigzag(value: u64) -> i64 {
    if value % 2 == 1 { -1 - (value / 2) as i64 } else { (value / 2) as i64 }
}

/// Decode one number from BUF. Returns the value and the encoded length.
///
/// # Errors
/// `IndexCorruption` on an over-long number, `UnexpectedEof` when BUF ends
/// inside a number.
pub fn read_uint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        let chunk = (byte & 0x7f) as u64;
        if shift > 63 || (shift == 63 && chunk > 1) {
            return Err(FsError::IndexCorruption("number too large".into()));
        }
        if byte < 0x80 {
            return Ok((value + (chunk << shift), i + 1));
        }
        value += chunk << shift;
        shift += 7;
    }
    Err(FsError::UnexpectedEof("number extends beyond end of data".into()))
}

/// A buffered value read from the underlying file.
#[derive(Clone, Copy, Default)]
struct ValuePosition {
    value: u64,
    /// Bytes consumed, *including* this number, since the buffer start.
    total_len: u64,
}

/// Prefetching reader over a file of packed numbers.
///
/// Reads are aligned to `block_size` boundaries and decode up to 64 numbers
/// at a time; any trailing incomplete number is re-read by the next refill,
/// so a refill never straddles a value.
pub struct PackedStream {
    file: File,
    buffer: [ValuePosition; MAX_NUMBER_PREFETCH],
    used: usize,
    current: usize,
    /// File offset the first buffered value was read from.
    start_offset: u64,
    /// File offset the next refill starts at.
    next_offset: u64,
    block_size: u64,
    name: String,
}

impl PackedStream {
    /// Open PATH for packed-number reads with the given block size.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path, block_size: u64) -> Result<Self> {
        let file = File::open(path)
            .map_err(FsError::io(format!("opening index '{}'", path.display())))?;
        Ok(Self {
            file,
            buffer: [ValuePosition::default(); MAX_NUMBER_PREFETCH],
            used: 0,
            current: 0,
            start_offset: 0,
            next_offset: 0,
            block_size: block_size.max(MAX_ENCODED_LEN as u64),
            name: path.display().to_string(),
        })
    }

    /// Refill the value buffer from the file.
    fn refill(&mut self) -> Result<()> {
        self.start_offset = self.next_offset;

        let block_start = self.next_offset - self.next_offset % self.block_size;
        self.file
            .seek(SeekFrom::Start(self.next_offset))
            .map_err(FsError::io(format!("seeking index '{}'", self.name)))?;

        // Prefetch at least one number but don't cross the block boundary
        // unless the remainder of the block is too small to hold one.
        let mut want = MAX_NUMBER_PREFETCH as u64;
        let block_left = self.block_size - (self.next_offset - block_start);
        if block_left >= MAX_ENCODED_LEN as u64 && block_left < want {
            want = block_left;
        }

        let mut raw = [0u8; MAX_NUMBER_PREFETCH];
        let mut read = 0usize;
        while read < want as usize {
            let n = self
                .file
                .read(&mut raw[read..want as usize])
                .map_err(FsError::io(format!("reading index '{}'", self.name)))?;
            if n == 0 {
                break;
            }
            read += n;
        }

        // Trim a trailing incomplete number; the next refill rereads it.
        while read > 0 && raw[read - 1] >= 0x80 {
            read -= 1;
        }
        if read == 0 {
            return Err(FsError::UnexpectedEof(format!(
                "index '{}' at offset {:#x}",
                self.name, self.next_offset
            )));
        }

        let mut used = 0usize;
        let mut i = 0usize;
        while i < read {
            let (value, len) = read_uint(&raw[i..read]).map_err(|e| match e {
                FsError::IndexCorruption(_) => FsError::IndexCorruption(format!(
                    "number too large in '{}' near offset {:#x}",
                    self.name,
                    self.start_offset + i as u64
                )),
                other => other,
            })?;
            i += len;
            self.buffer[used] = ValuePosition { value, total_len: i as u64 };
            used += 1;
        }

        self.used = used;
        self.next_offset = self.start_offset + i as u64;
        self.current = 0;
        Ok(())
    }

    /// Return the next number, refilling from the file when exhausted.
    ///
    /// # Errors
    /// `UnexpectedEof` when the file ends before another number.
    pub fn get(&mut self) -> Result<u64> {
        if self.current == self.used {
            self.refill()?;
        }
        let value = self.buffer[self.current].value;
        self.current += 1;
        Ok(value)
    }

    /// Reposition the logical read cursor; cheap while OFFSET is buffered.
    pub fn seek(&mut self, offset: u64) {
        if self.used == 0 || offset < self.start_offset || offset >= self.next_offset {
            self.start_offset = offset;
            self.next_offset = offset;
            self.current = 0;
            self.used = 0;
        } else {
            let rel = offset - self.start_offset;
            let mut i = 0;
            while i < self.used && self.buffer[i].total_len <= rel {
                i += 1;
            }
            self.current = i;
        }
    }

    /// Absolute file offset of the next value to be decoded.
    #[must_use]
    pub fn offset(&self) -> u64 {
        if self.current == 0 {
            self.start_offset
        } else {
            self.start_offset + self.buffer[self.current - 1].total_len
        }
    }
}
