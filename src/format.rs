//! Entry-table codec.
//!
//! # Layout
//! ```text
//! [Header]        96 bytes, see header.rs
//! entry_count     u32
//! per entry:
//!   path_length   u32      unpadded length of the UTF-8 path
//!   path_bytes    path_length bytes, zero-padded to a 4-byte boundary
//!   offset        u64      relative to data_region_offset
//!   length        u64
//!   checksum      16 bytes
//!   entry_flags   u32
//! [Data Region]   starts at data_region_offset
//! ```
//!
//! `encode` and `decode` are pure: they never touch the filesystem.  The
//! data region is written and read by `io_stream`.

use byteorder::{ByteOrder, LittleEndian};
use std::collections::HashSet;

use crate::checksum::CHECKSUM_LEN;
use crate::error::{PckError, Result};
use crate::header::{Header, HEADER_SIZE};
use crate::index::Entry;
use crate::path::{self, MAX_PATH_LEN};

/// Fixed part of an entry record after the padded path.
const RECORD_TAIL_LEN: usize = 8 + 8 + CHECKSUM_LEN + 4;
/// Smallest possible record: empty path plus the fixed fields.
const MIN_RECORD_LEN: usize = 4 + RECORD_TAIL_LEN;

fn padded(len: usize) -> usize {
    (len + 3) & !3
}

/// Encoded size of header plus entry table.
pub fn table_len(entries: &[Entry]) -> u64 {
    let records: usize = entries
        .iter()
        .map(|e| 4 + padded(e.path.len()) + RECORD_TAIL_LEN)
        .sum();
    (HEADER_SIZE + 4 + records) as u64
}

/// Serialize `header` followed by `entries`, in the order given.
///
/// Callers wanting canonical output pass entries sorted by path
/// (`EntryIndex::to_entries` does).  Fails with `CorruptIndex` when the
/// entry count or a path length does not fit the table's `u32` fields.
pub fn encode(header: &Header, entries: &[Entry]) -> Result<Vec<u8>> {
    let count = u32::try_from(entries.len())
        .map_err(|_| PckError::corrupt(format!("{} entries do not fit in one table", entries.len())))?;

    let mut out = Vec::with_capacity(table_len(entries) as usize);
    out.extend_from_slice(&header.to_bytes());

    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, count);
    out.extend_from_slice(&word);

    for e in entries {
        let p = e.path.as_bytes();
        if p.len() > MAX_PATH_LEN {
            return Err(PckError::corrupt(format!("path length {} of {:?}", p.len(), e.path)));
        }
        LittleEndian::write_u32(&mut word, p.len() as u32);
        out.extend_from_slice(&word);
        out.extend_from_slice(p);
        out.resize(out.len() + padded(p.len()) - p.len(), 0);

        let mut tail = [0u8; RECORD_TAIL_LEN];
        LittleEndian::write_u64(&mut tail[0..8], e.offset);
        LittleEndian::write_u64(&mut tail[8..16], e.length);
        tail[16..16 + CHECKSUM_LEN].copy_from_slice(&e.checksum);
        LittleEndian::write_u32(&mut tail[16 + CHECKSUM_LEN..], e.flags);
        out.extend_from_slice(&tail);
    }
    Ok(out)
}

/// Bounds-checked cursor over the table bytes.
struct TableReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> TableReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let available = self.buf.len() - self.pos;
        if n > available {
            return Err(PckError::TruncatedData {
                offset:    self.pos as u64,
                needed:    n as u64,
                available: available as u64,
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

/// Parse header and entry table from the front of `bytes`.
///
/// `bytes` may extend into (or past) the data region; only the header and
/// table are consumed.  Entry ranges are checked against each other here and
/// against the file length by [`check_extent`].
pub fn decode(bytes: &[u8]) -> Result<(Header, Vec<Entry>)> {
    let header = Header::decode(bytes)?;
    let mut r = TableReader { buf: bytes, pos: HEADER_SIZE };

    let count = r.u32()? as usize;
    let mut entries = Vec::with_capacity(count.min(r.remaining() / MIN_RECORD_LEN));

    for i in 0..count {
        let path_len = r.u32()? as usize;
        if path_len > MAX_PATH_LEN {
            return Err(PckError::corrupt(format!("entry {i}: path length {path_len}")));
        }
        let raw = r.take(padded(path_len))?;
        let path = std::str::from_utf8(&raw[..path_len])
            .map_err(|_| PckError::corrupt(format!("entry {i}: path is not UTF-8")))?;
        if !path::is_normalized(path) {
            return Err(PckError::corrupt(format!("entry {i}: non-canonical path {path:?}")));
        }

        let offset = r.u64()?;
        let length = r.u64()?;
        let mut checksum = [0u8; CHECKSUM_LEN];
        checksum.copy_from_slice(r.take(CHECKSUM_LEN)?);
        let flags = r.u32()?;

        entries.push(Entry { path: path.to_owned(), offset, length, checksum, flags });
    }

    let table_end = r.pos as u64;
    if header.data_region_offset < table_end {
        return Err(PckError::corrupt(format!(
            "data region at {} overlaps entry table ending at {table_end}",
            header.data_region_offset
        )));
    }

    check_layout(&entries)?;
    Ok((header, entries))
}

/// Reject duplicate paths, file/directory collisions, overflowing ranges
/// and overlapping ranges.
pub fn check_layout(entries: &[Entry]) -> Result<()> {
    let mut by_path: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    by_path.sort_unstable();
    if let Some(w) = by_path.windows(2).find(|w| w[0] == w[1]) {
        return Err(PckError::corrupt(format!("duplicate path {:?}", w[0])));
    }
    let files: HashSet<&str> = by_path.iter().copied().collect();
    for p in &by_path {
        let mut parent = path::parent(p);
        while !parent.is_empty() {
            if files.contains(parent) {
                return Err(PckError::corrupt(format!("{p:?} is below the file {parent:?}")));
            }
            parent = path::parent(parent);
        }
    }

    let mut ranges = Vec::with_capacity(entries.len());
    for e in entries {
        let end = e
            .end()
            .ok_or_else(|| PckError::corrupt(format!("range of {:?} overflows", e.path)))?;
        if e.length > 0 {
            ranges.push((e.offset, end, e.path.as_str()));
        }
    }
    ranges.sort_unstable();
    for w in ranges.windows(2) {
        if w[1].0 < w[0].1 {
            return Err(PckError::corrupt(format!("{:?} overlaps {:?}", w[0].2, w[1].2)));
        }
    }
    Ok(())
}

/// Check every entry lies inside a container file of `file_len` bytes.
pub fn check_extent(header: &Header, entries: &[Entry], file_len: u64) -> Result<()> {
    if header.data_region_offset > file_len {
        return Err(PckError::corrupt(format!(
            "data region at {} is past end of file ({file_len} bytes)",
            header.data_region_offset
        )));
    }
    let region = file_len - header.data_region_offset;
    for e in entries {
        match e.end() {
            Some(end) if end <= region => {}
            _ => {
                return Err(PckError::corrupt(format!(
                    "{:?} extends past end of file",
                    e.path
                )))
            }
        }
    }
    Ok(())
}
