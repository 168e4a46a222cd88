//! Container I/O: the rebuild writer and the table reader.
//!
//! # Writer
//! [`PckWriter`] takes a complete plan (every entry the new container will
//! hold, each with the source of its bytes), sorts it by path, assigns
//! contiguous data-region offsets, writes header + entry table, then streams
//! every entry's bytes in table order.  Every copied entry is re-hashed on
//! the way through; a mismatch against the planned checksum aborts the write
//! so corruption in a source is never carried into a new container.
//!
//! # Reader
//! [`PckReader`] decodes header and table once, checks every entry lies
//! inside the file, then serves random-access reads by `offset`/`length`.
//! No ordering between entries is assumed.
//!
//! # Endianness
//! All integers are little-endian; see `header.rs` and `format.rs`.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, trace};

use crate::checksum::{Checksum, HashingWriter};
use crate::error::{PckError, Result};
use crate::format::{self, check_extent, table_len};
use crate::header::Header;
use crate::index::Entry;

// ── Cutoff ───────────────────────────────────────────────────────────────────

/// Caller-supplied limit on a long rebuild.
///
/// Checked between entries while the replacement container is written.
/// Tripping it fails the write with `Cancelled`; the staged output is
/// discarded and the original file stays as it was.
#[derive(Debug, Clone, Default)]
pub struct Cutoff {
    pub deadline: Option<Instant>,
    pub cancel:   Option<Arc<AtomicBool>>,
}

impl Cutoff {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn at(deadline: Instant) -> Self {
        Self { deadline: Some(deadline), cancel: None }
    }

    pub fn flag(cancel: Arc<AtomicBool>) -> Self {
        Self { deadline: None, cancel: Some(cancel) }
    }

    pub fn is_tripped(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
            || self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    pub fn check(&self) -> Result<()> {
        if self.is_tripped() { Err(PckError::Cancelled) } else { Ok(()) }
    }
}

// ── Plan ─────────────────────────────────────────────────────────────────────

/// Where a planned entry's bytes come from.
#[derive(Debug, Clone)]
pub enum Source {
    /// Bytes staged in memory.
    Staged(Vec<u8>),
    /// A file on disk, hashed when it was staged.
    File(PathBuf),
    /// The entry's current record in the container being replaced.
    Existing(Entry),
}

/// One entry of a container about to be written.
///
/// `entry.offset` is a placeholder until [`PckWriter::finish`] lays out the
/// data region.
#[derive(Debug, Clone)]
pub struct Planned {
    pub entry:  Entry,
    pub source: Source,
}

impl Planned {
    pub fn new(path: String, length: u64, checksum: Checksum, flags: u32, source: Source) -> Self {
        Self {
            entry: Entry { path, offset: u64::MAX, length, checksum, flags },
            source,
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct PckWriter<W: Write> {
    writer: W,
    header: Header,
    cutoff: Cutoff,
}

impl<W: Write> PckWriter<W> {
    /// `header` supplies version, producer and flags; `data_region_offset`
    /// is recomputed.
    pub fn new(writer: W, header: Header) -> Self {
        Self { writer, header, cutoff: Cutoff::none() }
    }

    pub fn with_cutoff(mut self, cutoff: Cutoff) -> Self {
        self.cutoff = cutoff;
        self
    }

    /// Lay out and write the whole container.
    ///
    /// `Existing` sources are read from `current`.  Returns the writer and the
    /// header and entries exactly as written.
    pub fn finish<R: Read + Seek>(
        mut self,
        mut plan: Vec<Planned>,
        mut current: Option<&mut PckReader<R>>,
    ) -> Result<(W, Header, Vec<Entry>)> {
        plan.sort_by(|a, b| a.entry.path.as_bytes().cmp(b.entry.path.as_bytes()));

        let mut next = 0u64;
        for p in &mut plan {
            p.entry.offset = next;
            next = next
                .checked_add(p.entry.length)
                .ok_or_else(|| PckError::corrupt("data region size overflows"))?;
        }
        let entries: Vec<Entry> = plan.iter().map(|p| p.entry.clone()).collect();
        format::check_layout(&entries)?;

        self.header.data_region_offset = table_len(&entries);
        self.writer.write_all(&format::encode(&self.header, &entries)?)?;
        debug!(
            "writing {} entries, {} data bytes after {}-byte table",
            entries.len(),
            next,
            self.header.data_region_offset
        );

        let mut out = HashingWriter::new(&mut self.writer);
        for p in plan {
            self.cutoff.check()?;
            let before = out.written();
            let mut hashed = HashingWriter::new(&mut out);
            match p.source {
                Source::Staged(bytes) => hashed.write_all(&bytes)?,
                Source::File(fs_path) => {
                    let mut f = File::open(&fs_path).map_err(|e| PckError::io_at(&fs_path, e))?;
                    io::copy(&mut (&mut f).take(p.entry.length), &mut hashed)
                        .map_err(|e| PckError::io_at(&fs_path, e))?;
                }
                Source::Existing(old) => {
                    let reader = current.as_deref_mut().ok_or_else(|| {
                        PckError::corrupt(format!("no source container for {:?}", old.path))
                    })?;
                    reader.copy_raw(&old, &mut hashed)?;
                }
            }
            let (_, sum, len) = hashed.finish();
            if len != p.entry.length || sum != p.entry.checksum {
                return Err(source_changed(&p.entry.path));
            }
            trace!("{} @ {} ({} bytes)", p.entry.path, before, len);
        }
        self.writer.flush()?;
        Ok((self.writer, self.header, entries))
    }
}

fn source_changed(path: &str) -> PckError {
    PckError::IoFailure(io::Error::new(
        io::ErrorKind::InvalidData,
        format!("content of {path:?} does not match its checksum"),
    ))
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct PckReader<R: Read + Seek> {
    reader:      R,
    pub header:  Header,
    pub entries: Vec<Entry>,
    file_len:    u64,
}

impl<R: Read + Seek> PckReader<R> {
    /// Decode header and table and check every entry against the file size.
    /// Fails rather than returning a partial table.
    pub fn new(mut reader: R) -> Result<Self> {
        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let header = Header::read(&mut reader)?;
        let table_end = header.data_region_offset.min(file_len);
        reader.seek(SeekFrom::Start(0))?;
        let mut table = Vec::with_capacity(table_end as usize);
        (&mut reader).take(table_end).read_to_end(&mut table)?;

        // The buffer stops at the data region.  A table that runs past it
        // while the file goes on is a bad offset, not a short file.
        let (header, entries) = match format::decode(&table) {
            Err(PckError::TruncatedData { .. }) if table_end < file_len => {
                return Err(PckError::corrupt(format!(
                    "data region at {} starts inside the entry table",
                    header.data_region_offset
                )));
            }
            decoded => decoded?,
        };
        check_extent(&header, &entries, file_len)?;
        debug!(
            "opened container: v{} producer {} {} entries, data at {}",
            header.format_version,
            header.producer_version,
            entries.len(),
            header.data_region_offset
        );
        Ok(Self { reader, header, entries, file_len })
    }

    pub fn file_len(&self) -> u64 { self.file_len }

    /// Stream an entry's stored bytes to `out` without checking them.
    pub fn copy_raw<W: Write>(&mut self, entry: &Entry, out: &mut W) -> Result<u64> {
        let start = self
            .header
            .data_region_offset
            .checked_add(entry.offset)
            .ok_or_else(|| PckError::corrupt(format!("offset of {:?} overflows", entry.path)))?;
        self.reader.seek(SeekFrom::Start(start))?;
        let copied = io::copy(&mut (&mut self.reader).take(entry.length), out)?;
        if copied < entry.length {
            return Err(PckError::TruncatedData {
                offset:    start + copied,
                needed:    entry.length - copied,
                available: 0,
            });
        }
        Ok(copied)
    }

    /// Stream an entry's bytes to `out`, failing with `CorruptIndex` if they
    /// do not match the recorded checksum.  Bytes already written to `out`
    /// are not recalled.
    pub fn copy_verified<W: Write>(&mut self, entry: &Entry, out: &mut W) -> Result<u64> {
        let mut hashed = HashingWriter::new(out);
        self.copy_raw(entry, &mut hashed)?;
        let (_, sum, len) = hashed.finish();
        if sum != entry.checksum {
            return Err(PckError::corrupt(format!("checksum mismatch for {:?}", entry.path)));
        }
        Ok(len)
    }

    pub fn read_entry(&mut self, entry: &Entry, verify: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(entry.length as usize);
        if verify {
            self.copy_verified(entry, &mut out)?;
        } else {
            self.copy_raw(entry, &mut out)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum;
    use crate::header::ProducerVersion;
    use std::io::Cursor;

    fn staged(path: &str, data: &[u8]) -> Planned {
        Planned::new(path.into(), data.len() as u64, checksum(data), 0, Source::Staged(data.to_vec()))
    }

    fn build(plan: Vec<Planned>) -> Vec<u8> {
        let header = Header::new(ProducerVersion::new(0, 1, 0), 0);
        let (out, _, _) = PckWriter::new(Vec::new(), header)
            .finish(plan, None::<&mut PckReader<Cursor<Vec<u8>>>>)
            .unwrap();
        out
    }

    /// Fails every write once `budget` bytes have gone through.
    struct FailingWriter {
        inner:  Vec<u8>,
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.inner.len() + buf.len() > self.budget {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            self.inner.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn layout_is_sorted_and_contiguous() {
        let bytes = build(vec![staged("z.txt", b"last"), staged("a/b.txt", b"first!")]);
        let mut r = PckReader::new(Cursor::new(bytes)).unwrap();
        let paths: Vec<_> = r.entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["a/b.txt", "z.txt"]);
        assert_eq!((r.entries[0].offset, r.entries[1].offset), (0, 6));
        assert_eq!(r.header.data_region_offset + 10, r.file_len());

        let z = r.entries[1].clone();
        assert_eq!(r.read_entry(&z, true).unwrap(), b"last");
    }

    #[test]
    fn existing_entries_copy_from_current_container() {
        let old = build(vec![staged("keep.bin", b"keep me"), staged("drop.bin", b"xxxx")]);
        let mut current = PckReader::new(Cursor::new(old)).unwrap();
        let keep = current.entries.iter().find(|e| e.path == "keep.bin").cloned().unwrap();

        let plan = vec![
            Planned::new(keep.path.clone(), keep.length, keep.checksum, 0, Source::Existing(keep)),
            staged("new.txt", b"n"),
        ];
        let header = current.header.clone();
        let (out, _, entries) = PckWriter::new(Vec::new(), header)
            .finish(plan, Some(&mut current))
            .unwrap();
        assert_eq!(entries.len(), 2);

        let mut r = PckReader::new(Cursor::new(out)).unwrap();
        let e = r.entries.iter().find(|e| e.path == "keep.bin").cloned().unwrap();
        assert_eq!(r.read_entry(&e, true).unwrap(), b"keep me");
    }

    #[test]
    fn checksum_mismatch_aborts_the_write() {
        let mut bad = staged("a", b"abc");
        bad.entry.checksum = checksum(b"abd");
        let header = Header::new(ProducerVersion::default(), 0);
        let err = PckWriter::new(Vec::new(), header)
            .finish(vec![bad], None::<&mut PckReader<Cursor<Vec<u8>>>>)
            .unwrap_err();
        assert!(matches!(err, PckError::IoFailure(_)));
    }

    #[test]
    fn sink_failure_surfaces() {
        let header = Header::new(ProducerVersion::default(), 0);
        let sink = FailingWriter { inner: Vec::new(), budget: 200 };
        let err = PckWriter::new(sink, header)
            .finish(vec![staged("big", &[7u8; 4096])], None::<&mut PckReader<Cursor<Vec<u8>>>>)
            .err()
            .unwrap();
        assert!(matches!(err, PckError::IoFailure(_)));
    }

    #[test]
    fn tripped_cutoff_cancels() {
        let header = Header::new(ProducerVersion::default(), 0);
        let flag = Arc::new(AtomicBool::new(true));
        let err = PckWriter::new(Vec::new(), header)
            .with_cutoff(Cutoff::flag(flag))
            .finish(vec![staged("a", b"1")], None::<&mut PckReader<Cursor<Vec<u8>>>>)
            .unwrap_err();
        assert!(matches!(err, PckError::Cancelled));
    }

    #[test]
    fn reader_rejects_entries_past_end_of_file() {
        let mut bytes = build(vec![staged("a", b"0123456789")]);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(PckReader::new(Cursor::new(bytes)), Err(PckError::CorruptIndex(_))));
    }

    #[test]
    fn data_region_inside_table_is_corrupt_not_truncated() {
        let mut bytes = build(vec![staged("a/long/enough/path.txt", b"0123456789")]);
        let inside = (crate::header::HEADER_SIZE + 8) as u64;
        bytes[24..32].copy_from_slice(&inside.to_le_bytes());
        assert!(matches!(PckReader::new(Cursor::new(bytes)), Err(PckError::CorruptIndex(_))));
    }

    #[test]
    fn verified_read_detects_corruption() {
        let mut bytes = build(vec![staged("a", b"0123456789")]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut r = PckReader::new(Cursor::new(bytes)).unwrap();
        let e = r.entries[0].clone();
        assert!(matches!(r.read_entry(&e, true), Err(PckError::CorruptIndex(_))));
        assert_eq!(r.read_entry(&e, false).unwrap().len(), 10);
    }
}
