//! Materializing entries to memory, streams and directories.
//!
//! Each file written to disk goes through a staging file in its destination
//! directory and is renamed into place, so a single file is either fully
//! written or not there at all.  `extract_all` stops at the first failure
//! and leaves the files it already wrote.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::container::Container;
use crate::error::{PckError, Result};
use crate::index::Entry;
use crate::io_stream::PckReader;
use crate::mutate::staging_file;

impl Container {
    /// An entry's bytes, checked against its checksum when
    /// `PckOptions::verify_checksums` is set.
    pub fn read(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.get(path)?.clone();
        let mut reader = self.reader_for(&entry)?;
        reader.read_entry(&entry, self.options.verify_checksums)
    }

    /// Stream an entry's bytes into `out`; returns the byte count.
    pub fn read_to<W: Write>(&self, path: &str, mut out: W) -> Result<u64> {
        let entry = self.get(path)?.clone();
        let mut reader = self.reader_for(&entry)?;
        self.copy_entry(&mut reader, &entry, &mut out)
    }

    /// Write one entry to the file `destination`, creating parent
    /// directories as needed.
    pub fn extract_one<P: AsRef<Path>>(&self, path: &str, destination: P) -> Result<()> {
        let entry = self.get(path)?.clone();
        let mut reader = self.reader_for(&entry)?;
        self.write_file(&mut reader, &entry, destination.as_ref())
    }

    /// Recreate every entry under `destination`.  Returns the number of
    /// files written.
    pub fn extract_all<P: AsRef<Path>>(&self, destination: P) -> Result<usize> {
        let root = destination.as_ref();
        fs::create_dir_all(root).map_err(|e| PckError::io_at(root, e))?;
        let Some(mut reader) = self.disk_reader()? else {
            return Ok(0);
        };

        let mut written = 0;
        for entry in self.index.iter() {
            self.write_file(&mut reader, entry, &target_path(root, &entry.path))?;
            written += 1;
        }
        info!("extracted {} entries to {}", written, root.display());
        Ok(written)
    }

    /// Re-hash every entry.  The first mismatch fails with `CorruptIndex`.
    pub fn verify(&self) -> Result<usize> {
        let Some(mut reader) = self.disk_reader()? else {
            return Ok(0);
        };
        for entry in self.index.iter() {
            reader.copy_verified(entry, &mut io::sink())?;
        }
        Ok(self.index.len())
    }

    // ── Internal ─────────────────────────────────────────────────────────────

    fn reader_for(&self, entry: &Entry) -> Result<PckReader<File>> {
        self.disk_reader()?
            .ok_or_else(|| PckError::NotFound(entry.path.clone()))
    }

    fn copy_entry<W: Write>(
        &self,
        reader: &mut PckReader<File>,
        entry:  &Entry,
        out:    &mut W,
    ) -> Result<u64> {
        if self.options.verify_checksums {
            reader.copy_verified(entry, out)
        } else {
            reader.copy_raw(entry, out)
        }
    }

    fn write_file(&self, reader: &mut PckReader<File>, entry: &Entry, target: &Path) -> Result<()> {
        let dir = match target.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| PckError::io_at(&dir, e))?;

        let staging = staging_file(&dir).map_err(|e| PckError::io_at(&dir, e))?;
        let mut out = BufWriter::new(staging);
        self.copy_entry(reader, entry, &mut out)?;
        let staging = out.into_inner().map_err(|e| e.into_error())?;
        staging
            .persist(target)
            .map_err(|e| PckError::io_at(target, e.error))?;
        debug!("{} -> {}", entry.path, target.display());
        Ok(())
    }
}

/// Filesystem location of a normalized entry path below `root`.
fn target_path(root: &Path, entry_path: &str) -> PathBuf {
    let mut out = root.to_path_buf();
    out.extend(entry_path.split('/'));
    out
}
