//! Add, delete and pack, plus the rebuild that commits them.
//!
//! The data region has no holes and no free list, so every mutation ends in
//! a full rebuild: the new container is written next to the old one in a
//! staging file, synced, then renamed over the original.  Until that rename
//! the original is the container of record; readers opening the path see
//! either the old file or the new one, never a mix.
//!
//! Changes are collected in an [`Editor`] against a working copy of the
//! index.  The handle's own index is only replaced after the rename
//! succeeds, so a failed commit leaves both disk and memory as they were.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::checksum::{checksum, checksum_reader, Checksum};
use crate::container::{Container, State};
use crate::error::{PckError, Result};
use crate::index::{Entry, EntryIndex};
use crate::io_stream::{PckWriter, Planned, Source};
use crate::path;

/// Offset recorded for staged entries until the rebuild lays them out.
const PLACEHOLDER_OFFSET: u64 = u64::MAX;

/// Staging file in `dir`, created with the mode a plain `File::create`
/// would get under the current umask.
pub(crate) fn staging_file(dir: &Path) -> io::Result<NamedTempFile> {
    #[allow(unused_mut)]
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    builder.tempfile_in(dir)
}

// ── Container entry points ───────────────────────────────────────────────────

impl Container {
    /// Start a batch of changes committed by a single rebuild.
    pub fn edit(&mut self) -> Editor<'_> {
        let working = self.index.clone();
        Editor { container: self, working, staged: HashMap::new() }
    }

    /// Add or replace one entry.
    pub fn add(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let mut ed = self.edit();
        ed.add(path, data)?;
        ed.commit()
    }

    /// Add or replace one entry from a stream, read to its end.
    pub fn add_reader<R: Read>(&mut self, path: &str, reader: R) -> Result<()> {
        let mut ed = self.edit();
        ed.add_reader(path, reader)?;
        ed.commit()
    }

    /// Add a file from disk under `internal_path`.
    pub fn add_file<P: AsRef<Path>>(&mut self, fs_path: P, internal_path: &str) -> Result<()> {
        let mut ed = self.edit();
        ed.add_file(fs_path, internal_path)?;
        ed.commit()
    }

    /// Remove one entry, re-laying the remaining data contiguously.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let mut ed = self.edit();
        ed.delete(path)?;
        ed.commit()
    }

    /// Replace the container's contents with the tree under `source_root`.
    ///
    /// Only a pending container may be packed unless `overwrite` is set.
    /// Returns the number of entries written.
    pub fn pack<P: AsRef<Path>>(&mut self, source_root: P, overwrite: bool) -> Result<usize> {
        if !self.is_pending() && !overwrite {
            return Err(PckError::ContainerAlreadyExists(self.path.display().to_string()));
        }
        let root = source_root.as_ref();
        if !root.is_dir() {
            return Err(PckError::SourceNotFound(root.display().to_string()));
        }

        let mut ed = self.edit();
        ed.clear();
        ed.add_dir(root, "")?;
        let count = ed.len();
        ed.commit()?;
        info!("packed {} entries from {}", count, root.display());
        Ok(count)
    }
}

// ── Editor ───────────────────────────────────────────────────────────────────

/// Pending changes to a [`Container`].
///
/// Nothing touches the disk until [`Editor::commit`].  Dropping an editor
/// discards its changes.
pub struct Editor<'a> {
    container: &'a mut Container,
    working:   EntryIndex,
    staged:    HashMap<String, Source>,
}

impl Editor<'_> {
    pub fn add(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let path = path::normalize(path)?;
        let sum = checksum(data);
        self.stage(path, data.len() as u64, sum, Source::Staged(data.to_vec()))
    }

    pub fn add_reader<R: Read>(&mut self, path: &str, mut reader: R) -> Result<()> {
        let path = path::normalize(path)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        let sum = checksum(&data);
        self.stage(path, data.len() as u64, sum, Source::Staged(data))
    }

    /// Stage a file from disk.  Its bytes are hashed now and streamed again
    /// at commit; a file that changes in between fails the commit.
    pub fn add_file<P: AsRef<Path>>(&mut self, fs_path: P, internal_path: &str) -> Result<()> {
        let path = path::normalize(internal_path)?;
        self.working.check_collision(&path)?;
        let fs_path = fs_path.as_ref();
        let file = fs::File::open(fs_path).map_err(|e| PckError::io_at(fs_path, e))?;
        let (sum, len) = checksum_reader(file).map_err(|e| PckError::io_at(fs_path, e))?;
        self.stage(path, len, sum, Source::File(fs_path.to_owned()))
    }

    /// Stage every file below `dir` under the internal directory `prefix`.
    ///
    /// Walks one level at a time; each subdirectory is a nested call.
    /// Symlinks are skipped, as is the container's own file.
    pub fn add_dir<P: AsRef<Path>>(&mut self, dir: P, prefix: &str) -> Result<()> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(PckError::SourceNotFound(dir.display().to_string()));
        }
        let prefix = path::normalize_dir(prefix)?;
        let own = fs::canonicalize(&self.container.path).ok();
        self.stage_level(dir, dir, &prefix, own.as_deref())
    }

    fn stage_level(
        &mut self,
        root:   &Path,
        dir:    &Path,
        prefix: &str,
        own:    Option<&Path>,
    ) -> Result<()> {
        let mut children: Vec<(PathBuf, fs::FileType)> = Vec::new();
        for item in fs::read_dir(dir).map_err(|e| PckError::io_at(dir, e))? {
            let item = item.map_err(|e| PckError::io_at(dir, e))?;
            let kind = item.file_type().map_err(|e| PckError::io_at(&item.path(), e))?;
            children.push((item.path(), kind));
        }
        children.sort_by(|a, b| a.0.cmp(&b.0));

        for (child, kind) in children {
            if kind.is_dir() {
                self.stage_level(root, &child, prefix, own)?;
            } else if kind.is_file() {
                if own.is_some() && fs::canonicalize(&child).ok().as_deref() == own {
                    debug!("skipping the container itself: {}", child.display());
                    continue;
                }
                let rel = path::relative_to_root(root, &child)?;
                self.add_file(&child, &path::join(prefix, &rel))?;
            } else {
                warn!("skipping {}: not a regular file or directory", child.display());
            }
        }
        Ok(())
    }

    /// Remove an entry.  `NotFound` if it is not in the working set.
    pub fn delete(&mut self, path: &str) -> Result<()> {
        let path = path::normalize(path)?;
        if !self.working.remove(&path) {
            return Err(PckError::NotFound(path));
        }
        self.staged.remove(&path);
        Ok(())
    }

    /// Drop every entry from the working set.
    pub fn clear(&mut self) {
        self.working = EntryIndex::new();
        self.staged.clear();
    }

    /// Paths in the working set, sorted.
    pub fn list_all(&self) -> Vec<String> {
        self.working.list_all()
    }

    pub fn len(&self) -> usize { self.working.len() }

    pub fn is_empty(&self) -> bool { self.working.is_empty() }

    /// A path may not be both an entry and the directory of another entry.
    fn stage(&mut self, path: String, length: u64, checksum: Checksum, source: Source) -> Result<()> {
        self.working.check_collision(&path)?;
        let entry = Entry { path: path.clone(), offset: PLACEHOLDER_OFFSET, length, checksum, flags: 0 };
        self.working.insert_or_replace(path.clone(), entry);
        self.staged.insert(path, source);
        Ok(())
    }

    /// Rebuild the container with the working set and swap it into place.
    ///
    /// A pending container is always written, even when empty.  An open
    /// container with no changes is left alone.
    pub fn commit(self) -> Result<()> {
        let Editor { container, working, mut staged } = self;
        if container.state == State::Open && staged.is_empty() && working == container.index {
            debug!("{}: nothing to commit", container.path.display());
            return Ok(());
        }

        // Untouched entries are copied from the file as it is on disk now.
        let mut current = container.disk_reader()?;
        let on_disk: BTreeMap<&str, &Entry> = current
            .iter()
            .flat_map(|r| r.entries.iter())
            .map(|e| (e.path.as_str(), e))
            .collect();

        let mut plan = Vec::with_capacity(working.len());
        for e in working.iter() {
            let source = match staged.remove(&e.path) {
                Some(src) => src,
                None => {
                    let old = on_disk.get(e.path.as_str()).ok_or_else(|| {
                        PckError::corrupt(format!("{:?} is missing from the file on disk", e.path))
                    })?;
                    Source::Existing((*old).clone())
                }
            };
            plan.push(Planned { entry: e.clone(), source });
        }
        drop(on_disk);

        let mut header = container.header.clone();
        header.producer_version = container.options.producer_version;

        let dir = match container.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_owned(),
            _ => PathBuf::from("."),
        };
        let staging = staging_file(&dir).map_err(|e| PckError::io_at(&dir, e))?;
        if let Ok(meta) = fs::metadata(&container.path) {
            staging.as_file().set_permissions(meta.permissions())?;
        }
        debug!("staging rebuild of {} at {}", container.path.display(), staging.path().display());

        let writer = PckWriter::new(BufWriter::new(staging), header)
            .with_cutoff(container.options.cutoff.clone());
        let (buffered, header, entries) = writer.finish(plan, current.as_mut())?;
        let staging = buffered.into_inner().map_err(|e| e.into_error())?;
        staging.as_file().sync_all()?;
        drop(current);

        staging
            .persist(&container.path)
            .map_err(|e| PckError::io_at(&container.path, e.error))?;

        let bytes: u64 = entries.iter().map(|e| e.length).sum();
        info!(
            "{}: wrote {} entries ({} data bytes)",
            container.path.display(),
            entries.len(),
            bytes
        );
        container.header = header;
        container.index = EntryIndex::from_entries(entries);
        container.state = State::Open;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn pending_container_is_written_on_first_add() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.pck");
        let mut pck = Container::create(&path);
        assert!(pck.is_pending());
        assert!(!path.exists());

        pck.add("/ExampleFile.txt", b"Hello World").unwrap();
        assert_eq!(pck.state(), State::Open);
        assert!(path.exists());
        assert_eq!(pck.get("ExampleFile.txt").unwrap().offset, 0);
    }

    #[test]
    fn failed_staging_leaves_handle_untouched() {
        let dir = TempDir::new().unwrap();
        let mut pck = Container::create(dir.path().join("t.pck"));
        pck.add("a.txt", b"a").unwrap();

        let err = pck.add("../escape", b"x").unwrap_err();
        assert!(matches!(err, PckError::InvalidPath { .. }));
        assert!(matches!(pck.delete("missing"), Err(PckError::NotFound(_))));
        assert_eq!(pck.list_all(), ["a.txt"]);
    }

    #[test]
    fn editor_batches_into_one_rebuild() {
        let dir = TempDir::new().unwrap();
        let mut pck = Container::create(dir.path().join("t.pck"));
        pck.add("keep", b"1").unwrap();
        pck.add("drop", b"2").unwrap();

        let mut ed = pck.edit();
        ed.delete("drop").unwrap();
        ed.add("new/one", b"3").unwrap();
        ed.add("new/one", b"33").unwrap();
        assert_eq!(ed.list_all(), ["keep", "new/one"]);
        ed.commit().unwrap();

        assert_eq!(pck.list_all(), ["keep", "new/one"]);
        assert_eq!(pck.get("new/one").unwrap().length, 2);
    }

    #[test]
    fn dropped_editor_discards_changes() {
        let dir = TempDir::new().unwrap();
        let mut pck = Container::create(dir.path().join("t.pck"));
        pck.add("keep", b"1").unwrap();
        {
            let mut ed = pck.edit();
            ed.clear();
            assert!(ed.is_empty());
        }
        assert_eq!(pck.list_all(), ["keep"]);
    }

    #[test]
    fn staging_file_is_cleaned_up() {
        let dir = TempDir::new().unwrap();
        let mut pck = Container::create(dir.path().join("t.pck"));
        pck.add("a", b"a").unwrap();
        pck.delete("a").unwrap();
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, ["t.pck"]);
    }

    #[test]
    fn entry_cannot_shadow_a_directory_or_sit_below_a_file() {
        let dir = TempDir::new().unwrap();
        let mut pck = Container::create(dir.path().join("t.pck"));
        pck.add("a", b"file").unwrap();
        assert!(matches!(pck.add("a/b", b"x"), Err(PckError::InvalidPath { .. })));

        pck.add("d/e/f", b"deep").unwrap();
        assert!(matches!(pck.add("d/e", b"x"), Err(PckError::InvalidPath { .. })));
        assert!(matches!(pck.add("d", b"x"), Err(PckError::InvalidPath { .. })));
        assert_eq!(pck.list_all(), ["a", "d/e/f"]);

        // Removing the file first frees the name for a directory.
        let mut ed = pck.edit();
        ed.delete("a").unwrap();
        ed.add("a/b", b"x").unwrap();
        ed.commit().unwrap();
        assert_eq!(pck.list_all(), ["a/b", "d/e/f"]);
        assert_eq!(pck.extract_all(dir.path().join("out")).unwrap(), 2);
    }
}
