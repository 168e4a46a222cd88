use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use crate::checksum::{self, Checksum};
use crate::error::{PckError, Result};
use crate::path;

/// Entry flag: the entry's bytes are individually encrypted.  Carried only.
pub const ENTRY_FLAG_ENCRYPTED: u32 = 1 << 0;

/// One packaged resource as recorded in the entry table.
///
/// `offset` is relative to the header's `data_region_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path:     String,
    pub offset:   u64,
    pub length:   u64,
    pub checksum: Checksum,
    pub flags:    u32,
}

impl Entry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & ENTRY_FLAG_ENCRYPTED != 0
    }

    /// Exclusive end of this entry's range in the data region.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.length)
    }
}

/// Serializable view of an [`Entry`] for listings.
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub path:      String,
    pub offset:    u64,
    pub length:    u64,
    pub checksum:  String,
    pub encrypted: bool,
}

impl From<&Entry> for EntryInfo {
    fn from(e: &Entry) -> Self {
        EntryInfo {
            path:      e.path.clone(),
            offset:    e.offset,
            length:    e.length,
            checksum:  checksum::to_hex(&e.checksum),
            encrypted: e.is_encrypted(),
        }
    }
}

/// In-memory table of normalized path → [`Entry`].
///
/// Iteration order is byte-wise lexicographic by path, which is also the
/// order entries are serialized in.  Directories are not stored; they exist
/// only as prefixes of entry paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryIndex {
    entries: BTreeMap<String, Entry>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from decoded entries.  Later duplicates replace earlier ones;
    /// the codec rejects duplicates before this point.
    pub fn from_entries(entries: Vec<Entry>) -> Self {
        let entries = entries.into_iter().map(|e| (e.path.clone(), e)).collect();
        Self { entries }
    }

    /// Entries in serialization order.
    pub fn to_entries(&self) -> Vec<Entry> {
        self.entries.values().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Sum of all entry lengths.
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.length).sum()
    }

    pub fn list_all(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Direct children of `dir` that are entries (not subdirectories).
    ///
    /// `dir` is normalized first; the root (`""`, `/`, `res://`) always
    /// exists.  Any other directory with no entry directly inside it fails
    /// with `DirectoryNotFound`, even when deeper entries exist.
    pub fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        let dir = path::normalize_dir(dir)?;
        let out: Vec<String> = self
            .below(&dir)
            .filter(|(_, rest)| !rest.contains('/'))
            .map(|(k, _)| k.clone())
            .collect();
        if out.is_empty() && !dir.is_empty() {
            return Err(PckError::DirectoryNotFound(dir));
        }
        Ok(out)
    }

    /// Every entry anywhere below `dir`.
    pub fn list_dir_recursive(&self, dir: &str) -> Result<Vec<String>> {
        let dir = path::normalize_dir(dir)?;
        let out: Vec<String> = self.below(&dir).map(|(k, _)| k.clone()).collect();
        if out.is_empty() && !dir.is_empty() {
            return Err(PckError::DirectoryNotFound(dir));
        }
        Ok(out)
    }

    /// Every directory implied by entry paths, sorted.  The root is omitted.
    pub fn directories(&self) -> Vec<String> {
        let mut dirs = BTreeSet::new();
        for key in self.entries.keys() {
            let mut parent = path::parent(key);
            while !parent.is_empty() && dirs.insert(parent.to_owned()) {
                parent = path::parent(parent);
            }
        }
        dirs.into_iter().collect()
    }

    pub fn get(&self, path: &str) -> Result<&Entry> {
        self.entries
            .get(path)
            .ok_or_else(|| PckError::NotFound(path.to_owned()))
    }

    /// Fails with `InvalidPath` if storing an entry at `path` would make a
    /// path both a file and a directory.  Replacing an entry is allowed.
    pub fn check_collision(&self, path: &str) -> Result<()> {
        let mut parent = path::parent(path);
        while !parent.is_empty() {
            if self.entries.contains_key(parent) {
                return Err(PckError::invalid_path(path, "a parent directory is an existing entry"));
            }
            parent = path::parent(parent);
        }
        if self.below(path).next().is_some() {
            return Err(PckError::invalid_path(path, "an existing directory has this name"));
        }
        Ok(())
    }

    /// Insert `entry` under `path`, replacing any previous record.
    pub fn insert_or_replace(&mut self, path: String, mut entry: Entry) -> Option<Entry> {
        entry.path.clone_from(&path);
        self.entries.insert(path, entry)
    }

    pub fn remove(&mut self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// `(key, remainder)` for every entry strictly below `dir`.
    fn below<'a>(&'a self, dir: &str) -> impl Iterator<Item = (&'a String, &'a str)> + 'a {
        let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
        let cut = prefix.len();
        self.entries
            .range::<String, _>((Bound::Included(prefix.clone()), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(move |k| k.starts_with(prefix.as_str()))
            .map(move |k| (k, &k[cut..]))
    }
}
