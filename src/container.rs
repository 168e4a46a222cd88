//! High-level [`Container`] API, the primary embedding surface.
//!
//! ```no_run
//! use gdpck::Container;
//!
//! // Write
//! let mut pck = Container::create("game.pck");
//! pck.add("res://ExampleFile.txt", b"Hello World")?;
//! pck.add("/Dir1/Dir2/File", b"Hello World")?;
//!
//! // Read
//! let pck = Container::open("game.pck")?;
//! assert_eq!(pck.list_dir("Dir1/Dir2")?, ["Dir1/Dir2/File"]);
//! let data = pck.read("ExampleFile.txt")?;
//! assert_eq!(data, b"Hello World");
//! # Ok::<(), gdpck::PckError>(())
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{PckError, Result};
use crate::header::{Header, ProducerVersion};
use crate::index::{Entry, EntryIndex, EntryInfo};
use crate::io_stream::{Cutoff, PckReader};
use crate::path;

// ── PckOptions ───────────────────────────────────────────────────────────────

/// Configuration for [`Container::open_with`] / [`Container::create_with`].
#[derive(Debug, Clone)]
pub struct PckOptions {
    /// Stamped into the header of every container this handle writes.
    pub producer_version: ProducerVersion,
    /// Header flags for newly created containers.  Opened containers keep
    /// the flags they were written with.
    pub container_flags:  u32,
    /// Re-hash entries on extraction and fail on mismatch.
    pub verify_checksums: bool,
    /// Limit on how long a rebuild may run.
    pub cutoff:           Cutoff,
}

impl Default for PckOptions {
    fn default() -> Self {
        Self {
            producer_version: ProducerVersion::current(),
            container_flags:  0,
            verify_checksums: true,
            cutoff:           Cutoff::none(),
        }
    }
}

// ── State ────────────────────────────────────────────────────────────────────

/// Lifecycle of a handle.  `PendingCreation` becomes `Open` on the first
/// successful write and never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    PendingCreation,
    Open,
}

// ── Container ────────────────────────────────────────────────────────────────

/// Handle on one container file.
///
/// Mutations take `&mut self`; the engine does no locking of its own, so
/// callers must not run two mutations against the same file at once.
#[derive(Debug)]
pub struct Container {
    pub(crate) path:    PathBuf,
    pub(crate) state:   State,
    pub(crate) header:  Header,
    pub(crate) index:   EntryIndex,
    pub(crate) options: PckOptions,
}

impl Container {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Open an existing container.  Any decode failure fails the open.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, PckOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, options: PckOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path).map_err(|e| PckError::io_at(&path, e))?;
        let reader = PckReader::new(file)?;
        let (header, entries) = (reader.header, reader.entries);
        debug!("{}: {} entries", path.display(), entries.len());
        Ok(Self {
            path,
            state: State::Open,
            header,
            index: EntryIndex::from_entries(entries),
            options,
        })
    }

    /// A handle on a container that does not exist yet.  Nothing is written
    /// until the first mutation; that write replaces any file at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Self {
        Self::create_with(path, PckOptions::default())
    }

    pub fn create_with<P: AsRef<Path>>(path: P, options: PckOptions) -> Self {
        let header = Header::new(options.producer_version, options.container_flags);
        Self {
            path: path.as_ref().to_owned(),
            state: State::PendingCreation,
            header,
            index: EntryIndex::new(),
            options,
        }
    }

    /// Open `path` if it exists, otherwise start a pending container there.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path)
        } else {
            Ok(Self::create(path))
        }
    }

    // ── Listing ──────────────────────────────────────────────────────────────

    /// Every entry path, sorted byte-wise.
    pub fn list_all(&self) -> Vec<String> {
        self.index.list_all()
    }

    /// Entries directly inside `dir`.
    pub fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        self.index.list_dir(dir)
    }

    pub fn list_dir_recursive(&self, dir: &str) -> Result<Vec<String>> {
        self.index.list_dir_recursive(dir)
    }

    pub fn directories(&self) -> Vec<String> {
        self.index.directories()
    }

    /// Look up an entry by any accepted spelling of its path.
    pub fn get(&self, path: &str) -> Result<&Entry> {
        self.index.get(&path::normalize(path)?)
    }

    pub fn contains(&self, path: &str) -> bool {
        path::normalize(path).is_ok_and(|p| self.index.contains(&p))
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.index.iter()
    }

    pub fn info(&self) -> Vec<EntryInfo> {
        self.index.iter().map(EntryInfo::from).collect()
    }

    pub fn len(&self) -> usize { self.index.len() }

    pub fn is_empty(&self) -> bool { self.index.is_empty() }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn path(&self) -> &Path { &self.path }

    pub fn state(&self) -> State { self.state }

    pub fn is_pending(&self) -> bool { self.state == State::PendingCreation }

    pub fn header(&self) -> &Header { &self.header }

    pub fn options(&self) -> &PckOptions { &self.options }

    pub fn set_cutoff(&mut self, cutoff: Cutoff) {
        self.options.cutoff = cutoff;
    }

    // ── Internal ─────────────────────────────────────────────────────────────

    /// Fresh reader on the file as it is on disk now; `None` while pending.
    pub(crate) fn disk_reader(&self) -> Result<Option<PckReader<File>>> {
        match self.state {
            State::PendingCreation => Ok(None),
            State::Open => {
                let file = File::open(&self.path).map_err(|e| PckError::io_at(&self.path, e))?;
                Ok(Some(PckReader::new(file)?))
            }
        }
    }
}
