use std::io;
use thiserror::Error;

/// Every failure the container engine can report.
///
/// Decode errors (`NotAContainer` through `CorruptIndex`) always fail
/// `Container::open`; a partially populated index is never handed out.
#[derive(Error, Debug)]
pub enum PckError {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("Not a pck container (bad magic)")]
    NotAContainer,
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),
    #[error("Truncated data: needed {needed} bytes at offset {offset}, {available} available")]
    TruncatedData { offset: u64, needed: u64, available: u64 },
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),
    #[error("Entry not found: {0}")]
    NotFound(String),
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("Container already exists: {0}")]
    ContainerAlreadyExists(String),
    #[error("Source not found: {0}")]
    SourceNotFound(String),
    #[error("Rebuild cancelled before completion")]
    Cancelled,
    #[error("IO error: {0}")]
    IoFailure(#[from] io::Error),
}

impl PckError {
    pub(crate) fn invalid_path(path: &str, reason: &'static str) -> Self {
        PckError::InvalidPath { path: path.to_owned(), reason }
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        PckError::CorruptIndex(msg.into())
    }

    /// Attach the failing path to an I/O error, keeping its kind.
    pub(crate) fn io_at(path: &std::path::Path, err: io::Error) -> Self {
        PckError::IoFailure(io::Error::new(
            err.kind(),
            format!("{}: {err}", path.display()),
        ))
    }
}

pub type Result<T> = std::result::Result<T, PckError>;
