//! Canonical internal paths.
//!
//! Every path that enters the engine (from callers, from the filesystem
//! during a pack, or from a decoded entry table) goes through [`normalize`].
//! The canonical form:
//!
//! - has no scheme prefix (`res://icon.png` → `icon.png`),
//! - has no leading or trailing separator,
//! - uses `/` only, with runs of separators collapsed,
//! - contains no `.` segments and never a `..` segment.
//!
//! Comparison is byte-wise and case-sensitive.

use std::path::{Component, Path};

use crate::error::{PckError, Result};

/// Scheme written in front of paths by engine tooling; accepted on input.
pub const RES_SCHEME: &str = "res://";

/// Longest canonical path accepted, in bytes.
pub const MAX_PATH_LEN: usize = 32 * 1024;

/// Canonicalize an externally supplied resource path.
///
/// Fails with `InvalidPath` for empty paths, `..` segments and NUL bytes.
pub fn normalize(raw: &str) -> Result<String> {
    let out = normalize_dir(raw)?;
    if out.is_empty() {
        return Err(PckError::invalid_path(raw, "empty path"));
    }
    if out.len() > MAX_PATH_LEN {
        return Err(PckError::invalid_path(raw, "path too long"));
    }
    Ok(out)
}

/// Like [`normalize`], but the root (empty string, `/`, `res://`) is allowed
/// and yields `""`. Used for directory prefixes.
pub fn normalize_dir(raw: &str) -> Result<String> {
    if raw.contains('\0') {
        return Err(PckError::invalid_path(raw, "contains NUL byte"));
    }

    let body = strip_scheme(raw);
    let mut out = String::with_capacity(body.len());
    for segment in body.split(['/', '\\']) {
        match segment {
            "" | "." => continue,
            ".." => return Err(PckError::invalid_path(raw, "'..' segment not allowed")),
            s => {
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(s);
            }
        }
    }
    Ok(out)
}

/// True when `path` is already in canonical form.
pub fn is_normalized(path: &str) -> bool {
    matches!(normalize(path), Ok(ref n) if n == path)
}

fn strip_scheme(raw: &str) -> &str {
    match raw.find("://") {
        Some(pos)
            if pos > 0
                && raw[..pos]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            &raw[pos + 3..]
        }
        _ => raw,
    }
}

/// Join a normalized directory (possibly the root `""`) and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_owned()
    } else {
        format!("{dir}/{name}")
    }
}

/// Parent directory of a normalized path; `""` for top-level entries.
pub fn parent(path: &str) -> &str {
    path.rfind('/').map_or("", |i| &path[..i])
}

/// Last segment of a normalized path.
pub fn file_name(path: &str) -> &str {
    path.rfind('/').map_or(path, |i| &path[i + 1..])
}

/// Map a filesystem path below `root` to its internal path.
///
/// Non-UTF-8 names and paths that escape `root` are rejected, since neither
/// can be represented in the entry table.
pub fn relative_to_root(root: &Path, fs_path: &Path) -> Result<String> {
    let shown = fs_path.to_string_lossy();
    let rel = fs_path
        .strip_prefix(root)
        .map_err(|_| PckError::invalid_path(&shown, "outside the source root"))?;

    let mut out = String::new();
    for comp in rel.components() {
        match comp {
            Component::Normal(os) => {
                let name = os
                    .to_str()
                    .ok_or_else(|| PckError::invalid_path(&shown, "name is not valid UTF-8"))?;
                if !out.is_empty() {
                    out.push('/');
                }
                out.push_str(name);
            }
            Component::CurDir => {}
            _ => return Err(PckError::invalid_path(&shown, "outside the source root")),
        }
    }
    normalize(&out)
}
