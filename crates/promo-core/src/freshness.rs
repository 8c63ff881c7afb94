//! Modification-time freshness checks for derived artifacts.
//!
//! This is not a content comparison: an artifact stays fresh after its
//! source is edited as long as the source's mtime does not move past it.

use crate::error::{IndexError, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Path of an artifact derived from `source` by appending `suffix`.
pub fn artifact_path(source: &Path, suffix: &str) -> PathBuf {
    let mut raw: OsString = source.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

/// Modification time of `path`.
pub fn modified_time(path: &Path) -> Result<SystemTime> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| IndexError::io_with_path(e, path))
}

/// True when `artifact` exists and is not older than `source`.
///
/// Equal timestamps count as fresh; coarse filesystem clocks often stamp a
/// source and an artifact built right after it identically.
pub fn is_fresh(source: &Path, artifact: &Path) -> Result<bool> {
    let source_mtime = modified_time(source)?;
    let artifact_mtime = match std::fs::metadata(artifact).and_then(|m| m.modified()) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(IndexError::io_with_path(e, artifact)),
    };
    Ok(source_mtime <= artifact_mtime)
}
