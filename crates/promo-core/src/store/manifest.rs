//! Structural marker written into a fully built index directory.

use crate::atomic::{atomic_read_json, atomic_write_json};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name prefix that identifies a marker file.
pub const MANIFEST_PREFIX: &str = "MANIFEST-";

/// Marker file written by this version.
pub const MANIFEST_FILE_NAME: &str = "MANIFEST-000001";

/// Bumped whenever the on-disk layout changes; older markers are invalid.
pub const FORMAT_VERSION: u32 = 1;

/// Contents of the marker file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    pub format_version: u32,
    pub source_path: String,
    /// Distinct codes stored.
    pub record_count: u64,
    pub built_at: DateTime<Utc>,
}

impl IndexManifest {
    pub fn new(source: &Path, record_count: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            source_path: source.display().to_string(),
            record_count,
            built_at: Utc::now(),
        }
    }

    /// Write the marker into `index_dir`. Must run after the final commit.
    pub fn write(&self, index_dir: &Path) -> Result<()> {
        atomic_write_json(&index_dir.join(MANIFEST_FILE_NAME), self)
    }

    /// Load the marker from `index_dir` if one is present and valid.
    ///
    /// Unreadable or outdated markers are reported as absent so the index
    /// gets rebuilt rather than trusted.
    pub fn load(index_dir: &Path) -> Option<Self> {
        let path = find_manifest(index_dir)?;
        match atomic_read_json::<IndexManifest>(&path) {
            Ok(Some(m)) if m.format_version == FORMAT_VERSION => Some(m),
            Ok(Some(m)) => {
                warn!(
                    "Ignoring manifest {} with format version {}",
                    path.display(),
                    m.format_version
                );
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// First file in `dir` whose name carries the marker prefix.
pub fn find_manifest(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .find(|e| {
            e.file_name()
                .to_str()
                .map(|n| n.starts_with(MANIFEST_PREFIX) && !n.ends_with(".tmp"))
                .unwrap_or(false)
        })
        .map(|e| e.path())
}
