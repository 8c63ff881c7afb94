//! Bloom filter prefilter for cheap pre-rejection of unknown codes.
//!
//! One snapshot per code store, persisted next to its source as
//! `<source><bloom_suffix>`. Filters are filled from the store rather than
//! the source file, and a snapshot older than the store's manifest is
//! rebuilt, so the filter always describes the index generation actually
//! being served. A negative answer is definitive; a positive answer only
//! means the authoritative quorum check is worth running.
//!
//! Filters use fastbloom (<https://github.com/tomtomwombat/fastbloom>) and
//! are serialized with bincode, hasher seed included, so a reloaded filter
//! answers exactly like the one that was built.

use crate::atomic::atomic_write_bytes;
use crate::config::IndexConfig;
use crate::freshness::{artifact_path, is_fresh};
use crate::normalize::normalize_code;
use crate::store::CodeStore;
use crate::{IndexError, Result};
use fastbloom::BloomFilter;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Persisted filter plus the parameters it was sized with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomSnapshot {
    /// Distinct codes in the store when the filter was sized.
    pub estimated_count: u64,
    pub false_positive_rate: f64,
    pub filter: BloomFilter,
}

/// Probable-membership filter for one code store.
#[derive(Debug, Clone)]
pub struct CodePrefilter {
    source_path: PathBuf,
    snapshot_path: PathBuf,
    snapshot: BloomSnapshot,
    reused: bool,
}

impl CodePrefilter {
    /// Load the snapshot for `store` if it matches the store's build,
    /// otherwise fill a new one from the store and persist it.
    ///
    /// Failures are returned as [`IndexError::Build`] naming the source file.
    pub fn build_or_load(store: &CodeStore, config: &IndexConfig) -> Result<Self> {
        Self::build_or_load_inner(store, config)
            .map_err(|e| IndexError::build(store.source_path(), e))
    }

    fn build_or_load_inner(store: &CodeStore, config: &IndexConfig) -> Result<Self> {
        let source = store.source_path();
        let snapshot_path = artifact_path(source, &config.bloom_suffix);

        if is_fresh(store.manifest_path(), &snapshot_path)? {
            match load_snapshot(&snapshot_path) {
                Ok(snapshot) => {
                    info!("Found bloom filter for {}", source.display());
                    return Ok(Self {
                        source_path: source.to_path_buf(),
                        snapshot_path,
                        snapshot,
                        reused: true,
                    });
                }
                Err(e) => {
                    warn!(
                        "Discarding unreadable bloom filter {}: {}",
                        snapshot_path.display(),
                        e
                    );
                }
            }
        }

        info!("Building bloom filter for {}", source.display());
        let start = Instant::now();
        let snapshot = build_snapshot(store, config.false_positive_rate)?;
        let bytes = bincode::serialize(&snapshot)?;
        atomic_write_bytes(&snapshot_path, &bytes)?;
        info!(
            "Built bloom filter for {} ({} codes, {} bits) in {:.2}s",
            source.display(),
            snapshot.estimated_count,
            snapshot.filter.num_bits(),
            start.elapsed().as_secs_f64()
        );

        Ok(Self {
            source_path: source.to_path_buf(),
            snapshot_path,
            snapshot,
            reused: false,
        })
    }

    /// False means `code` is definitely not in the store.
    pub fn might_contain(&self, code: &str) -> bool {
        match normalize_code(code) {
            Some(code) => self.snapshot.filter.contains(code.as_str()),
            None => false,
        }
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    pub fn estimated_count(&self) -> u64 {
        self.snapshot.estimated_count
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.snapshot.false_positive_rate
    }

    /// True if a persisted snapshot was loaded instead of built.
    pub fn was_reused(&self) -> bool {
        self.reused
    }
}

/// Size the filter from the store's distinct count, then fill it.
fn build_snapshot(store: &CodeStore, false_positive_rate: f64) -> Result<BloomSnapshot> {
    let estimated_count = store.record_count();
    let expected = usize::try_from(estimated_count.max(1)).unwrap_or(usize::MAX);

    let mut filter = BloomFilter::with_false_pos(false_positive_rate).expected_items(expected);
    store.for_each_code(|code| {
        filter.insert(code);
    })?;

    Ok(BloomSnapshot {
        estimated_count,
        false_positive_rate,
        filter,
    })
}

fn load_snapshot(path: &Path) -> Result<BloomSnapshot> {
    let file = File::open(path).map_err(|e| IndexError::io_with_path(e, path))?;
    let snapshot = bincode::deserialize_from(BufReader::new(file))?;
    Ok(snapshot)
}
