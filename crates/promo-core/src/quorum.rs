//! Quorum index over independently maintained code lists.
//!
//! A code is valid when at least [`QUORUM`] stores contain it, which keeps a
//! single corrupted or stale list from accepting or rejecting on its own.

use crate::config::{IndexConfig, QUORUM};
use crate::normalize::normalize_code;
use crate::pool::build_all;
use crate::store::{CodeLookup, CodeStore};
use crate::{IndexError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Count hits across `stores` in order, stopping as soon as `quorum` is met.
///
/// Stores after the deciding hit are never queried. Any lookup error aborts
/// the evaluation and is returned as is.
pub fn meets_quorum<S: CodeLookup>(stores: &[S], code: &str, quorum: usize) -> Result<bool> {
    let mut hits = 0;
    for store in stores {
        if store.has(code)? {
            hits += 1;
            if hits >= quorum {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Trim every path and reject an empty list, blank entries, or one file
/// listed twice.
///
/// Paths that exist are compared after canonicalization, so `./f1` and a
/// symlink to `f1` are the same list. Missing paths are compared as given
/// and fail later when their store is built.
pub(crate) fn validate_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<PathBuf>> {
    if paths.is_empty() {
        return Err(IndexError::config("no promo file paths provided"));
    }

    let mut cleaned = Vec::with_capacity(paths.len());
    let mut seen: HashMap<PathBuf, usize> = HashMap::with_capacity(paths.len());
    for (i, raw) in paths.iter().enumerate() {
        let raw = raw.as_ref().to_string_lossy();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(IndexError::config(format!(
                "empty promo file path at index {}",
                i
            )));
        }
        let path = PathBuf::from(trimmed);
        let key = std::fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if let Some(first) = seen.insert(key, i) {
            return Err(IndexError::config(format!(
                "promo file {} is listed at index {} and {}",
                path.display(),
                first,
                i
            )));
        }
        cleaned.push(path);
    }

    if cleaned.len() < QUORUM {
        return Err(IndexError::config(format!(
            "{} promo file path(s) provided, at least {} are required for a quorum",
            cleaned.len(),
            QUORUM
        )));
    }

    Ok(cleaned)
}

fn open_store(path: PathBuf, config: &IndexConfig) -> Result<Arc<CodeStore>> {
    CodeStore::ensure_built(&path, config).map(Arc::new)
}

/// Rollback for a store that built while another one failed.
fn release_store(store: Arc<CodeStore>) {
    if let Err(e) = store.close() {
        warn!(
            "Failed to close index for {} during rollback: {}",
            store.source_path().display(),
            e
        );
    }
}

/// Ordered, immutable set of code stores with a majority-membership check.
///
/// Lookups take `&self` and are safe from any number of threads. Stores are
/// released by [`QuorumIndex::close`] or on drop.
#[derive(Debug)]
pub struct QuorumIndex {
    stores: Vec<Arc<CodeStore>>,
    closed: AtomicBool,
}

impl QuorumIndex {
    /// Build or reuse one store per path, at most `config.max_workers` at a time.
    ///
    /// Either every store is ready and the index is returned, or every store
    /// that was opened is closed again and only the first failure is returned.
    pub async fn open<P: AsRef<Path>>(paths: &[P], config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let paths = validate_paths(paths)?;

        info!(
            "Opening quorum index over {} files with {} workers",
            paths.len(),
            config.max_workers
        );
        let start = Instant::now();

        let build_config = config.clone();
        let stores = build_all(
            paths,
            config.max_workers,
            move |path: PathBuf| open_store(path, &build_config),
            release_store,
        )
        .await?;

        let reused = stores.iter().filter(|s| s.was_reused()).count();
        info!(
            "Quorum index ready: {} stores ({} reused) in {:.2}s",
            stores.len(),
            reused,
            start.elapsed().as_secs_f64()
        );

        Ok(Self::from_stores(stores))
    }

    pub(crate) fn from_stores(stores: Vec<Arc<CodeStore>>) -> Self {
        Self {
            stores,
            closed: AtomicBool::new(false),
        }
    }

    /// True when `code` is present in at least [`QUORUM`] stores.
    ///
    /// Blank input is `Ok(false)`. Storage faults are returned, never
    /// reported as an invalid code.
    pub fn is_valid(&self, code: &str) -> Result<bool> {
        let Some(code) = normalize_code(code) else {
            return Ok(false);
        };
        meets_quorum(&self.stores, &code, QUORUM)
    }

    /// Stores in input path order.
    pub fn stores(&self) -> &[Arc<CodeStore>] {
        &self.stores
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close every store. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for store in &self.stores {
            if let Err(e) = store.close() {
                warn!(
                    "Failed to close index for {}: {}",
                    store.source_path().display(),
                    e
                );
            }
        }
        info!("Closed quorum index ({} stores)", self.stores.len());
    }
}

impl Drop for QuorumIndex {
    fn drop(&mut self) {
        self.close();
    }
}
