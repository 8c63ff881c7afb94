//! Index configuration.
//!
//! Defaults mirror the production deployment: three promo files, four build
//! workers, one million records per durable batch, a 0.1% bloom target, and
//! codes between 8 and 10 characters.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Environment variable holding the comma-separated promo file list.
pub const PROMO_FILES_ENV: &str = "PROMO_FILES";

/// Number of stores a code must appear in to be accepted.
pub const QUORUM: usize = 2;

/// Configuration for building and querying the quorum index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IndexConfig {
    /// Suffix appended to a source path to name its index directory.
    pub index_suffix: String,
    /// Suffix appended to a source path to name its bloom snapshot.
    pub bloom_suffix: String,
    /// Records per durable commit during bulk load.
    pub batch_size: usize,
    /// Maximum number of stores built concurrently.
    pub max_workers: usize,
    /// Read connections opened per store.
    pub readers_per_store: usize,
    /// Bloom filter false-positive target.
    pub false_positive_rate: f64,
    /// Whether the validator builds bloom prefilters.
    pub enable_prefilter: bool,
    /// Shortest accepted code, in characters, after normalization.
    pub min_code_len: usize,
    /// Longest accepted code, in characters, after normalization.
    pub max_code_len: usize,
}

impl IndexConfig {
    pub const DEFAULT_INDEX_SUFFIX: &'static str = ".idx";
    pub const DEFAULT_BLOOM_SUFFIX: &'static str = ".bloom";
    pub const DEFAULT_BATCH_SIZE: usize = 1_000_000;
    pub const DEFAULT_MAX_WORKERS: usize = 4;
    pub const DEFAULT_READERS_PER_STORE: usize = 4;
    pub const DEFAULT_FALSE_POSITIVE_RATE: f64 = 0.001;
    pub const DEFAULT_MIN_CODE_LEN: usize = 8;
    pub const DEFAULT_MAX_CODE_LEN: usize = 10;

    /// Defaults overlaid with `PROMO_*` environment variables.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("PROMO_INDEX_WORKERS") {
            config.max_workers = v;
        }
        if let Some(v) = env_parse("PROMO_BATCH_SIZE") {
            config.batch_size = v;
        }
        if let Some(v) = env_parse("PROMO_PREFILTER") {
            config.enable_prefilter = v;
        }
        if let Some(v) = env_parse("PROMO_CODE_MIN_LEN") {
            config.min_code_len = v;
        }
        if let Some(v) = env_parse("PROMO_CODE_MAX_LEN") {
            config.max_code_len = v;
        }
        config
    }

    /// Reject settings the index cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(IndexError::config("max_workers must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(IndexError::config("batch_size must be at least 1"));
        }
        if self.readers_per_store == 0 {
            return Err(IndexError::config("readers_per_store must be at least 1"));
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(IndexError::config(format!(
                "false_positive_rate must be in (0, 1), got {}",
                self.false_positive_rate
            )));
        }
        if self.index_suffix.trim().is_empty() || self.bloom_suffix.trim().is_empty() {
            return Err(IndexError::config("artifact suffixes must not be empty"));
        }
        if self.index_suffix == self.bloom_suffix {
            return Err(IndexError::config(
                "index_suffix and bloom_suffix must differ",
            ));
        }
        if self.min_code_len > self.max_code_len {
            return Err(IndexError::config(format!(
                "min_code_len {} exceeds max_code_len {}",
                self.min_code_len, self.max_code_len
            )));
        }
        Ok(())
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_suffix: Self::DEFAULT_INDEX_SUFFIX.to_string(),
            bloom_suffix: Self::DEFAULT_BLOOM_SUFFIX.to_string(),
            batch_size: Self::DEFAULT_BATCH_SIZE,
            max_workers: Self::DEFAULT_MAX_WORKERS,
            readers_per_store: Self::DEFAULT_READERS_PER_STORE,
            false_positive_rate: Self::DEFAULT_FALSE_POSITIVE_RATE,
            enable_prefilter: true,
            min_code_len: Self::DEFAULT_MIN_CODE_LEN,
            max_code_len: Self::DEFAULT_MAX_CODE_LEN,
        }
    }
}

/// Promo file paths from `PROMO_FILES`, or an empty list when unset.
pub fn promo_files_from_env() -> Vec<PathBuf> {
    std::env::var(PROMO_FILES_ENV)
        .map(|v| split_csv(&v))
        .unwrap_or_default()
}

/// Split a comma-separated path list, trimming and dropping empty items.
pub fn split_csv(s: &str) -> Vec<PathBuf> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring unparsable {}={:?}", key, raw);
            None
        }
    }
}
