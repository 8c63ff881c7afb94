//! Validation context handed to request handlers.
//!
//! Built once at startup and passed by reference; there is no global
//! validator state. Holds the authoritative quorum index, the optional bloom
//! prefilters, and the coarse length rule applied before any lookup.

use crate::config::{IndexConfig, QUORUM};
use crate::normalize::normalize_code;
use crate::pool::build_all;
use crate::prefilter::CodePrefilter;
use crate::quorum::QuorumIndex;
use crate::store::CodeStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of validating one candidate code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Present in at least [`QUORUM`] code lists.
    Accepted,
    /// Empty after trimming.
    Blank,
    /// Outside the configured length bounds.
    InvalidLength,
    /// Not present in enough code lists.
    NotListed,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Verdict::Accepted)
    }
}

/// Promo code validator.
#[derive(Debug)]
pub struct PromoValidator {
    index: QuorumIndex,
    prefilters: Option<Vec<CodePrefilter>>,
    length: RangeInclusive<usize>,
}

impl PromoValidator {
    /// Open the quorum index and, if enabled, one prefilter per store.
    ///
    /// Prefilters are filled from the opened stores, so they match the index
    /// generation being served even when a store was reused. All-or-nothing:
    /// a prefilter failure closes the index before the error is returned.
    pub async fn open<P: AsRef<Path>>(paths: &[P], config: &IndexConfig) -> Result<Self> {
        let index = QuorumIndex::open(paths, config).await?;

        let prefilters = if config.enable_prefilter {
            let build_config = config.clone();
            let built = build_all(
                index.stores().to_vec(),
                config.max_workers,
                move |store: Arc<CodeStore>| CodePrefilter::build_or_load(&store, &build_config),
                drop,
            )
            .await;
            match built {
                Ok(filters) => Some(filters),
                Err(e) => {
                    index.close();
                    return Err(e);
                }
            }
        } else {
            None
        };

        info!(
            "Promo validator ready ({} lists, prefilter {})",
            index.len(),
            if prefilters.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            index,
            prefilters,
            length: config.min_code_len..=config.max_code_len,
        })
    }

    /// Classify `raw`: normalize, check length, pre-reject, then the quorum.
    pub fn validate(&self, raw: &str) -> Result<Verdict> {
        let Some(code) = normalize_code(raw) else {
            return Ok(Verdict::Blank);
        };

        if !self.length.contains(&code.chars().count()) {
            return Ok(Verdict::InvalidLength);
        }

        if let Some(filters) = &self.prefilters {
            let maybe = filters.iter().filter(|f| f.might_contain(&code)).count();
            if maybe < QUORUM {
                debug!("Prefilter rejected code ({} of {} lists)", maybe, filters.len());
                return Ok(Verdict::NotListed);
            }
        }

        if self.index.is_valid(&code)? {
            Ok(Verdict::Accepted)
        } else {
            Ok(Verdict::NotListed)
        }
    }

    /// Convenience wrapper over [`PromoValidator::validate`].
    pub fn is_valid(&self, raw: &str) -> Result<bool> {
        self.validate(raw).map(|v| v.is_accepted())
    }

    pub fn index(&self) -> &QuorumIndex {
        &self.index
    }

    pub fn prefilters(&self) -> Option<&[CodePrefilter]> {
        self.prefilters.as_deref()
    }

    /// Release every store. Idempotent.
    pub fn close(&self) {
        self.index.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::path::PathBuf;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_lists(dir: &Path, lists: &[&[&str]]) -> Vec<PathBuf> {
        lists
            .iter()
            .enumerate()
            .map(|(i, codes)| {
                let path = dir.join(format!("couponbase{}", i + 1));
                let mut content = codes.join("\n");
                content.push('\n');
                fs::write(&path, content).unwrap();
                path
            })
            .collect()
    }

    #[test]
    fn test_verdict_is_accepted() {
        assert!(Verdict::Accepted.is_accepted());
        assert!(!Verdict::NotListed.is_accepted());
        assert!(!Verdict::Blank.is_accepted());
    }

    #[tokio::test]
    async fn test_validate_with_prefilter() {
        let temp = TempDir::new().unwrap();
        let paths = write_lists(
            temp.path(),
            &[&["HAPPYHRS", "FIFTYOFF"], &["FIFTYOFF"], &["HAPPYHRS", "SUPER100"]],
        );

        let validator = PromoValidator::open(&paths, &IndexConfig::default())
            .await
            .unwrap();
        assert_eq!(validator.prefilters().map(|f| f.len()), Some(3));

        assert_eq!(validator.validate("happyhrs").unwrap(), Verdict::Accepted);
        assert_eq!(validator.validate(" FIFTYOFF ").unwrap(), Verdict::Accepted);
        assert_eq!(validator.validate("SUPER100").unwrap(), Verdict::NotListed);
        assert_eq!(validator.validate("   ").unwrap(), Verdict::Blank);
        assert_eq!(validator.validate("SHORT").unwrap(), Verdict::InvalidLength);
        assert_eq!(
            validator.validate("WAYTOOLONGCODE").unwrap(),
            Verdict::InvalidLength
        );
        assert!(validator.is_valid("HappyHrs").unwrap());

        validator.close();
        assert!(validator.index().is_closed());
    }

    #[tokio::test]
    async fn test_validate_without_prefilter() {
        let temp = TempDir::new().unwrap();
        let paths = write_lists(temp.path(), &[&["ABCD1234"], &[], &["ABCD1234"]]);

        let config = IndexConfig {
            enable_prefilter: false,
            ..IndexConfig::default()
        };
        let validator = PromoValidator::open(&paths, &config).await.unwrap();

        assert!(validator.prefilters().is_none());
        assert!(validator.is_valid("abcd1234").unwrap());
        assert!(!validator.is_valid("ZZZZ0000").unwrap());
        assert!(!temp.path().join("couponbase1.bloom").exists());
    }

    #[tokio::test]
    async fn test_duplicate_list_is_rejected() {
        let temp = TempDir::new().unwrap();
        let paths = write_lists(temp.path(), &[&["ONLYINF1"], &["OTHER123"]]);
        let (f1, f2) = (paths[0].clone(), paths[1].clone());

        for listed in [vec![f1.clone(), f2.clone(), f1.clone()], vec![f1.clone(), f1.clone()]] {
            let err = PromoValidator::open(&listed, &IndexConfig::default())
                .await
                .unwrap_err();
            assert!(err.is_config());
        }

        let validator = PromoValidator::open(&[&f1, &f2], &IndexConfig::default())
            .await
            .unwrap();
        assert_eq!(validator.validate("ONLYINF1").unwrap(), Verdict::NotListed);
    }

    #[tokio::test]
    async fn test_prefilter_matches_reused_index() {
        let temp = TempDir::new().unwrap();
        let paths = write_lists(
            temp.path(),
            &[&["SERVED01"], &["SERVED01"], &["SERVED01"]],
        );
        let backdate = |p: &PathBuf| {
            File::options()
                .write(true)
                .open(p)
                .unwrap()
                .set_modified(SystemTime::now() - Duration::from_secs(3600))
                .unwrap();
        };
        for p in &paths {
            backdate(p);
        }

        let no_prefilter = IndexConfig {
            enable_prefilter: false,
            ..IndexConfig::default()
        };
        PromoValidator::open(&paths, &no_prefilter)
            .await
            .unwrap()
            .close();

        // Lists replaced with their old mtimes kept; the indexes are reused.
        for p in &paths {
            fs::write(p, "REPLACED\n").unwrap();
            backdate(p);
        }

        let validator = PromoValidator::open(&paths, &IndexConfig::default())
            .await
            .unwrap();
        assert!(validator.index().stores().iter().all(|s| s.was_reused()));
        assert!(validator
            .prefilters()
            .unwrap()
            .iter()
            .all(|f| !f.was_reused() && f.might_contain("SERVED01")));
        assert_eq!(validator.validate("SERVED01").unwrap(), Verdict::Accepted);
        assert_eq!(validator.validate("REPLACED").unwrap(), Verdict::NotListed);
    }

    #[tokio::test]
    async fn test_lookup_error_surfaces() {
        let temp = TempDir::new().unwrap();
        let paths = write_lists(temp.path(), &[&["ABCD1234"], &["ABCD1234"], &[]]);

        let validator = PromoValidator::open(&paths, &IndexConfig::default())
            .await
            .unwrap();
        validator.close();

        let err = validator.validate("ABCD1234").unwrap_err();
        assert!(err.is_lookup());
    }
}
