//! Promo Index - persistent code indexes with quorum validation.
//!
//! A promo code is accepted only if it appears in at least two of three
//! independently maintained code lists. Each list is a large newline-delimited
//! file; rescanning them on every start is too slow, so this crate builds a
//! persistent SQLite index per file, reuses it while it is fresh, and answers
//! majority-membership queries against the set.
//!
//! # Example
//!
//! ```rust,ignore
//! use promo_index::{IndexConfig, PromoValidator};
//!
//! #[tokio::main]
//! async fn main() -> promo_index::Result<()> {
//!     let paths = ["couponbase1", "couponbase2", "couponbase3"];
//!     let validator = PromoValidator::open(&paths, &IndexConfig::default()).await?;
//!
//!     if validator.is_valid("happyhrs")? {
//!         println!("accepted");
//!     }
//!
//!     validator.close();
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod config;
pub mod error;
pub mod freshness;
pub mod normalize;
pub mod pool;
pub mod prefilter;
pub mod quorum;
pub mod store;
pub mod validator;

pub use config::{promo_files_from_env, IndexConfig, QUORUM};
pub use error::{IndexError, Result};
pub use normalize::normalize_code;
pub use prefilter::{BloomSnapshot, CodePrefilter};
pub use quorum::{meets_quorum, QuorumIndex};
pub use store::{CodeLookup, CodeStore, IndexManifest};
pub use validator::{PromoValidator, Verdict};
