//! Persistent per-file code stores.
//!
//! This module provides:
//! - A SQLite-backed presence-only code set bound to one source file
//! - Build-or-reuse lifecycle keyed on a structural marker and mtime
//! - The `CodeLookup` seam the quorum predicate is written against

mod code_store;
mod manifest;

pub use code_store::CodeStore;
pub use manifest::{find_manifest, IndexManifest, MANIFEST_FILE_NAME, MANIFEST_PREFIX};

use crate::Result;

/// Membership test over one code list.
///
/// Implementations normalize the query the same way the list was ingested.
/// "Not present" is `Ok(false)`; storage faults must be returned as errors.
pub trait CodeLookup: Send + Sync {
    fn has(&self, code: &str) -> Result<bool>;
}

impl<T: CodeLookup + ?Sized> CodeLookup for std::sync::Arc<T> {
    fn has(&self, code: &str) -> Result<bool> {
        (**self).has(code)
    }
}
