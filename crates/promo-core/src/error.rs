//! Error types for the promo code index.
//!
//! Three kinds matter to callers: configuration errors (rejected before any
//! work starts), build errors (fatal to opening an index), and lookup errors
//! (surfaced per request, never downgraded to "code invalid").

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for index construction and lookups.
#[derive(Debug, Error)]
pub enum IndexError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    // Construction errors
    #[error("Failed to build index for {path}: {source}")]
    Build {
        path: PathBuf,
        #[source]
        source: Box<IndexError>,
    },

    #[error("Build worker failed: {message}")]
    Task { message: String },

    // Request-time errors
    #[error("Lookup failed in index for {path}: {source}")]
    Lookup {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Index for {path} is closed")]
    StoreClosed { path: PathBuf },

    // Underlying causes
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Snapshot error: {message}")]
    Snapshot {
        message: String,
        #[source]
        source: Option<bincode::Error>,
    },
}

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

impl From<std::io::Error> for IndexError {
    fn from(err: std::io::Error) -> Self {
        IndexError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for IndexError {
    fn from(err: rusqlite::Error) -> Self {
        IndexError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(err: serde_json::Error) -> Self {
        IndexError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        IndexError::Snapshot {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl IndexError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        IndexError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        IndexError::Config {
            message: message.into(),
        }
    }

    /// Wrap a cause as a build failure for `path`.
    ///
    /// Already-wrapped build errors are returned unchanged so the offending
    /// path is reported once.
    pub fn build(path: impl Into<PathBuf>, cause: IndexError) -> Self {
        match cause {
            IndexError::Build { .. } => cause,
            other => IndexError::Build {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, IndexError::Config { .. })
    }

    pub fn is_build(&self) -> bool {
        matches!(self, IndexError::Build { .. } | IndexError::Task { .. })
    }

    /// True for request-time storage faults, including lookups against a
    /// closed store.
    pub fn is_lookup(&self) -> bool {
        matches!(
            self,
            IndexError::Lookup { .. } | IndexError::StoreClosed { .. }
        )
    }

    /// The source file this error is attributed to, if any.
    pub fn source_path(&self) -> Option<&Path> {
        match self {
            IndexError::Build { path, .. }
            | IndexError::Lookup { path, .. }
            | IndexError::StoreClosed { path } => Some(path),
            IndexError::Io { path, .. } => path.as_deref(),
            _ => None,
        }
    }
}
