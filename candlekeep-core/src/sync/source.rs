//! Upstream fetch boundary.
//!
//! The store never talks to a market data API itself; it asks a
//! [`FetchSource`] for exactly the ranges `Store::missing_ranges` reports.

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{DatasetKey, OhlcvRow};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no upstream data for {key}")]
    NotFound { key: DatasetKey },

    #[error("upstream I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed upstream data in {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("fetch failed: {0}")]
    Other(String),
}

/// Source of rows for `[from, to]` (inclusive, UTC seconds).
///
/// Implementations may return rows in any order; retries and rate limiting
/// are theirs to handle.
pub trait FetchSource: Send + Sync {
    fn fetch(&self, key: &DatasetKey, from: i64, to: i64) -> Result<Vec<OhlcvRow>, FetchError>;

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}
