use std::path::PathBuf;
use thiserror::Error;

use crate::domain::KeyError;
use crate::schema::ValidationError;

/// Storage engine errors. Nothing here is retried internally.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Rows failed invariant checks; the stored dataset is unchanged.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The key cannot name a dataset directory.
    #[error(transparent)]
    InvalidKey(#[from] KeyError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("row file codec error: {0}")]
    Codec(String),

    #[error("dataset metadata error: {0}")]
    Metadata(String),

    #[error("corrupt dataset at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }
}
