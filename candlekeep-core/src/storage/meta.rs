//! Per-dataset metadata sidecar.
//!
//! `meta.json` is the commit point of a dataset: a row file only becomes
//! visible to readers once a meta file naming it has been renamed into place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::StorageError;
use crate::domain::TimeRange;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    pub row_count: usize,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every committed write.
    pub version: u64,
    /// Row file name, relative to the dataset directory.
    pub data_file: String,
    /// blake3 of the row file bytes.
    pub data_hash: String,
    pub data_bytes: u64,
    pub schema_version: u32,
    pub compression: String,
}

impl DatasetMeta {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_timestamp, self.end_timestamp)
    }
}

/// Read a meta file; `None` if the dataset was never committed.
pub fn read_meta(path: &Path) -> Result<Option<DatasetMeta>, StorageError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| StorageError::Metadata(format!("{}: {e}", path.display())))
}

/// Write `meta` next to `path` and rename it over `path`.
pub fn write_meta(path: &Path, meta: &DatasetMeta) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(meta)
        .map_err(|e| StorageError::Metadata(format!("serialize: {e}")))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(|e| StorageError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StorageError::io(path, e)
    })
}
