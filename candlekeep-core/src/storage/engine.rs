//! The storage engine.
//!
//! Write path for one key, under that key's lock:
//! validate → encode → `rows-N.parquet.tmp` → rename → `meta.json.tmp` →
//! rename (commit) → remove the previous row file.
//! A crash before the meta rename leaves the old meta pointing at the old,
//! untouched row file; the orphans are cleaned up by `vacuum`.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use tracing::{debug, info, warn};

use super::layout::{row_file_name, Layout};
use super::locks::KeyLocks;
use super::meta::{read_meta, write_meta, DatasetMeta};
use super::{parquet, StorageError};
use crate::config::StoreConfig;
use crate::domain::{check_symbol, normalize_symbol, DatasetKey, Exchange, OhlcvRow, TimeRange};
use crate::schema::{ValidationContext, ValidationReport, Validator, SCHEMA_VERSION};

/// How `save` combines incoming rows with the stored dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Replace the dataset wholesale.
    Overwrite,
    /// Union with the stored rows; on equal timestamps the incoming row wins.
    Merge,
}

/// Multi-dataset OHLCV store rooted at one directory.
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    layout: Layout,
    validator: Validator,
    locks: KeyLocks,
    meta_cache: RwLock<HashMap<DatasetKey, DatasetMeta>>,
}

impl Store {
    /// Open (creating if needed) the container at `config.storage.root`.
    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        let layout = Layout::new(config.storage.root.clone());
        let data_dir = layout.data_dir();
        fs::create_dir_all(&data_dir).map_err(|e| StorageError::io(&data_dir, e))?;
        info!(root = %layout.root().display(), "store opened");

        Ok(Self {
            validator: Validator::new(config.validation.clone()),
            config,
            layout,
            locks: KeyLocks::new(),
            meta_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validate and persist rows. Returns the number of rows now stored.
    ///
    /// Nothing is written if the resulting dataset fails validation.
    pub fn save(
        &self,
        key: &DatasetKey,
        rows: &[OhlcvRow],
        mode: SaveMode,
    ) -> Result<usize, StorageError> {
        self.transaction(key, |tx| tx.save(rows, mode))
    }

    /// Rows of `key` within the inclusive range; `None` if never written.
    pub fn read(
        &self,
        key: &DatasetKey,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Option<Vec<OhlcvRow>>, StorageError> {
        let Some(meta) = self.meta(key)? else {
            debug!(%key, "read of unknown dataset");
            return Ok(None);
        };

        let range = match (from, to) {
            (None, None) => None,
            (from, to) => Some(TimeRange::new(
                from.unwrap_or(i64::MIN),
                to.unwrap_or(i64::MAX),
            )),
        };
        if range.is_some_and(|r| r.is_empty()) {
            return Ok(Some(Vec::new()));
        }

        let rows = match self.read_committed(key, &meta, range) {
            Err(StorageError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                // A writer committed a new version and removed the file we
                // were pointed at; follow the fresh meta once.
                self.evict(key);
                match self.meta(key)? {
                    Some(fresh) => self.read_committed(key, &fresh, range)?,
                    None => return Ok(None),
                }
            }
            other => other?,
        };

        debug!(%key, rows = rows.len(), "dataset read");
        Ok(Some(rows))
    }

    /// `(min, max)` timestamps of the stored dataset, from metadata only.
    pub fn existing_range(&self, key: &DatasetKey) -> Result<Option<TimeRange>, StorageError> {
        Ok(self.meta(key)?.map(|m| m.range()))
    }

    /// Ranges that must be fetched to cover `[from, to]`.
    ///
    /// Forward-only: with no data the whole request is missing; otherwise
    /// only `(existing_max + 1, to)` is, and nothing before the stored
    /// minimum is ever requested.
    pub fn missing_ranges(
        &self,
        key: &DatasetKey,
        from: i64,
        to: i64,
    ) -> Result<Vec<TimeRange>, StorageError> {
        if from > to {
            return Ok(Vec::new());
        }
        let ranges = match self.existing_range(key)? {
            None => vec![TimeRange::new(from, to)],
            Some(existing) if existing.to < to => vec![TimeRange::new(existing.to + 1, to)],
            Some(_) => Vec::new(),
        };
        debug!(%key, from, to, gaps = ranges.len(), "missing ranges");
        Ok(ranges)
    }

    /// Remove one dataset. Returns false if it did not exist.
    pub fn delete(&self, key: &DatasetKey) -> Result<bool, StorageError> {
        key.check()?;
        let lock = self.locks.get(key);
        let _guard = lock.lock();

        let dir = self.layout.dataset_dir(key);
        self.evict(key);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(%key, "dataset deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }

    /// Remove every dataset of a symbol. Returns how many were removed.
    pub fn delete_symbol(&self, exchange: Exchange, symbol: &str) -> Result<usize, StorageError> {
        let symbol = normalize_symbol(symbol);
        check_symbol(&symbol)?;
        let mut removed = 0;
        for interval in self.layout.intervals(exchange, &symbol)? {
            if self.delete(&DatasetKey::new(exchange, &symbol, interval))? {
                removed += 1;
            }
        }

        let dir = self.layout.symbol_dir(exchange, &symbol);
        if let Err(e) = fs::remove_dir(&dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(dir = %dir.display(), error = %e, "symbol directory left in place");
            }
        }
        info!(%exchange, %symbol, removed, "symbol deleted");
        Ok(removed)
    }

    /// Run `f` holding the write lock of `key`.
    ///
    /// Everything done through the [`Transaction`] is one read-modify-write
    /// with respect to other writers of the same key.
    pub fn transaction<T, E>(
        &self,
        key: &DatasetKey,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StorageError>,
    {
        key.check().map_err(StorageError::from)?;
        let lock = self.locks.get(key);
        let _guard = lock.lock();
        f(&Transaction { store: self, key })
    }

    /// Committed metadata for `key`, cached after the first read.
    pub fn meta(&self, key: &DatasetKey) -> Result<Option<DatasetMeta>, StorageError> {
        key.check()?;
        if let Some(meta) = self.meta_cache.read().get(key) {
            debug!(%key, "metadata cache hit");
            return Ok(Some(meta.clone()));
        }
        let meta = read_meta(&self.layout.meta_path(key))?;
        Ok(meta.map(|m| self.remember(key, m)))
    }

    /// Cache `meta` unless a newer version is already cached; returns the
    /// entry that stays.
    fn remember(&self, key: &DatasetKey, meta: DatasetMeta) -> DatasetMeta {
        let mut cache = self.meta_cache.write();
        match cache.get(key) {
            Some(cached) if cached.version >= meta.version => cached.clone(),
            _ => {
                cache.insert(key.clone(), meta.clone());
                meta
            }
        }
    }

    pub(crate) fn evict(&self, key: &DatasetKey) {
        self.meta_cache.write().remove(key);
    }

    fn read_committed(
        &self,
        key: &DatasetKey,
        meta: &DatasetMeta,
        range: Option<TimeRange>,
    ) -> Result<Vec<OhlcvRow>, StorageError> {
        let path = self.layout.dataset_dir(key).join(&meta.data_file);
        let bytes = fs::read(&path).map_err(|e| StorageError::io(&path, e))?;

        let hash = blake3::hash(&bytes).to_hex().to_string();
        if hash != meta.data_hash {
            return Err(StorageError::Corrupt {
                path,
                reason: format!("content hash {hash} does not match metadata {}", meta.data_hash),
            });
        }

        parquet::decode(bytes, range)
    }

    fn validate(
        &self,
        key: &DatasetKey,
        rows: &[OhlcvRow],
    ) -> Result<ValidationReport, StorageError> {
        let report = self.validator.validate(rows, ValidationContext::from(key))?;
        if report.has_warnings() {
            warn!(%key, warnings = report.stats.warning_count, "saving rows with warnings");
            for issue in &report.warnings {
                debug!(%key, %issue, "validation warning");
            }
        }
        Ok(report)
    }

    /// Write `rows` as the new committed version of `key`. Caller holds the lock.
    fn commit(&self, key: &DatasetKey, rows: &[OhlcvRow]) -> Result<DatasetMeta, StorageError> {
        let storage = &self.config.storage;
        let dir = self.layout.dataset_dir(key);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;

        let previous = read_meta(&self.layout.meta_path(key))?;
        let version = previous.as_ref().map_or(1, |m| m.version + 1);

        let bytes = parquet::encode(rows, storage.compression_level, storage.chunk_rows)?;
        let data_file = row_file_name(version);
        let data_path = dir.join(&data_file);
        let tmp_path = dir.join(format!("{data_file}.tmp"));

        fs::write(&tmp_path, &bytes).map_err(|e| StorageError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &data_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StorageError::io(&data_path, e)
        })?;

        let (first, last) = match (rows.first(), rows.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => return Err(StorageError::Metadata("refusing to commit an empty dataset".into())),
        };
        let meta = DatasetMeta {
            row_count: rows.len(),
            start_timestamp: first,
            end_timestamp: last,
            updated_at: Utc::now(),
            version,
            data_file,
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            data_bytes: bytes.len() as u64,
            schema_version: SCHEMA_VERSION,
            compression: format!("zstd({})", storage.compression_level),
        };

        if let Err(e) = write_meta(&self.layout.meta_path(key), &meta) {
            let _ = fs::remove_file(&data_path);
            return Err(e);
        }
        self.meta_cache.write().insert(key.clone(), meta.clone());

        if let Some(old) = previous.filter(|p| p.data_file != meta.data_file) {
            let old_path = dir.join(&old.data_file);
            if let Err(e) = fs::remove_file(&old_path) {
                warn!(path = %old_path.display(), error = %e, "failed to remove superseded row file");
            }
        }

        info!(%key, rows = meta.row_count, version, bytes = meta.data_bytes, "dataset committed");
        Ok(meta)
    }
}

/// Exclusive access to one key for the duration of [`Store::transaction`].
pub struct Transaction<'a> {
    store: &'a Store,
    key: &'a DatasetKey,
}

impl Transaction<'_> {
    pub fn key(&self) -> &DatasetKey {
        self.key
    }

    pub fn read(
        &self,
        from: Option<i64>,
        to: Option<i64>,
    ) -> Result<Option<Vec<OhlcvRow>>, StorageError> {
        self.store.read(self.key, from, to)
    }

    /// See [`Store::save`].
    pub fn save(&self, rows: &[OhlcvRow], mode: SaveMode) -> Result<usize, StorageError> {
        let key = self.key;
        let merged;
        let rows = match mode {
            SaveMode::Overwrite => rows,
            SaveMode::Merge => {
                let existing = self.store.read(key, None, None)?.unwrap_or_default();
                if rows.is_empty() && !existing.is_empty() {
                    return Ok(existing.len());
                }
                let mut by_ts: BTreeMap<i64, OhlcvRow> =
                    existing.into_iter().map(|r| (r.timestamp, r)).collect();
                for row in rows {
                    by_ts.insert(row.timestamp, *row);
                }
                merged = by_ts.into_values().collect::<Vec<_>>();
                &merged[..]
            }
        };

        self.store.validate(key, rows)?;
        let meta = self.store.commit(key, rows)?;
        Ok(meta.row_count)
    }
}
