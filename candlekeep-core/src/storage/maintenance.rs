//! Diagnostics and housekeeping over the whole container.

use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::layout::{is_row_file, is_temp_file, subdirs, META_FILE};
use super::meta::{read_meta, DatasetMeta};
use super::{Store, StorageError};
use crate::domain::{normalize_symbol, DatasetKey, Exchange, Interval};

/// Aggregate counts for one exchange.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExchangeStats {
    pub symbols: usize,
    pub datasets: usize,
    pub rows: usize,
    pub size_bytes: u64,
    /// Dataset count per interval name.
    pub intervals: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub root: PathBuf,
    pub exchanges: BTreeMap<String, ExchangeStats>,
    pub total_symbols: usize,
    pub total_datasets: usize,
    pub total_rows: usize,
    pub total_size_bytes: u64,
}

/// Committed metadata of one dataset plus where it lives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetInfo {
    pub key: DatasetKey,
    pub path: String,
    pub dir: PathBuf,
    pub size_bytes: u64,
    pub meta: DatasetMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VacuumReport {
    pub removed: Vec<PathBuf>,
    pub bytes_freed: u64,
}

impl Store {
    /// Counts of symbols, datasets, rows and bytes per exchange.
    pub fn stats(&self) -> Result<StoreStats, StorageError> {
        let mut stats = StoreStats {
            root: self.layout().root().to_path_buf(),
            ..StoreStats::default()
        };

        for exchange in Exchange::ALL {
            let mut ex = ExchangeStats::default();
            for symbol in self.layout().symbols(exchange)? {
                let mut has_data = false;
                for interval in self.layout().intervals(exchange, &symbol)? {
                    let key = DatasetKey::new(exchange, &symbol, interval);
                    let Some(meta) = self.meta(&key)? else {
                        continue;
                    };
                    has_data = true;
                    ex.datasets += 1;
                    ex.rows += meta.row_count;
                    ex.size_bytes += dir_size(&self.layout().dataset_dir(&key))?;
                    *ex.intervals.entry(interval.to_string()).or_default() += 1;
                }
                if has_data {
                    ex.symbols += 1;
                }
            }
            if ex.datasets == 0 {
                continue;
            }
            stats.total_symbols += ex.symbols;
            stats.total_datasets += ex.datasets;
            stats.total_rows += ex.rows;
            stats.total_size_bytes += ex.size_bytes;
            stats.exchanges.insert(exchange.to_string(), ex);
        }

        Ok(stats)
    }

    pub fn dataset_info(&self, key: &DatasetKey) -> Result<Option<DatasetInfo>, StorageError> {
        let Some(meta) = self.meta(key)? else {
            return Ok(None);
        };
        let dir = self.layout().dataset_dir(key);
        Ok(Some(DatasetInfo {
            key: key.clone(),
            path: key.data_path(),
            size_bytes: dir_size(&dir)?,
            dir,
            meta,
        }))
    }

    /// Every committed dataset key.
    pub fn keys(&self) -> Result<Vec<DatasetKey>, StorageError> {
        self.layout().keys()
    }

    /// Symbols with at least one committed dataset on `exchange`.
    pub fn list_symbols(&self, exchange: Exchange) -> Result<Vec<String>, StorageError> {
        let mut out = Vec::new();
        for symbol in self.layout().symbols(exchange)? {
            if !self.layout().intervals(exchange, &symbol)?.is_empty() {
                out.push(symbol);
            }
        }
        Ok(out)
    }

    pub fn list_intervals(
        &self,
        exchange: Exchange,
        symbol: &str,
    ) -> Result<Vec<Interval>, StorageError> {
        self.layout().intervals(exchange, &normalize_symbol(symbol))
    }

    /// Snapshot every committed dataset and the ledger file into
    /// `backups/{stamp}/`, then prune to `max_backups` snapshots.
    ///
    /// Each dataset is copied under its write lock, so every copied row
    /// file matches its copied meta.
    pub fn backup(&self) -> Result<PathBuf, StorageError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
        let dest = self.layout().backups_dir().join(&stamp);
        fs::create_dir_all(&dest).map_err(|e| StorageError::io(&dest, e))?;

        for key in self.keys()? {
            let src_dir = self.layout().dataset_dir(&key);
            let rel = src_dir
                .strip_prefix(self.layout().root())
                .map_err(|e| StorageError::Metadata(format!("backup path: {e}")))?;
            let dst_dir = dest.join(rel);

            self.transaction(&key, |_| -> Result<(), StorageError> {
                let Some(meta) = read_meta(&src_dir.join(META_FILE))? else {
                    return Ok(());
                };
                fs::create_dir_all(&dst_dir).map_err(|e| StorageError::io(&dst_dir, e))?;
                copy_file(&src_dir.join(&meta.data_file), &dst_dir.join(&meta.data_file))?;
                copy_file(&src_dir.join(META_FILE), &dst_dir.join(META_FILE))
            })?;
        }

        let ledger = self.layout().ledger_path();
        if ledger.is_file() {
            if let Some(name) = ledger.file_name() {
                copy_file(&ledger, &dest.join(name))?;
            }
        }
        info!(dest = %dest.display(), "backup created");

        self.prune_backups()?;
        Ok(dest)
    }

    /// Existing snapshots, oldest first.
    pub fn list_backups(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut backups = subdirs(&self.layout().backups_dir())?;
        backups.sort();
        Ok(backups)
    }

    fn prune_backups(&self) -> Result<(), StorageError> {
        let backups = self.list_backups()?;
        let keep = self.config().storage.max_backups;
        if backups.len() <= keep {
            return Ok(());
        }
        for old in &backups[..backups.len() - keep] {
            fs::remove_dir_all(old).map_err(|e| StorageError::io(old, e))?;
            info!(path = %old.display(), "pruned old backup");
        }
        Ok(())
    }

    /// Remove row files no meta points at and temp files left by a crash.
    pub fn vacuum(&self) -> Result<VacuumReport, StorageError> {
        let mut report = VacuumReport::default();

        for exchange in Exchange::ALL {
            for symbol_dir in subdirs(&self.layout().exchange_dir(exchange))? {
                for dataset_dir in subdirs(&symbol_dir)? {
                    let Some(key) = key_of(exchange, &dataset_dir) else {
                        continue;
                    };
                    self.transaction(&key, |_| {
                        vacuum_dataset(&dataset_dir, &mut report)
                    })?;
                    self.evict(&key);
                }
            }
        }

        info!(
            removed = report.removed.len(),
            bytes = report.bytes_freed,
            "vacuum finished"
        );
        Ok(report)
    }
}

fn key_of(exchange: Exchange, dataset_dir: &Path) -> Option<DatasetKey> {
    let interval: Interval = dataset_dir.file_name()?.to_str()?.parse().ok()?;
    let symbol = dataset_dir.parent()?.file_name()?.to_str()?;
    Some(DatasetKey::new(exchange, symbol, interval))
}

fn vacuum_dataset(dir: &Path, report: &mut VacuumReport) -> Result<(), StorageError> {
    let current = read_meta(&dir.join(META_FILE))?.map(|m| m.data_file);
    let entries = fs::read_dir(dir).map_err(|e| StorageError::io(dir, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(dir, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let orphan = is_temp_file(&name)
            || (is_row_file(&name) && current.as_deref() != Some(name.as_str()));
        if !orphan {
            continue;
        }

        let path = entry.path();
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        match fs::remove_file(&path) {
            Ok(()) => {
                report.bytes_freed += size;
                report.removed.push(path);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "could not remove orphan"),
        }
    }
    Ok(())
}

fn copy_file(from: &Path, to: &Path) -> Result<(), StorageError> {
    fs::copy(from, to).map_err(|e| StorageError::io(from, e))?;
    Ok(())
}

/// Total size of regular files directly inside `dir`.
fn dir_size(dir: &Path) -> Result<u64, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut total = 0;
    for entry in entries {
        let meta = entry
            .and_then(|e| e.metadata())
            .map_err(|e| StorageError::io(dir, e))?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}
