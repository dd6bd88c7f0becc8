//! On-disk container layout.
//!
//! ```text
//! {root}/
//!   data/{EXCHANGE}/{SYMBOL}/{interval}/
//!     meta.json                 commit point
//!     rows-00000007.parquet     current row file (named by meta.json)
//!   corporate_actions.json      action ledger
//!   backups/{stamp}/            snapshots
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use super::StorageError;
use crate::domain::{DatasetKey, Exchange, Interval};

pub const META_FILE: &str = "meta.json";
pub const LEDGER_FILE: &str = "corporate_actions.json";
const ROW_FILE_PREFIX: &str = "rows-";
const ROW_FILE_EXT: &str = "parquet";

#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    pub fn exchange_dir(&self, exchange: Exchange) -> PathBuf {
        self.data_dir().join(exchange.as_str())
    }

    pub fn symbol_dir(&self, exchange: Exchange, symbol: &str) -> PathBuf {
        self.exchange_dir(exchange).join(symbol)
    }

    /// `{root}/data/{EXCHANGE}/{SYMBOL}/{interval}`
    pub fn dataset_dir(&self, key: &DatasetKey) -> PathBuf {
        self.symbol_dir(key.exchange, &key.symbol)
            .join(key.interval.as_str())
    }

    pub fn meta_path(&self, key: &DatasetKey) -> PathBuf {
        self.dataset_dir(key).join(META_FILE)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Keys of every directory that holds a committed dataset.
    pub fn keys(&self) -> Result<Vec<DatasetKey>, StorageError> {
        let mut keys = Vec::new();
        for exchange in Exchange::ALL {
            for symbol in self.symbols(exchange)? {
                for interval in self.intervals(exchange, &symbol)? {
                    keys.push(DatasetKey::new(exchange, &symbol, interval));
                }
            }
        }
        Ok(keys)
    }

    /// Symbol directories under an exchange, sorted.
    pub fn symbols(&self, exchange: Exchange) -> Result<Vec<String>, StorageError> {
        let mut out: Vec<String> = subdirs(&self.exchange_dir(exchange))?
            .into_iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();
        out.sort();
        Ok(out)
    }

    /// Intervals with a committed dataset for a symbol, in interval order.
    pub fn intervals(
        &self,
        exchange: Exchange,
        symbol: &str,
    ) -> Result<Vec<Interval>, StorageError> {
        let mut out: Vec<Interval> = subdirs(&self.symbol_dir(exchange, symbol))?
            .into_iter()
            .filter(|p| p.join(META_FILE).is_file())
            .filter_map(|p| p.file_name()?.to_str()?.parse().ok())
            .collect();
        out.sort();
        Ok(out)
    }
}

/// File name of row file `version`.
pub fn row_file_name(version: u64) -> String {
    format!("{ROW_FILE_PREFIX}{version:08}.{ROW_FILE_EXT}")
}

pub fn is_row_file(name: &str) -> bool {
    name.starts_with(ROW_FILE_PREFIX) && name.ends_with(&format!(".{ROW_FILE_EXT}"))
}

pub fn is_temp_file(name: &str) -> bool {
    name.ends_with(".tmp")
}

/// Immediate subdirectories; a missing directory has none.
pub(crate) fn subdirs(dir: &Path) -> Result<Vec<PathBuf>, StorageError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(dir, e)),
    };
    let mut out = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| StorageError::io(dir, e))?.path();
        if path.is_dir() {
            out.push(path);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_dir_mirrors_namespace() {
        let layout = Layout::new("/srv/ck");
        let key = DatasetKey::new(Exchange::Nse, "reliance", Interval::Minute15);
        assert_eq!(
            layout.dataset_dir(&key),
            PathBuf::from("/srv/ck/data/NSE/RELIANCE/15minute")
        );
        assert_eq!(
            layout.meta_path(&key),
            PathBuf::from("/srv/ck/data/NSE/RELIANCE/15minute/meta.json")
        );
    }

    #[test]
    fn row_file_names() {
        assert_eq!(row_file_name(7), "rows-00000007.parquet");
        assert!(is_row_file("rows-00000007.parquet"));
        assert!(!is_row_file("rows-00000007.parquet.tmp"));
        assert!(is_temp_file("meta.json.tmp"));
    }

    #[test]
    fn missing_dirs_list_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        assert!(layout.keys().unwrap().is_empty());
        assert!(layout.symbols(Exchange::Bse).unwrap().is_empty());
    }
}
