//! CSV file fetch source.
//!
//! Layout: `{dir}/{EXCHANGE}/{SYMBOL}/{interval}.csv` with header
//! `timestamp,open,high,low,close,volume` and timestamps in UTC seconds.

use std::path::{Path, PathBuf};
use tracing::debug;

use super::source::{FetchError, FetchSource};
use crate::domain::{DatasetKey, OhlcvRow};

#[derive(Debug, Clone)]
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_for(&self, key: &DatasetKey) -> PathBuf {
        self.dir
            .join(key.exchange.as_str())
            .join(&key.symbol)
            .join(format!("{}.csv", key.interval))
    }
}

impl FetchSource for CsvSource {
    fn fetch(&self, key: &DatasetKey, from: i64, to: i64) -> Result<Vec<OhlcvRow>, FetchError> {
        let path = self.file_for(key);
        if !path.is_file() {
            return Err(FetchError::NotFound { key: key.clone() });
        }

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| csv_error(&path, e))?;

        let mut rows = Vec::new();
        for (line, record) in reader.deserialize::<OhlcvRow>().enumerate() {
            let row = record.map_err(|e| FetchError::Malformed {
                path: path.clone(),
                message: format!("record {}: {e}", line + 1),
            })?;
            if from <= row.timestamp && row.timestamp <= to {
                rows.push(row);
            }
        }

        debug!(%key, from, to, rows = rows.len(), path = %path.display(), "csv fetch");
        Ok(rows)
    }

    fn name(&self) -> &str {
        "csv"
    }
}

fn csv_error(path: &Path, e: csv::Error) -> FetchError {
    match e.into_kind() {
        csv::ErrorKind::Io(source) => FetchError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => FetchError::Malformed {
            path: path.to_path_buf(),
            message: format!("{other:?}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Exchange, Interval};
    use std::fs;

    fn write_csv(dir: &Path, key: &DatasetKey, body: &str) {
        let source = CsvSource::new(dir);
        let path = source.file_for(key);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn reads_rows_within_range() {
        let dir = tempfile::tempdir().unwrap();
        let key = DatasetKey::new(Exchange::Nse, "ABC", Interval::Day);
        write_csv(
            dir.path(),
            &key,
            "timestamp,open,high,low,close,volume\n\
             100, 10.0, 11.0, 9.0, 10.5, 1000\n\
             200,10.5,12.0,10.0,11.0,1500\n\
             300,11.0,11.5,10.5,11.2,900\n",
        );

        let rows = CsvSource::new(dir.path()).fetch(&key, 150, 300).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], OhlcvRow::new(200, 10.5, 12.0, 10.0, 11.0, 1500));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let key = DatasetKey::new(Exchange::Bse, "NONE", Interval::Day);
        assert!(matches!(
            CsvSource::new(dir.path()).fetch(&key, 0, 10),
            Err(FetchError::NotFound { .. })
        ));
    }

    #[test]
    fn bad_record_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let key = DatasetKey::new(Exchange::Nse, "BAD", Interval::Day);
        write_csv(
            dir.path(),
            &key,
            "timestamp,open,high,low,close,volume\n100,ten,11,9,10,5\n",
        );
        assert!(matches!(
            CsvSource::new(dir.path()).fetch(&key, 0, 1000),
            Err(FetchError::Malformed { .. })
        ));
    }
}
