//! Row file codec: zstd-compressed Parquet, one row group per `chunk_rows`.

use polars::prelude::*;
use std::io::Cursor;

use super::StorageError;
use crate::domain::{OhlcvRow, TimeRange};
use crate::schema::{validate_columns, SchemaType};

fn codec(message: impl std::fmt::Display) -> StorageError {
    StorageError::Codec(message.to_string())
}

/// Encode rows into Parquet file bytes.
pub fn encode(
    rows: &[OhlcvRow],
    compression_level: i32,
    chunk_rows: usize,
) -> Result<Vec<u8>, StorageError> {
    let mut df = rows_to_frame(rows)?;
    let level = ZstdLevel::try_new(compression_level).map_err(codec)?;

    let mut buf = Vec::new();
    ParquetWriter::new(&mut buf)
        .with_compression(ParquetCompression::Zstd(Some(level)))
        .with_row_group_size(Some(chunk_rows))
        .finish(&mut df)
        .map_err(|e| codec(format!("write parquet: {e}")))?;
    Ok(buf)
}

/// Decode Parquet file bytes, keeping only rows inside `range` if given.
pub fn decode(bytes: Vec<u8>, range: Option<TimeRange>) -> Result<Vec<OhlcvRow>, StorageError> {
    let df = ParquetReader::new(Cursor::new(bytes))
        .finish()
        .map_err(|e| codec(format!("read parquet: {e}")))?;
    check_columns(&df)?;

    let df = match range {
        Some(r) => df
            .lazy()
            .filter(
                col("timestamp")
                    .gt_eq(lit(r.from))
                    .and(col("timestamp").lt_eq(lit(r.to))),
            )
            .collect()
            .map_err(|e| codec(format!("range filter: {e}")))?,
        None => df,
    };

    frame_to_rows(&df)
}

fn rows_to_frame(rows: &[OhlcvRow]) -> Result<DataFrame, StorageError> {
    let timestamps: Vec<i64> = rows.iter().map(|r| r.timestamp).collect();
    let opens: Vec<f64> = rows.iter().map(|r| r.open).collect();
    let highs: Vec<f64> = rows.iter().map(|r| r.high).collect();
    let lows: Vec<f64> = rows.iter().map(|r| r.low).collect();
    let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
    let volumes: Vec<i64> = rows.iter().map(|r| r.volume).collect();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| codec(format!("dataframe creation: {e}")))
}

fn check_columns(df: &DataFrame) -> Result<(), StorageError> {
    let columns: Vec<(&str, SchemaType)> = df
        .get_columns()
        .iter()
        .map(|c| (c.name().as_str(), SchemaType::from_polars(c.dtype())))
        .collect();
    let result = validate_columns(&columns);
    if result.is_valid {
        Ok(())
    } else {
        Err(codec(format!("schema mismatch: {}", result.errors.join("; "))))
    }
}

fn int_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Int64Chunked, StorageError> {
    df.column(name)
        .and_then(|c| c.i64())
        .map_err(|e| codec(format!("column '{name}': {e}")))
}

fn float_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Float64Chunked, StorageError> {
    df.column(name)
        .and_then(|c| c.f64())
        .map_err(|e| codec(format!("column '{name}': {e}")))
}

fn frame_to_rows(df: &DataFrame) -> Result<Vec<OhlcvRow>, StorageError> {
    let timestamps = int_column(df, "timestamp")?;
    let opens = float_column(df, "open")?;
    let highs = float_column(df, "high")?;
    let lows = float_column(df, "low")?;
    let closes = float_column(df, "close")?;
    let volumes = int_column(df, "volume")?;

    let mut rows = Vec::with_capacity(df.height());
    let columns = timestamps
        .into_iter()
        .zip(opens)
        .zip(highs)
        .zip(lows)
        .zip(closes)
        .zip(volumes);

    for (i, (((((ts, open), high), low), close), volume)) in columns.enumerate() {
        match (ts, open, high, low, close, volume) {
            (Some(ts), Some(open), Some(high), Some(low), Some(close), Some(volume)) => {
                rows.push(OhlcvRow::new(ts, open, high, low, close, volume));
            }
            _ => return Err(codec(format!("null value at row {i}"))),
        }
    }
    Ok(rows)
}
