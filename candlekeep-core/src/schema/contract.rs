//! Row file schema contract.
//!
//! Defines the exact column names and types of a stored row file. Checked
//! every time a row file is decoded, before any value is trusted.

use polars::prelude::DataType;
use serde::{Deserialize, Serialize};

/// Column types used by the row file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemaType {
    Int64,
    Float64,
    Other,
}

impl SchemaType {
    pub fn from_polars(dtype: &DataType) -> Self {
        match dtype {
            DataType::Int64 => SchemaType::Int64,
            DataType::Float64 => SchemaType::Float64,
            _ => SchemaType::Other,
        }
    }
}

/// A single field in the row file schema.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaField {
    pub name: &'static str,
    pub dtype: SchemaType,
}

/// Bumped whenever `ROW_SCHEMA` changes.
pub const SCHEMA_VERSION: u32 = 1;

/// The row file schema.
///
/// - Columns: timestamp, open, high, low, close, volume
/// - Sort order: strictly ascending by timestamp, no duplicates
/// - Timestamps: UTC seconds
pub const ROW_SCHEMA: &[SchemaField] = &[
    SchemaField {
        name: "timestamp",
        dtype: SchemaType::Int64,
    },
    SchemaField {
        name: "open",
        dtype: SchemaType::Float64,
    },
    SchemaField {
        name: "high",
        dtype: SchemaType::Float64,
    },
    SchemaField {
        name: "low",
        dtype: SchemaType::Float64,
    },
    SchemaField {
        name: "close",
        dtype: SchemaType::Float64,
    },
    SchemaField {
        name: "volume",
        dtype: SchemaType::Int64,
    },
];

/// Result of schema validation.
#[derive(Debug, Clone)]
pub struct SchemaValidation {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

/// Validate (column_name, column_type) pairs against [`ROW_SCHEMA`].
pub fn validate_columns(columns: &[(&str, SchemaType)]) -> SchemaValidation {
    let mut errors = Vec::new();

    for expected in ROW_SCHEMA {
        match columns.iter().find(|(name, _)| *name == expected.name) {
            Some((_, dtype)) if *dtype == expected.dtype => {}
            Some((_, dtype)) => {
                errors.push(format!(
                    "column '{}': expected {:?}, got {:?}",
                    expected.name, expected.dtype, dtype
                ));
            }
            None => {
                errors.push(format!("missing required column '{}'", expected.name));
            }
        }
    }

    for (name, _) in columns {
        if !ROW_SCHEMA.iter().any(|f| f.name == *name) {
            errors.push(format!("unexpected column '{}' (not in schema)", name));
        }
    }

    SchemaValidation {
        is_valid: errors.is_empty(),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_columns() -> Vec<(&'static str, SchemaType)> {
        vec![
            ("timestamp", SchemaType::Int64),
            ("open", SchemaType::Float64),
            ("high", SchemaType::Float64),
            ("low", SchemaType::Float64),
            ("close", SchemaType::Float64),
            ("volume", SchemaType::Int64),
        ]
    }

    #[test]
    fn valid_schema_passes() {
        let result = validate_columns(&full_columns());
        assert!(result.is_valid, "errors: {:?}", result.errors);
    }

    #[test]
    fn missing_column_fails() {
        let columns: Vec<_> = full_columns().into_iter().take(4).collect();
        let result = validate_columns(&columns);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("close")));
        assert!(result.errors.iter().any(|e| e.contains("volume")));
    }

    #[test]
    fn wrong_type_fails() {
        let mut columns = full_columns();
        columns[5] = ("volume", SchemaType::Float64);
        let result = validate_columns(&columns);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("volume")));
    }

    #[test]
    fn extra_column_flagged() {
        let mut columns = full_columns();
        columns.push(("oi", SchemaType::Int64));
        let result = validate_columns(&columns);
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("oi")));
    }

    #[test]
    fn polars_types_map() {
        assert_eq!(SchemaType::from_polars(&DataType::Int64), SchemaType::Int64);
        assert_eq!(SchemaType::from_polars(&DataType::Float64), SchemaType::Float64);
        assert_eq!(SchemaType::from_polars(&DataType::String), SchemaType::Other);
    }
}
