//! Candlekeep Core: append-only OHLCV storage with corporate action handling.
//!
//! This crate contains:
//! - Domain types (rows, dataset keys, intervals, action types and ratios)
//! - Row contract and validator, plus opt-in sanitizing
//! - Parquet-backed store with per-key write locks and forward-only gaps
//! - Corporate action detector and the verification ledger
//! - Retroactive adjuster and consistency checks
//! - Incremental update workflow over a pluggable fetch source

pub mod actions;
pub mod adjust;
pub mod config;
pub mod domain;
pub mod schema;
pub mod storage;
pub mod sync;

pub use config::{ConfigError, StoreConfig};
pub use storage::{SaveMode, StorageError, Store};
