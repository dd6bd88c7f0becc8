//! Pulling new rows from upstream into the store.

pub mod csv_source;
pub mod source;
pub mod updater;

pub use csv_source::CsvSource;
pub use source::{FetchError, FetchSource};
pub use updater::{IncrementalUpdater, SyncError, UpdateOutcome};
