//! Time-series storage engine.

pub mod engine;
pub mod error;
pub mod layout;
pub mod locks;
pub mod maintenance;
pub mod meta;
pub mod parquet;

pub use engine::{SaveMode, Store, Transaction};
pub use error::StorageError;
pub use layout::Layout;
pub use maintenance::{DatasetInfo, ExchangeStats, StoreStats, VacuumReport};
pub use meta::DatasetMeta;
