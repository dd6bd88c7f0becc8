//! Domain types: rows, dataset keys, corporate action vocabulary.

pub mod action;
pub mod calendar;
pub mod key;
pub mod row;

pub use action::{ActionStatus, ActionType, Confidence, Ratio, RatioError};
pub use calendar::MarketClock;
pub use key::{
    check_symbol, normalize_symbol, DatasetKey, Exchange, InstrumentClass, Interval, KeyError,
    TimeRange,
};
pub use row::OhlcvRow;
