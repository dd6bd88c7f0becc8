//! OhlcvRow: one candle for one dataset key.

use serde::{Deserialize, Serialize};

/// OHLCV candle. `timestamp` is the candle open time in UTC seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvRow {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl OhlcvRow {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// The four price fields in (name, value) form, for per-field checks.
    pub fn prices(&self) -> [(&'static str, f64); 4] {
        [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ]
    }

    /// Returns true if any price field is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        self.prices().iter().any(|(_, p)| !p.is_finite())
    }

    /// `low <= open <= high` and `low <= close <= high`.
    pub fn is_ordered(&self) -> bool {
        if self.has_non_finite() {
            return false;
        }
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }

    /// Copy with prices divided and volume multiplied by `multiplier`.
    ///
    /// Volume is rounded to the nearest whole unit.
    pub fn rescaled(&self, multiplier: f64) -> Self {
        Self {
            timestamp: self.timestamp,
            open: self.open / multiplier,
            high: self.high / multiplier,
            low: self.low / multiplier,
            close: self.close / multiplier,
            volume: (self.volume as f64 * multiplier).round() as i64,
        }
    }
}
