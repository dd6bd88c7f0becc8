//! Mapping between UTC second timestamps and exchange-local trading dates.

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, TimeZone, Utc};

/// Fixed UTC offset of the market's local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketClock {
    offset: FixedOffset,
}

impl MarketClock {
    /// Offsets outside ±24h fall back to UTC.
    pub fn new(utc_offset_minutes: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(0)
    }

    /// Local calendar date of a candle timestamp.
    pub fn trading_date(&self, timestamp: i64) -> NaiveDate {
        DateTime::<Utc>::from_timestamp(timestamp, 0)
            .unwrap_or_default()
            .with_timezone(&self.offset)
            .date_naive()
    }

    /// First second (UTC) of a local calendar date.
    pub fn day_start(&self, date: NaiveDate) -> i64 {
        let midnight = date.and_hms_opt(0, 0, 0).unwrap_or_default();
        match self.offset.from_local_datetime(&midnight).single() {
            Some(dt) => dt.timestamp(),
            None => midnight.and_utc().timestamp(),
        }
    }

    /// Last second (UTC) of a local calendar date.
    pub fn day_end(&self, date: NaiveDate) -> i64 {
        self.day_start(date) + 86_399
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn utc_midnight_maps_to_same_date_in_ist() {
        let ist = MarketClock::new(330);
        let ts = date(2024, 3, 1).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        assert_eq!(ist.trading_date(ts), date(2024, 3, 1));
    }

    #[test]
    fn ist_day_start_precedes_utc_midnight() {
        let ist = MarketClock::new(330);
        let utc_midnight = date(2024, 3, 1).and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
        assert_eq!(ist.day_start(date(2024, 3, 1)), utc_midnight - 330 * 60);
        assert_eq!(ist.trading_date(ist.day_start(date(2024, 3, 1))), date(2024, 3, 1));
    }

    #[test]
    fn day_end_is_inclusive() {
        let clock = MarketClock::utc();
        let d = date(2024, 1, 2);
        assert_eq!(clock.trading_date(clock.day_end(d)), d);
        assert_eq!(clock.trading_date(clock.day_end(d) + 1), date(2024, 1, 3));
    }
}
