//! Opt-in cleanup of fetched rows before they are validated.
//!
//! Never called implicitly by the store; callers that trust their source
//! skip it and let validation reject bad input instead.

use serde::Serialize;

use crate::domain::OhlcvRow;

/// What [`sanitize`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SanitizeReport {
    pub input_rows: usize,
    pub output_rows: usize,
    pub duplicates_dropped: usize,
    pub invalid_prices_dropped: usize,
    pub volumes_clamped: usize,
    pub reordered: bool,
}

impl SanitizeReport {
    pub fn changed(&self) -> bool {
        self.reordered
            || self.duplicates_dropped > 0
            || self.invalid_prices_dropped > 0
            || self.volumes_clamped > 0
    }
}

/// Sort by timestamp, keep the first row of each duplicate timestamp, drop
/// rows with non-finite or non-positive prices and clamp negative volume to 0.
pub fn sanitize(rows: Vec<OhlcvRow>) -> (Vec<OhlcvRow>, SanitizeReport) {
    let mut report = SanitizeReport {
        input_rows: rows.len(),
        ..SanitizeReport::default()
    };

    let mut rows = rows;
    report.reordered = rows.windows(2).any(|w| w[1].timestamp < w[0].timestamp);
    // Stable, so "first" means first in the input among equal timestamps.
    rows.sort_by_key(|r| r.timestamp);

    let before = rows.len();
    rows.dedup_by_key(|r| r.timestamp);
    report.duplicates_dropped = before - rows.len();

    let before = rows.len();
    rows.retain(|r| r.prices().iter().all(|(_, p)| p.is_finite() && *p > 0.0));
    report.invalid_prices_dropped = before - rows.len();

    for row in rows.iter_mut().filter(|r| r.volume < 0) {
        row.volume = 0;
        report.volumes_clamped += 1;
    }

    report.output_rows = rows.len();
    (rows, report)
}
