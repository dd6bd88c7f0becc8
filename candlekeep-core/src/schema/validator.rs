//! Row and dataset invariant checks.
//!
//! Findings are split into errors (corrupt data, blocks persistence) and
//! warnings (suspicious but storable). Large close-to-close moves are only
//! ever warnings: a split or bonus produces exactly that shape and must be
//! stored so the detector can see it.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::config::ValidationConfig;
use crate::domain::{DatasetKey, InstrumentClass, Interval, OhlcvRow};

/// Upper bound on issues listed per severity; the rest are only counted.
const MAX_LISTED_ISSUES: usize = 100;

/// What the rows are being validated as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationContext {
    pub class: InstrumentClass,
    /// Enables interval-aware gap warnings.
    pub interval: Option<Interval>,
}

impl ValidationContext {
    pub fn new(class: InstrumentClass, interval: Option<Interval>) -> Self {
        Self { class, interval }
    }
}

impl From<&DatasetKey> for ValidationContext {
    fn from(key: &DatasetKey) -> Self {
        Self {
            class: key.exchange.instrument_class(),
            interval: Some(key.interval),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    /// Index into the validated slice, if the issue concerns one row.
    pub row: Option<usize>,
    pub timestamp: Option<i64>,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IssueKind {
    EmptyDataset,
    NonFinitePrice { field: &'static str },
    OhlcOrder { open: f64, high: f64, low: f64, close: f64 },
    PriceOutOfRange { field: &'static str, value: f64, min: f64, max: f64 },
    VolumeOutOfRange { volume: i64, max: i64 },
    TimestampOutOfRange,
    NotAscending { previous: i64 },
    DuplicateTimestamp,
    PriceJump { change_pct: f64 },
    ZeroVolume,
    VolumeSpike { ratio: f64 },
    Gap { seconds: i64 },
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::PriceJump { .. }
            | IssueKind::ZeroVolume
            | IssueKind::VolumeSpike { .. }
            | IssueKind::Gap { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(row) = self.row {
            write!(f, "row {row}")?;
            if let Some(ts) = self.timestamp {
                write!(f, " (ts {ts})")?;
            }
            write!(f, ": ")?;
        }
        match &self.kind {
            IssueKind::EmptyDataset => write!(f, "empty dataset"),
            IssueKind::NonFinitePrice { field } => write!(f, "{field} is not finite"),
            IssueKind::OhlcOrder { open, high, low, close } => {
                write!(f, "OHLC ordering violated O={open} H={high} L={low} C={close}")
            }
            IssueKind::PriceOutOfRange { field, value, min, max } => {
                write!(f, "{field}={value} outside [{min}, {max}]")
            }
            IssueKind::VolumeOutOfRange { volume, max } => {
                write!(f, "volume {volume} outside [0, {max}]")
            }
            IssueKind::TimestampOutOfRange => write!(f, "timestamp out of range"),
            IssueKind::NotAscending { previous } => {
                write!(f, "timestamp not after previous {previous}")
            }
            IssueKind::DuplicateTimestamp => write!(f, "duplicate timestamp"),
            IssueKind::PriceJump { change_pct } => {
                write!(f, "close moved {change_pct:.1}% in one candle")
            }
            IssueKind::ZeroVolume => write!(f, "zero volume"),
            IssueKind::VolumeSpike { ratio } => write!(f, "volume {ratio:.1}x median"),
            IssueKind::Gap { seconds } => write!(f, "{seconds}s gap before this row"),
        }
    }
}

/// Dataset statistics collected during validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationStats {
    pub rows: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
    pub duplicate_timestamps: usize,
    pub invalid_ohlc_rows: usize,
    pub gaps: usize,
    pub error_count: usize,
    pub warning_count: usize,
}

/// Structured outcome of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
    pub stats: ValidationStats,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.stats.error_count > 0
    }

    pub fn has_warnings(&self) -> bool {
        self.stats.warning_count > 0
    }

    fn push(&mut self, row: Option<usize>, timestamp: Option<i64>, kind: IssueKind) {
        let issue = Issue { row, timestamp, kind };
        match issue.kind.severity() {
            Severity::Error => {
                self.stats.error_count += 1;
                if self.errors.len() < MAX_LISTED_ISSUES {
                    self.errors.push(issue);
                }
            }
            Severity::Warning => {
                self.stats.warning_count += 1;
                if self.warnings.len() < MAX_LISTED_ISSUES {
                    self.warnings.push(issue);
                }
            }
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} errors, {} warnings over {} rows",
            self.stats.error_count, self.stats.warning_count, self.stats.rows
        )?;
        if let Some(first) = self.errors.first() {
            write!(f, "; first error: {first}")?;
        } else if let Some(first) = self.warnings.first() {
            write!(f, "; first warning: {first}")?;
        }
        Ok(())
    }
}

/// Rows failed validation; the report says why.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("validation failed: {report}")]
pub struct ValidationError {
    pub report: ValidationReport,
}

/// Stateless invariant checker configured with explicit bounds.
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate rows, failing on any error (or any warning in strict mode).
    ///
    /// On success the report is returned so warnings can still be surfaced.
    pub fn validate(
        &self,
        rows: &[OhlcvRow],
        ctx: ValidationContext,
    ) -> Result<ValidationReport, ValidationError> {
        let report = self.check(rows, ctx);
        if report.has_errors() || (self.config.strict && report.has_warnings()) {
            return Err(ValidationError { report });
        }
        Ok(report)
    }

    /// Run every check and return the full report without judging it.
    pub fn check(&self, rows: &[OhlcvRow], ctx: ValidationContext) -> ValidationReport {
        let mut report = ValidationReport::default();
        report.stats.rows = rows.len();

        if rows.is_empty() {
            report.push(None, None, IssueKind::EmptyDataset);
            return report;
        }
        report.stats.first_timestamp = rows.first().map(|r| r.timestamp);
        report.stats.last_timestamp = rows.last().map(|r| r.timestamp);

        for (i, row) in rows.iter().enumerate() {
            self.check_row(i, row, ctx.class, &mut report);
        }
        self.check_ordering(rows, &mut report);
        self.check_price_jumps(rows, &mut report);
        self.check_volume_spikes(rows, &mut report);
        if let Some(interval) = ctx.interval {
            check_gaps(rows, interval, &mut report);
        }

        report
    }

    fn check_row(
        &self,
        i: usize,
        row: &OhlcvRow,
        class: InstrumentClass,
        report: &mut ValidationReport,
    ) {
        let ts = Some(row.timestamp);
        let cfg = &self.config;

        if row.timestamp < cfg.min_timestamp || row.timestamp > cfg.max_timestamp {
            report.push(Some(i), ts, IssueKind::TimestampOutOfRange);
        }

        let mut finite = true;
        let (min, max) = cfg.price_bounds(class);
        for (field, value) in row.prices() {
            if !value.is_finite() {
                report.push(Some(i), ts, IssueKind::NonFinitePrice { field });
                finite = false;
                continue;
            }
            let below = match class {
                // Equity prices are strictly positive even if min_price is set to zero.
                InstrumentClass::Equity => value <= 0.0 || value < min,
                InstrumentClass::Derivative => value < min,
            };
            if below || value > max {
                report.push(
                    Some(i),
                    ts,
                    IssueKind::PriceOutOfRange { field, value, min, max },
                );
            }
        }

        if finite && !row.is_ordered() {
            report.stats.invalid_ohlc_rows += 1;
            report.push(
                Some(i),
                ts,
                IssueKind::OhlcOrder {
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                },
            );
        }

        if row.volume < 0 || row.volume > cfg.max_volume {
            report.push(
                Some(i),
                ts,
                IssueKind::VolumeOutOfRange {
                    volume: row.volume,
                    max: cfg.max_volume,
                },
            );
        } else if row.volume == 0 {
            report.push(Some(i), ts, IssueKind::ZeroVolume);
        }
    }

    fn check_ordering(&self, rows: &[OhlcvRow], report: &mut ValidationReport) {
        for (i, pair) in rows.windows(2).enumerate() {
            let (prev, curr) = (pair[0].timestamp, pair[1].timestamp);
            if curr == prev {
                report.stats.duplicate_timestamps += 1;
                report.push(Some(i + 1), Some(curr), IssueKind::DuplicateTimestamp);
            } else if curr < prev {
                report.push(
                    Some(i + 1),
                    Some(curr),
                    IssueKind::NotAscending { previous: prev },
                );
            }
        }
    }

    fn check_price_jumps(&self, rows: &[OhlcvRow], report: &mut ValidationReport) {
        for (i, pair) in rows.windows(2).enumerate() {
            let (prev, curr) = (pair[0].close, pair[1].close);
            if !(prev.is_finite() && curr.is_finite()) || prev <= 0.0 {
                continue;
            }
            let change = (curr - prev) / prev;
            if change.abs() > self.config.price_jump_warning {
                report.push(
                    Some(i + 1),
                    Some(pair[1].timestamp),
                    IssueKind::PriceJump {
                        change_pct: change * 100.0,
                    },
                );
            }
        }
    }

    fn check_volume_spikes(&self, rows: &[OhlcvRow], report: &mut ValidationReport) {
        let mut volumes: Vec<i64> = rows.iter().map(|r| r.volume).collect();
        volumes.sort_unstable();
        let median = volumes[volumes.len() / 2];
        if median <= 0 {
            return;
        }
        for (i, row) in rows.iter().enumerate() {
            let ratio = row.volume as f64 / median as f64;
            if ratio >= self.config.volume_spike_ratio {
                report.push(
                    Some(i),
                    Some(row.timestamp),
                    IssueKind::VolumeSpike { ratio },
                );
            }
        }
    }
}

/// Longest gap between consecutive candles that is still considered normal.
fn max_normal_gap(interval: Interval) -> Option<i64> {
    match interval {
        // Weekends plus a holiday or two.
        Interval::Day => Some(5 * 86_400),
        // Overnight breaks.
        Interval::Minute15 | Interval::Minute60 => Some(18 * 3_600),
        _ => None,
    }
}

fn check_gaps(rows: &[OhlcvRow], interval: Interval, report: &mut ValidationReport) {
    let Some(tolerance) = max_normal_gap(interval) else {
        return;
    };
    for (i, pair) in rows.windows(2).enumerate() {
        let gap = pair[1].timestamp - pair[0].timestamp;
        if gap > tolerance {
            report.stats.gaps += 1;
            report.push(
                Some(i + 1),
                Some(pair[1].timestamp),
                IssueKind::Gap { seconds: gap },
            );
        }
    }
}
