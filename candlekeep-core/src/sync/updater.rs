//! Incremental update workflow.
//!
//! missing ranges → fetch → detect on the new rows → record candidates →
//! pause while anything is pending, otherwise merge-save and auto-adjust.
//! Verified actions a previous run saved but never applied are picked up
//! even when there is nothing new to fetch.

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::source::{FetchError, FetchSource};
use crate::actions::{ActionLedger, CorporateAction, Detector, LedgerError};
use crate::adjust::{AdjustmentError, AdjustmentResult, DataAdjuster};
use crate::domain::{ActionStatus, DatasetKey, OhlcvRow, TimeRange};
use crate::schema::sanitize;
use crate::storage::{SaveMode, StorageError, Store};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Adjustment(#[from] AdjustmentError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// Stored data already reaches the requested end.
    UpToDate {
        key: DatasetKey,
        adjustments: Vec<AdjustmentResult>,
    },

    /// The source had nothing for the missing ranges.
    NoNewData {
        key: DatasetKey,
        ranges: Vec<TimeRange>,
        adjustments: Vec<AdjustmentResult>,
    },

    /// Suspected corporate actions await verification; nothing was written.
    PausedForVerification {
        key: DatasetKey,
        ranges: Vec<TimeRange>,
        fetched_rows: usize,
        pending: Vec<CorporateAction>,
    },

    Completed {
        key: DatasetKey,
        ranges: Vec<TimeRange>,
        new_rows: usize,
        total_rows: usize,
        adjustments: Vec<AdjustmentResult>,
    },
}

impl UpdateOutcome {
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::PausedForVerification { .. })
    }
}

/// Drives one dataset forward from a [`FetchSource`].
pub struct IncrementalUpdater<'a> {
    store: &'a Store,
    source: &'a dyn FetchSource,
    detector: Detector,
    sanitize: bool,
}

impl<'a> IncrementalUpdater<'a> {
    pub fn new(store: &'a Store, source: &'a dyn FetchSource) -> Self {
        let config = store.config();
        Self {
            store,
            source,
            detector: Detector::new(&config.detection, config.clock()),
            sanitize: false,
        }
    }

    /// Run fetched rows through [`sanitize`] before detection and saving.
    pub fn with_sanitize(mut self, enabled: bool) -> Self {
        self.sanitize = enabled;
        self
    }

    pub fn update(
        &self,
        key: &DatasetKey,
        from: i64,
        to: i64,
        ledger: &mut ActionLedger,
    ) -> Result<UpdateOutcome, SyncError> {
        let ranges = self.store.missing_ranges(key, from, to)?;
        if ranges.is_empty() {
            debug!(%key, "up to date");
            return Ok(UpdateOutcome::UpToDate {
                key: key.clone(),
                adjustments: self.catch_up(key, ledger)?,
            });
        }

        let fetched = self.fetch(key, &ranges)?;
        if fetched.is_empty() {
            info!(%key, source = self.source.name(), "no new rows upstream");
            return Ok(UpdateOutcome::NoNewData {
                key: key.clone(),
                ranges,
                adjustments: self.catch_up(key, ledger)?,
            });
        }

        let previous = self.last_stored_row(key)?;
        let candidates =
            self.detector
                .detect_after(previous.as_ref(), &fetched, &key.symbol, key.exchange);
        let records = ledger.record_all(&candidates)?;

        let pending: Vec<CorporateAction> = records
            .into_iter()
            .filter(|r| r.status == ActionStatus::Pending)
            .collect();
        if !pending.is_empty() {
            warn!(
                %key,
                pending = pending.len(),
                "update paused until corporate actions are verified or rejected"
            );
            return Ok(UpdateOutcome::PausedForVerification {
                key: key.clone(),
                ranges,
                fetched_rows: fetched.len(),
                pending,
            });
        }

        let total_rows = self.store.save(key, &fetched, SaveMode::Merge)?;
        let report = DataAdjuster::new(self.store).auto_adjust(key, ledger, false)?;

        info!(
            %key,
            new_rows = fetched.len(),
            total_rows,
            adjustments = report.results.len(),
            "incremental update complete"
        );
        Ok(UpdateOutcome::Completed {
            key: key.clone(),
            ranges,
            new_rows: fetched.len(),
            total_rows,
            adjustments: report.results,
        })
    }

    /// Apply verified actions not yet recorded against this interval.
    fn catch_up(
        &self,
        key: &DatasetKey,
        ledger: &mut ActionLedger,
    ) -> Result<Vec<AdjustmentResult>, SyncError> {
        let outstanding = ledger
            .verified_for(&key.symbol, key.exchange)
            .iter()
            .any(|a| !a.is_applied_to(key.interval));
        if !outstanding {
            return Ok(Vec::new());
        }
        let report = DataAdjuster::new(self.store).auto_adjust(key, ledger, false)?;
        if report.adjusted {
            info!(%key, adjustments = report.results.len(), "applied outstanding adjustments");
        }
        Ok(report.results)
    }

    /// Fetch each range, keeping only rows the range actually covers.
    fn fetch(&self, key: &DatasetKey, ranges: &[TimeRange]) -> Result<Vec<OhlcvRow>, SyncError> {
        let mut rows = Vec::new();
        for range in ranges {
            let batch = self.source.fetch(key, range.from, range.to)?;
            let received = batch.len();
            rows.extend(batch.into_iter().filter(|r| range.contains(r.timestamp)));
            debug!(
                %key,
                source = self.source.name(),
                from = range.from,
                to = range.to,
                received,
                "fetched range"
            );
        }

        if self.sanitize {
            let (clean, report) = sanitize(rows);
            if report.changed() {
                info!(%key, ?report, "sanitized fetched rows");
            }
            return Ok(clean);
        }
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    fn last_stored_row(&self, key: &DatasetKey) -> Result<Option<OhlcvRow>, SyncError> {
        let Some(range) = self.store.existing_range(key)? else {
            return Ok(None);
        };
        let rows = self.store.read(key, Some(range.to), Some(range.to))?;
        Ok(rows.and_then(|r| r.last().copied()))
    }
}
