//! Retroactive corporate action adjustment.
//!
//! The adjuster keeps no state of its own: rows are read from and written
//! back to the [`Store`], decisions come from the [`ActionLedger`].

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::actions::{ActionLedger, CorporateActionCandidate, Detector, LedgerError};
use crate::domain::{
    ActionStatus, ActionType, Confidence, DatasetKey, MarketClock, OhlcvRow, Ratio, TimeRange,
};
use crate::storage::{SaveMode, StorageError, Store, Transaction};

/// Pre-action rows echoed back in an [`AdjustmentResult`].
const SAMPLE_ROWS: usize = 3;

#[derive(Debug, Error)]
pub enum AdjustmentError {
    #[error("cannot adjust for action type '{0}'")]
    UnsupportedActionType(ActionType),

    #[error("invalid ratio: {0}")]
    InvalidRatio(String),

    #[error("no stored data for {0}")]
    NoData(DatasetKey),

    #[error("action on {date} is already applied to {key}")]
    AlreadyApplied { key: DatasetKey, date: NaiveDate },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// One row before and after rescaling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentSample {
    pub timestamp: i64,
    pub close_before: f64,
    pub close_after: f64,
    pub volume_before: i64,
    pub volume_after: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdjustmentResult {
    pub key: DatasetKey,
    pub action_date: NaiveDate,
    pub action_type: ActionType,
    pub ratio: Ratio,
    pub multiplier: f64,
    pub rows_adjusted: usize,
    pub total_rows: usize,
    pub dry_run: bool,
    /// The last few rows before the action date.
    pub samples: Vec<AdjustmentSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// The close still jumps across the action date.
    Discontinuity,
    /// No row on the action date; earlier rows were likely never rescaled.
    ActionDateMissing,
}

/// A verified action the stored data does not yet reflect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAdjustment {
    pub date: NaiveDate,
    pub action_type: ActionType,
    pub ratio: Ratio,
    pub confidence: Confidence,
    pub reason: AdjustmentReason,
    /// Close-to-close change at the action date, in percent.
    pub detected_change_pct: Option<f64>,
}

/// A verified action whose change cannot be measured, e.g. a previous
/// close of zero on a derivative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UncheckedAction {
    pub date: NaiveDate,
    pub prev_close: f64,
    pub close: f64,
}

struct Assessment {
    to_apply: Vec<PendingAdjustment>,
    unchecked: Vec<UncheckedAction>,
    verified: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub key: DatasetKey,
    pub has_data: bool,
    pub needs_adjustment: bool,
    /// Oldest first.
    pub actions_to_apply: Vec<PendingAdjustment>,
    /// Left alone; logged as warnings.
    pub unchecked_actions: Vec<UncheckedAction>,
    pub total_verified_actions: usize,
    pub date_range: Option<TimeRange>,
    pub total_rows: usize,
    /// Drops in the stored data the ledger has not verified or rejected.
    pub unverified_candidates: Vec<CorporateActionCandidate>,
}

impl ConsistencyReport {
    fn empty(key: &DatasetKey) -> Self {
        Self {
            key: key.clone(),
            has_data: false,
            needs_adjustment: false,
            actions_to_apply: Vec::new(),
            unchecked_actions: Vec::new(),
            total_verified_actions: 0,
            date_range: None,
            total_rows: 0,
            unverified_candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutoAdjustReport {
    pub key: DatasetKey,
    pub dry_run: bool,
    pub adjusted: bool,
    pub results: Vec<AdjustmentResult>,
}

/// Rescale factor for an action: historical prices are divided by it and
/// volumes multiplied.
///
/// Bonus `N:D` (N new shares per D held) gives `(N + D) / D`; split `N:D`
/// gives `D / N`.
pub fn multiplier(action_type: ActionType, ratio: &Ratio) -> Result<f64, AdjustmentError> {
    if ratio.numerator == 0 || ratio.denominator == 0 {
        return Err(AdjustmentError::InvalidRatio(ratio.to_string()));
    }
    let n = f64::from(ratio.numerator);
    let d = f64::from(ratio.denominator);
    match action_type {
        ActionType::Bonus => Ok((n + d) / d),
        ActionType::Split => Ok(d / n),
        ActionType::Unknown => Err(AdjustmentError::UnsupportedActionType(action_type)),
    }
}

pub struct DataAdjuster<'a> {
    store: &'a Store,
    detector: Detector,
    clock: MarketClock,
    discontinuity_threshold: f64,
}

impl<'a> DataAdjuster<'a> {
    /// Adjuster using the store's detection, adjustment and market settings.
    pub fn new(store: &'a Store) -> Self {
        let config = store.config();
        let clock = config.clock();
        Self {
            store,
            detector: Detector::new(&config.detection, clock),
            clock,
            discontinuity_threshold: config.adjustment.discontinuity_threshold,
        }
    }

    /// Rescale every row of `key` strictly before `action_date`.
    ///
    /// With `dry_run` the same rows are read and the same values computed,
    /// but nothing is written. The ledger is not consulted; see
    /// [`DataAdjuster::apply_recorded`] for the operator path.
    pub fn apply(
        &self,
        key: &DatasetKey,
        action_date: NaiveDate,
        action_type: ActionType,
        ratio: Ratio,
        dry_run: bool,
    ) -> Result<AdjustmentResult, AdjustmentError> {
        multiplier(action_type, &ratio)?;
        self.store.transaction(key, |tx| -> Result<AdjustmentResult, AdjustmentError> {
            let rows = tx
                .read(None, None)?
                .ok_or_else(|| AdjustmentError::NoData(key.clone()))?;
            let (_, result) =
                self.rescale_locked(tx, rows, action_date, action_type, ratio, dry_run)?;
            Ok(result)
        })
    }

    /// [`DataAdjuster::apply`] for one ledger action, recorded as applied to
    /// this interval in the same locked step.
    ///
    /// Refused if the ledger already has the action applied to `key`.
    pub fn apply_recorded(
        &self,
        key: &DatasetKey,
        ledger: &mut ActionLedger,
        action_date: NaiveDate,
        action_type: ActionType,
        ratio: Ratio,
        dry_run: bool,
    ) -> Result<AdjustmentResult, AdjustmentError> {
        multiplier(action_type, &ratio)?;
        self.store.transaction(key, |tx| -> Result<AdjustmentResult, AdjustmentError> {
            ledger.refresh()?;
            let record = ledger.get(&key.symbol, action_date);
            if record.is_some_and(|a| a.is_applied_to(key.interval)) {
                return Err(AdjustmentError::AlreadyApplied {
                    key: key.clone(),
                    date: action_date,
                });
            }
            let recorded = record.is_some();

            let rows = tx
                .read(None, None)?
                .ok_or_else(|| AdjustmentError::NoData(key.clone()))?;
            let (_, result) =
                self.rescale_locked(tx, rows, action_date, action_type, ratio, dry_run)?;

            if !dry_run && result.rows_adjusted > 0 {
                if recorded {
                    ledger.mark_applied(
                        &key.symbol,
                        action_date,
                        key.interval,
                        result.multiplier,
                        result.rows_adjusted,
                    )?;
                } else {
                    warn!(%key, %action_date, "applied an action the ledger has no record of");
                }
            }
            Ok(result)
        })
    }

    /// Rescale `rows` for one action and, unless `dry_run`, write them back
    /// through `tx`. Returns the rows now stored alongside the result.
    fn rescale_locked(
        &self,
        tx: &Transaction<'_>,
        rows: Vec<OhlcvRow>,
        action_date: NaiveDate,
        action_type: ActionType,
        ratio: Ratio,
        dry_run: bool,
    ) -> Result<(Vec<OhlcvRow>, AdjustmentResult), AdjustmentError> {
        let key = tx.key();
        let multiplier = multiplier(action_type, &ratio)?;
        let cutoff = self.clock.day_start(action_date);

        let split_at = rows.partition_point(|r| r.timestamp < cutoff);
        let mut adjusted = rows.clone();
        for row in &mut adjusted[..split_at] {
            *row = row.rescaled(multiplier);
        }

        let samples = (split_at.saturating_sub(SAMPLE_ROWS)..split_at)
            .map(|i| sample(&rows[i], &adjusted[i]))
            .collect();

        info!(
            %key,
            %action_date,
            %action_type,
            %ratio,
            multiplier,
            rows = split_at,
            dry_run,
            "corporate action adjustment"
        );

        let result = AdjustmentResult {
            key: key.clone(),
            action_date,
            action_type,
            ratio,
            multiplier,
            rows_adjusted: split_at,
            total_rows: rows.len(),
            dry_run,
            samples,
        };

        if split_at > 0 && !dry_run {
            tx.save(&adjusted, SaveMode::Overwrite)?;
            Ok((adjusted, result))
        } else {
            Ok((rows, result))
        }
    }

    /// Compare stored data against every verified action for its symbol.
    pub fn check_consistency(
        &self,
        key: &DatasetKey,
        ledger: &ActionLedger,
    ) -> Result<ConsistencyReport, AdjustmentError> {
        let Some(rows) = self.store.read(key, None, None)? else {
            return Ok(ConsistencyReport::empty(key));
        };
        if rows.is_empty() {
            return Ok(ConsistencyReport::empty(key));
        }

        let assessment = self.assess(key, &rows, ledger);

        let unverified_candidates: Vec<CorporateActionCandidate> = self
            .detector
            .detect(&rows, &key.symbol, key.exchange)
            .into_iter()
            .filter(|c| {
                ledger
                    .get(&c.symbol, c.date)
                    .map_or(true, |a| a.status == ActionStatus::Pending)
            })
            .collect();
        for c in &unverified_candidates {
            warn!(
                %key,
                date = %c.date,
                suspected_type = %c.suspected_type,
                "unverified corporate action in stored data"
            );
        }

        let (first, last) = (rows[0].timestamp, rows[rows.len() - 1].timestamp);
        Ok(ConsistencyReport {
            key: key.clone(),
            has_data: true,
            needs_adjustment: !assessment.to_apply.is_empty(),
            actions_to_apply: assessment.to_apply,
            unchecked_actions: assessment.unchecked,
            total_verified_actions: assessment.verified,
            date_range: Some(TimeRange::new(first, last)),
            total_rows: rows.len(),
            unverified_candidates,
        })
    }

    /// Verified actions for `key` that `rows` do not yet reflect.
    fn assess(&self, key: &DatasetKey, rows: &[OhlcvRow], ledger: &ActionLedger) -> Assessment {
        let verified = ledger.verified_for(&key.symbol, key.exchange);
        let mut to_apply = Vec::new();
        let mut unchecked = Vec::new();

        for action in &verified {
            let Some((action_type, ratio)) = action.applicable() else {
                continue;
            };
            let start = self.clock.day_start(action.date);
            let end = self.clock.day_end(action.date);

            let idx = rows.partition_point(|r| r.timestamp < start);
            if idx == 0 {
                // Nothing stored before the action.
                continue;
            }

            let pending = |confidence, reason, detected_change_pct| PendingAdjustment {
                date: action.date,
                action_type,
                ratio,
                confidence,
                reason,
                detected_change_pct,
            };

            match rows.get(idx) {
                Some(row) if row.timestamp <= end => {
                    let prev = rows[idx - 1].close;
                    let change = (row.close - prev) / prev;
                    if prev <= 0.0 || !change.is_finite() {
                        warn!(
                            %key,
                            date = %action.date,
                            prev_close = prev,
                            close = row.close,
                            "cannot measure the change across a verified action"
                        );
                        unchecked.push(UncheckedAction {
                            date: action.date,
                            prev_close: prev,
                            close: row.close,
                        });
                    } else if change.abs() >= self.discontinuity_threshold {
                        to_apply.push(pending(
                            Confidence::High,
                            AdjustmentReason::Discontinuity,
                            Some(change * 100.0),
                        ));
                    } else {
                        debug!(%key, date = %action.date, "already adjusted");
                    }
                }
                _ if action.is_applied_to(key.interval) => {
                    debug!(%key, date = %action.date, "action date absent but already applied");
                }
                _ => to_apply.push(pending(
                    Confidence::Medium,
                    AdjustmentReason::ActionDateMissing,
                    None,
                )),
            }
        }

        Assessment {
            to_apply,
            unchecked,
            verified: verified.len(),
        }
    }

    /// Consistency reports for many keys, checked in parallel.
    pub fn check_all(
        &self,
        keys: &[DatasetKey],
        ledger: &ActionLedger,
    ) -> Vec<(DatasetKey, Result<ConsistencyReport, AdjustmentError>)> {
        keys.par_iter()
            .map(|key| (key.clone(), self.check_consistency(key, ledger)))
            .collect()
    }

    /// Apply every verified action the stored data does not reflect,
    /// oldest first, and record each committed one in the ledger.
    ///
    /// The check and the rescale run under the key's write lock, against
    /// the ledger as last persisted.
    pub fn auto_adjust(
        &self,
        key: &DatasetKey,
        ledger: &mut ActionLedger,
        dry_run: bool,
    ) -> Result<AutoAdjustReport, AdjustmentError> {
        let results = self.store.transaction(
            key,
            |tx| -> Result<Vec<AdjustmentResult>, AdjustmentError> {
                ledger.refresh()?;
                let Some(mut rows) = tx.read(None, None)? else {
                    return Ok(Vec::new());
                };

                let todo = self.assess(key, &rows, ledger).to_apply;
                let mut results = Vec::with_capacity(todo.len());
                for item in todo {
                    let (next, result) = self.rescale_locked(
                        tx,
                        rows,
                        item.date,
                        item.action_type,
                        item.ratio,
                        dry_run,
                    )?;
                    if !dry_run && result.rows_adjusted > 0 {
                        ledger.mark_applied(
                            &key.symbol,
                            item.date,
                            key.interval,
                            result.multiplier,
                            result.rows_adjusted,
                        )?;
                    }
                    rows = next;
                    results.push(result);
                }
                Ok(results)
            },
        )?;

        if results.is_empty() {
            debug!(%key, "no adjustments needed");
        }
        Ok(AutoAdjustReport {
            key: key.clone(),
            dry_run,
            adjusted: !results.is_empty(),
            results,
        })
    }
}

fn sample(before: &OhlcvRow, after: &OhlcvRow) -> AdjustmentSample {
    AdjustmentSample {
        timestamp: before.timestamp,
        close_before: before.close,
        close_after: after.close,
        volume_before: before.volume,
        volume_after: after.volume,
    }
}
