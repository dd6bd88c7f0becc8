//! Durable corporate action ledger.
//!
//! One record per (symbol, trading date), persisted as a pretty-printed JSON
//! array so the file stays human-auditable. The whole collection is loaded on
//! open and rewritten atomically (`.tmp` then rename) after every mutation.
//! Records are never deleted.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::detector::CorporateActionCandidate;
use crate::domain::{
    normalize_symbol, ActionStatus, ActionType, Confidence, Exchange, Interval, Ratio,
};

/// A ledger record: detection evidence plus verification state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub symbol: String,
    pub exchange: Exchange,
    pub date: NaiveDate,
    /// Timestamp of the row the drop was observed on.
    pub timestamp: i64,
    pub price_change_pct: f64,
    pub prev_close: f64,
    pub curr_close: f64,
    pub suspected_type: ActionType,
    pub suspected_ratio: Option<Ratio>,
    pub confidence: Confidence,
    pub status: ActionStatus,
    pub actual_type: Option<ActionType>,
    pub actual_ratio: Option<Ratio>,
    pub notes: Option<String>,
    pub rejection_reason: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    /// Datasets this action has been written into.
    #[serde(default)]
    pub applied: Vec<AppliedAdjustment>,
}

/// One committed rescale of a dataset for this action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedAdjustment {
    pub interval: Interval,
    pub multiplier: f64,
    pub rows_adjusted: usize,
    pub applied_at: DateTime<Utc>,
}

impl CorporateAction {
    fn from_candidate(candidate: &CorporateActionCandidate, now: DateTime<Utc>) -> Self {
        Self {
            symbol: normalize_symbol(&candidate.symbol),
            exchange: candidate.exchange,
            date: candidate.date,
            timestamp: candidate.timestamp,
            price_change_pct: candidate.price_change_pct,
            prev_close: candidate.prev_close,
            curr_close: candidate.curr_close,
            suspected_type: candidate.suspected_type,
            suspected_ratio: candidate.suspected_ratio,
            confidence: candidate.confidence,
            status: ActionStatus::Pending,
            actual_type: None,
            actual_ratio: None,
            notes: None,
            rejection_reason: None,
            detected_at: now,
            updated_at: now,
            verified_at: None,
            rejected_at: None,
            applied: Vec::new(),
        }
    }

    /// The verified type and ratio, if this record may be applied.
    pub fn applicable(&self) -> Option<(ActionType, Ratio)> {
        match (self.status, self.actual_type, self.actual_ratio) {
            (ActionStatus::Verified, Some(kind), Some(ratio)) => Some((kind, ratio)),
            _ => None,
        }
    }

    pub fn is_applied_to(&self, interval: Interval) -> bool {
        self.applied.iter().any(|a| a.interval == interval)
    }
}

/// Query over ledger records; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ActionFilter {
    pub symbol: Option<String>,
    pub exchange: Option<Exchange>,
    pub status: Option<ActionStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl ActionFilter {
    pub fn symbol(symbol: &str) -> Self {
        Self {
            symbol: Some(normalize_symbol(symbol)),
            ..Self::default()
        }
    }

    pub fn status(status: ActionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
            ..Self::default()
        }
    }

    fn matches(&self, action: &CorporateAction) -> bool {
        self.symbol.as_ref().map_or(true, |s| *s == action.symbol)
            && self.exchange.map_or(true, |e| e == action.exchange)
            && self.status.map_or(true, |s| s == action.status)
            && self.from.map_or(true, |d| action.date >= d)
            && self.to.map_or(true, |d| action.date <= d)
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no corporate action recorded for {symbol} on {date}")]
    NotFound { symbol: String, date: NaiveDate },

    #[error("cannot move {symbol} {date} from {from} to {to}")]
    InvalidTransition {
        symbol: String,
        date: NaiveDate,
        from: ActionStatus,
        to: ActionStatus,
    },

    #[error("'{0}' is not an applicable action type")]
    UnsupportedActionType(ActionType),

    #[error(
        "{symbol} {date} is already applied as {applied_as}; restore the affected datasets before changing it"
    )]
    AlreadyApplied {
        symbol: String,
        date: NaiveDate,
        applied_as: String,
    },

    #[error("ledger I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed ledger file: {0}")]
    Serde(#[from] serde_json::Error),
}

type RecordKey = (String, NaiveDate);

/// The ledger file and its in-memory copy.
#[derive(Debug)]
pub struct ActionLedger {
    path: PathBuf,
    records: BTreeMap<RecordKey, CorporateAction>,
}

impl ActionLedger {
    /// Load the ledger at `path`; a missing file is an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let records = load_records(&path)?;
        Ok(Self { path, records })
    }

    /// Reload from disk, picking up what other handles on the same file
    /// have persisted since this one was opened.
    pub fn refresh(&mut self) -> Result<(), LedgerError> {
        self.records = load_records(&self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a detection, or refresh the evidence of an existing record.
    ///
    /// An existing record keeps its status and verification fields, so
    /// re-running detection never undoes an operator decision.
    pub fn record(
        &mut self,
        candidate: &CorporateActionCandidate,
    ) -> Result<CorporateAction, LedgerError> {
        let now = Utc::now();
        let fresh = CorporateAction::from_candidate(candidate, now);
        let key = (fresh.symbol.clone(), fresh.date);

        let record = match self.records.get(&key) {
            Some(existing) => CorporateAction {
                status: existing.status,
                actual_type: existing.actual_type,
                actual_ratio: existing.actual_ratio,
                notes: existing.notes.clone(),
                rejection_reason: existing.rejection_reason.clone(),
                detected_at: existing.detected_at,
                verified_at: existing.verified_at,
                rejected_at: existing.rejected_at,
                applied: existing.applied.clone(),
                ..fresh
            },
            None => {
                info!(
                    symbol = %fresh.symbol,
                    date = %fresh.date,
                    suspected_type = %fresh.suspected_type,
                    "recorded corporate action candidate"
                );
                fresh
            }
        };

        self.store(record)
    }

    /// Record every candidate, returning the stored records.
    pub fn record_all(
        &mut self,
        candidates: &[CorporateActionCandidate],
    ) -> Result<Vec<CorporateAction>, LedgerError> {
        candidates.iter().map(|c| self.record(c)).collect()
    }

    /// Mark a record verified with the operator-confirmed type and ratio.
    ///
    /// Re-verifying is allowed to correct an earlier decision, as is
    /// verifying a rejected record (logged). Once the action has been
    /// applied to any dataset its type and ratio are fixed.
    pub fn verify(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        actual_type: ActionType,
        actual_ratio: Ratio,
        notes: Option<String>,
    ) -> Result<CorporateAction, LedgerError> {
        if actual_type == ActionType::Unknown {
            return Err(LedgerError::UnsupportedActionType(actual_type));
        }
        let mut record = self.lookup(symbol, date)?.clone();

        let changed = record.actual_type != Some(actual_type)
            || record.actual_ratio != Some(actual_ratio);
        if changed && !record.applied.is_empty() {
            let applied_as = match (record.actual_type, record.actual_ratio) {
                (Some(kind), Some(ratio)) => format!("{kind} {ratio}"),
                _ => "unknown".to_string(),
            };
            return Err(LedgerError::AlreadyApplied {
                symbol: record.symbol,
                date,
                applied_as,
            });
        }

        match record.status {
            ActionStatus::Rejected => warn!(
                symbol = %record.symbol,
                %date,
                "verifying a previously rejected corporate action"
            ),
            ActionStatus::Verified => info!(
                symbol = %record.symbol,
                %date,
                "re-verifying corporate action"
            ),
            ActionStatus::Pending => {}
        }

        let now = Utc::now();
        record.status = ActionStatus::Verified;
        record.actual_type = Some(actual_type);
        record.actual_ratio = Some(actual_ratio);
        if notes.is_some() {
            record.notes = notes;
        }
        record.verified_at = Some(now);
        record.updated_at = now;
        info!(
            symbol = %record.symbol,
            %date,
            action_type = %actual_type,
            ratio = %actual_ratio,
            "corporate action verified"
        );

        self.store(record)
    }

    /// Reject a pending record. Rejecting a rejected record only updates
    /// the reason; rejecting a verified one is refused.
    pub fn reject(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        reason: &str,
    ) -> Result<CorporateAction, LedgerError> {
        let mut record = self.lookup(symbol, date)?.clone();

        match record.status {
            ActionStatus::Verified => {
                return Err(LedgerError::InvalidTransition {
                    symbol: record.symbol,
                    date,
                    from: ActionStatus::Verified,
                    to: ActionStatus::Rejected,
                });
            }
            ActionStatus::Rejected => warn!(
                symbol = %record.symbol,
                %date,
                "corporate action already rejected; updating reason"
            ),
            ActionStatus::Pending => {}
        }

        let now = Utc::now();
        record.status = ActionStatus::Rejected;
        record.rejection_reason = Some(reason.to_string());
        record.rejected_at = Some(now);
        record.updated_at = now;
        info!(symbol = %record.symbol, %date, reason, "corporate action rejected");

        self.store(record)
    }

    /// Note that the action has been written into the `interval` dataset.
    pub fn mark_applied(
        &mut self,
        symbol: &str,
        date: NaiveDate,
        interval: Interval,
        multiplier: f64,
        rows_adjusted: usize,
    ) -> Result<(), LedgerError> {
        let mut record = self.lookup(symbol, date)?.clone();

        let now = Utc::now();
        record.applied.push(AppliedAdjustment {
            interval,
            multiplier,
            rows_adjusted,
            applied_at: now,
        });
        record.updated_at = now;
        self.store(record).map(|_| ())
    }

    pub fn get(&self, symbol: &str, date: NaiveDate) -> Option<&CorporateAction> {
        self.records.get(&(normalize_symbol(symbol), date))
    }

    /// Matching records, newest date first.
    pub fn query(&self, filter: &ActionFilter) -> Vec<&CorporateAction> {
        let mut out: Vec<&CorporateAction> =
            self.records.values().filter(|a| filter.matches(a)).collect();
        out.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.symbol.cmp(&b.symbol)));
        out
    }

    pub fn by_symbol(&self, symbol: &str) -> Vec<&CorporateAction> {
        self.query(&ActionFilter::symbol(symbol))
    }

    pub fn by_status(&self, status: ActionStatus) -> Vec<&CorporateAction> {
        self.query(&ActionFilter::status(status))
    }

    pub fn by_date_range(&self, from: NaiveDate, to: NaiveDate) -> Vec<&CorporateAction> {
        self.query(&ActionFilter::between(from, to))
    }

    pub fn pending(&self) -> Vec<&CorporateAction> {
        self.by_status(ActionStatus::Pending)
    }

    /// Verified records for one listing, oldest first.
    pub fn verified_for(&self, symbol: &str, exchange: Exchange) -> Vec<&CorporateAction> {
        let filter = ActionFilter {
            exchange: Some(exchange),
            status: Some(ActionStatus::Verified),
            ..ActionFilter::symbol(symbol)
        };
        let mut out = self.query(&filter);
        out.reverse();
        out
    }

    pub fn all(&self) -> impl Iterator<Item = &CorporateAction> {
        self.records.values()
    }

    fn lookup(&self, symbol: &str, date: NaiveDate) -> Result<&CorporateAction, LedgerError> {
        let symbol = normalize_symbol(symbol);
        self.records
            .get(&(symbol.clone(), date))
            .ok_or(LedgerError::NotFound { symbol, date })
    }

    /// Write the collection with `record` in place, then adopt it. A failed
    /// write leaves the in-memory records untouched.
    fn store(&mut self, record: CorporateAction) -> Result<CorporateAction, LedgerError> {
        let mut next = self.records.clone();
        next.insert((record.symbol.clone(), record.date), record.clone());
        write_records(&self.path, &next)?;
        self.records = next;
        Ok(record)
    }
}

fn load_records(path: &Path) -> Result<BTreeMap<RecordKey, CorporateAction>, LedgerError> {
    match fs::read_to_string(path) {
        Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
        Ok(text) => {
            let list: Vec<CorporateAction> = serde_json::from_str(&text)?;
            Ok(list
                .into_iter()
                .map(|a| ((a.symbol.clone(), a.date), a))
                .collect())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(source) => Err(LedgerError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_records(
    path: &Path,
    records: &BTreeMap<RecordKey, CorporateAction>,
) -> Result<(), LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let list: Vec<&CorporateAction> = records.values().collect();
    let json = serde_json::to_string_pretty(&list)?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json).map_err(io_err)?;
    fs::rename(&tmp_path, path).map_err(|source| {
        let _ = fs::remove_file(&tmp_path);
        io_err(source)
    })?;
    Ok(())
}
