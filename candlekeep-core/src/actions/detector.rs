//! Corporate action detector.
//!
//! Flags large downward close-to-close moves and classifies each against
//! the known ratio table. The output is a suspicion only; nothing in the
//! store changes until a candidate is verified in the ledger.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::ratios::RatioTable;
use crate::config::DetectionConfig;
use crate::domain::{ActionType, Confidence, Exchange, MarketClock, OhlcvRow, Ratio};

/// A suspected split or bonus at one trading date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateActionCandidate {
    pub symbol: String,
    pub exchange: Exchange,
    /// Trading date of the row whose close dropped.
    pub date: NaiveDate,
    pub timestamp: i64,
    /// Close-to-close change in percent, negative for a drop.
    pub price_change_pct: f64,
    pub prev_close: f64,
    pub curr_close: f64,
    pub suspected_type: ActionType,
    /// `None` when no known ratio was close enough.
    pub suspected_ratio: Option<Ratio>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone)]
pub struct Detector {
    threshold: f64,
    high_confidence: f64,
    medium_confidence: f64,
    table: RatioTable,
    clock: MarketClock,
}

impl Detector {
    pub fn new(config: &DetectionConfig, clock: MarketClock) -> Self {
        Self {
            threshold: config.threshold,
            high_confidence: config.high_confidence,
            medium_confidence: config.medium_confidence,
            table: RatioTable::new(config.known_ratios.clone()),
            clock,
        }
    }

    pub fn ratio_table(&self) -> &RatioTable {
        &self.table
    }

    /// Scan an ascending row sequence for suspected actions.
    pub fn detect(
        &self,
        rows: &[OhlcvRow],
        symbol: &str,
        exchange: Exchange,
    ) -> Vec<CorporateActionCandidate> {
        self.detect_after(None, rows, symbol, exchange)
    }

    /// Like [`Detector::detect`], with `previous` as the row preceding
    /// `rows[0]` so a drop at the very first new row is still seen.
    pub fn detect_after(
        &self,
        previous: Option<&OhlcvRow>,
        rows: &[OhlcvRow],
        symbol: &str,
        exchange: Exchange,
    ) -> Vec<CorporateActionCandidate> {
        let mut candidates = Vec::new();
        let mut prev = previous.copied();

        for row in rows {
            if let Some(p) = prev {
                if let Some(candidate) = self.classify(&p, row, symbol, exchange) {
                    warn!(
                        symbol,
                        exchange = %exchange,
                        date = %candidate.date,
                        change_pct = candidate.price_change_pct,
                        suspected_type = %candidate.suspected_type,
                        confidence = ?candidate.confidence,
                        "possible corporate action"
                    );
                    candidates.push(candidate);
                }
            }
            prev = Some(*row);
        }

        debug!(symbol, rows = rows.len(), found = candidates.len(), "detection scan");
        candidates
    }

    fn classify(
        &self,
        prev: &OhlcvRow,
        curr: &OhlcvRow,
        symbol: &str,
        exchange: Exchange,
    ) -> Option<CorporateActionCandidate> {
        if !(prev.close.is_finite() && curr.close.is_finite()) || prev.close <= 0.0 {
            return None;
        }
        let change = (curr.close - prev.close) / prev.close;
        // Upward moves never come from a split or bonus.
        if change >= 0.0 || change.abs() <= self.threshold {
            return None;
        }

        let observed_drop = change.abs();
        let (suspected_type, suspected_ratio, confidence) = match self.table.nearest(observed_drop)
        {
            Some(m) if m.deviation < self.high_confidence => {
                (m.entry.action_type, Some(m.entry.ratio), Confidence::High)
            }
            Some(m) if m.deviation < self.medium_confidence => {
                (m.entry.action_type, Some(m.entry.ratio), Confidence::Medium)
            }
            _ => (ActionType::Unknown, None, Confidence::Low),
        };

        Some(CorporateActionCandidate {
            symbol: symbol.to_string(),
            exchange,
            date: self.clock.trading_date(curr.timestamp),
            timestamp: curr.timestamp,
            price_change_pct: change * 100.0,
            prev_close: prev.close,
            curr_close: curr.close,
            suspected_type,
            suspected_ratio,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = 86_400;
    const T0: i64 = 1_704_153_600;

    fn series(closes: &[f64]) -> Vec<OhlcvRow> {
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| OhlcvRow::new(T0 + i as i64 * DAY, *c, *c, *c, *c, 1_000))
            .collect()
    }

    fn detector() -> Detector {
        Detector::new(&DetectionConfig::default(), MarketClock::utc())
    }

    #[test]
    fn half_drop_is_high_confidence_bonus() {
        let found = detector().detect(&series(&[100.0, 100.0, 49.7]), "ABC", Exchange::Nse);
        assert_eq!(found.len(), 1);
        let c = &found[0];
        assert_eq!(c.suspected_type, ActionType::Bonus);
        assert_eq!(c.suspected_ratio.map(|r| r.to_string()).as_deref(), Some("1:1"));
        assert_eq!(c.confidence, Confidence::High);
        assert!((c.price_change_pct + 50.3).abs() < 1e-9);
        assert_eq!(c.prev_close, 100.0);
        assert_eq!(c.curr_close, 49.7);
        assert_eq!(c.timestamp, T0 + 2 * DAY);
        assert_eq!(c.date, NaiveDate::from_ymd_opt(2024, 1, 4).unwrap());
    }

    #[test]
    fn small_drop_is_ignored() {
        assert!(detector()
            .detect(&series(&[100.0, 88.0]), "ABC", Exchange::Nse)
            .is_empty());
    }

    #[test]
    fn upward_jump_is_ignored() {
        assert!(detector()
            .detect(&series(&[100.0, 125.0]), "ABC", Exchange::Nse)
            .is_empty());
    }

    #[test]
    fn four_percent_off_is_medium() {
        // 0.84 drop is 0.04 away from the 1:5 split.
        let found = detector().detect(&series(&[100.0, 16.0]), "ABC", Exchange::Nse);
        assert_eq!(found[0].suspected_type, ActionType::Split);
        assert_eq!(found[0].confidence, Confidence::Medium);
    }

    #[test]
    fn unmatched_drop_is_low_and_unknown() {
        // 0.42 is 0.08 from the nearest entry.
        let found = detector().detect(&series(&[100.0, 58.0]), "ABC", Exchange::Nse);
        assert_eq!(found[0].suspected_type, ActionType::Unknown);
        assert_eq!(found[0].suspected_ratio, None);
        assert_eq!(found[0].confidence, Confidence::Low);
    }

    #[test]
    fn context_row_catches_drop_at_first_new_row() {
        let prev = OhlcvRow::new(T0 - DAY, 500.0, 500.0, 500.0, 500.0, 10);
        let rows = series(&[100.0, 101.0]);
        let found = detector().detect_after(Some(&prev), &rows, "ABC", Exchange::Nse);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].suspected_ratio.map(|r| r.to_string()).as_deref(), Some("1:5"));
        assert!(detector().detect(&rows, "ABC", Exchange::Nse).is_empty());
    }

    #[test]
    fn one_candidate_per_violating_row() {
        let found = detector().detect(
            &series(&[100.0, 50.0, 50.0, 10.0]),
            "ABC",
            Exchange::Nse,
        );
        assert_eq!(found.len(), 2);
    }
}
