//! Known price-drop to share-ratio table.

use serde::{Deserialize, Serialize};

use crate::domain::{ActionType, Ratio};

/// An expected fractional drop for a given action, e.g. 0.50 for a 1:1 bonus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnownRatio {
    pub drop: f64,
    pub action_type: ActionType,
    pub ratio: Ratio,
}

/// Lookup over [`KnownRatio`] entries, kept in ascending drop order.
#[derive(Debug, Clone)]
pub struct RatioTable {
    entries: Vec<KnownRatio>,
}

/// Closest table entry to an observed drop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatioMatch {
    pub entry: KnownRatio,
    /// Absolute difference between the observed and expected drop.
    pub deviation: f64,
}

impl RatioTable {
    /// Entries are stably sorted by drop, so configured order breaks ties.
    pub fn new(mut entries: Vec<KnownRatio>) -> Self {
        entries.sort_by(|a, b| a.drop.total_cmp(&b.drop));
        Self { entries }
    }

    pub fn entries(&self) -> &[KnownRatio] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry whose drop is nearest to `observed_drop`; the earliest wins a tie.
    pub fn nearest(&self, observed_drop: f64) -> Option<RatioMatch> {
        let mut best: Option<RatioMatch> = None;
        for entry in &self.entries {
            let deviation = (observed_drop - entry.drop).abs();
            match best {
                Some(b) if deviation >= b.deviation => {}
                _ => best = Some(RatioMatch { entry: *entry, deviation }),
            }
        }
        best
    }
}
