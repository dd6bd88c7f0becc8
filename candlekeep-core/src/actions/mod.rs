//! Corporate action detection and the verification ledger.

pub mod detector;
pub mod ledger;
pub mod ratios;

pub use detector::{CorporateActionCandidate, Detector};
pub use ledger::{ActionFilter, ActionLedger, AppliedAdjustment, CorporateAction, LedgerError};
pub use ratios::{KnownRatio, RatioMatch, RatioTable};
