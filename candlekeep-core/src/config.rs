//! Store configuration.
//!
//! Every threshold the validator, detector and adjuster use is carried here
//! and handed to them explicitly. Sections default individually, so a TOML
//! file only needs the keys it overrides:
//!
//! ```toml
//! [storage]
//! root = "/var/lib/candlekeep"
//!
//! [detection]
//! threshold = 0.25
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::actions::ratios::KnownRatio;
use crate::domain::{ActionType, InstrumentClass, MarketClock, Ratio};

/// 2000-01-01T00:00:00Z
const MIN_TIMESTAMP: i64 = 946_684_800;
/// 2099-12-31T23:59:59Z
const MAX_TIMESTAMP: i64 = 4_102_444_799;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub storage: StorageConfig,
    pub validation: ValidationConfig,
    pub detection: DetectionConfig,
    pub adjustment: AdjustmentConfig,
    pub market: MarketConfig,
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                root: root.into(),
                ..StorageConfig::default()
            },
            ..Self::default()
        }
    }

    /// Load and validate a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would make the engines misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.chunk_rows == 0 {
            return Err(ConfigError::Invalid("storage.chunk_rows must be > 0".into()));
        }
        if !(1..=22).contains(&self.storage.compression_level) {
            return Err(ConfigError::Invalid(
                "storage.compression_level must be within 1..=22".into(),
            ));
        }
        let v = &self.validation;
        if v.min_price < 0.0 || v.min_price > v.max_price {
            return Err(ConfigError::Invalid(
                "validation.min_price must be within [0, max_price]".into(),
            ));
        }
        if v.min_price_derivative < 0.0 || v.min_price_derivative > v.max_price_derivative {
            return Err(ConfigError::Invalid(
                "validation.min_price_derivative must be within [0, max_price_derivative]".into(),
            ));
        }
        if v.min_timestamp >= v.max_timestamp {
            return Err(ConfigError::Invalid(
                "validation.min_timestamp must precede max_timestamp".into(),
            ));
        }
        let d = &self.detection;
        if d.threshold <= 0.0 || d.threshold >= 1.0 {
            return Err(ConfigError::Invalid(
                "detection.threshold must be within (0, 1)".into(),
            ));
        }
        if d.high_confidence > d.medium_confidence {
            return Err(ConfigError::Invalid(
                "detection.high_confidence must not exceed medium_confidence".into(),
            ));
        }
        if d.known_ratios.is_empty() {
            return Err(ConfigError::Invalid(
                "detection.known_ratios must not be empty".into(),
            ));
        }
        if self.adjustment.discontinuity_threshold <= 0.0 {
            return Err(ConfigError::Invalid(
                "adjustment.discontinuity_threshold must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn clock(&self) -> MarketClock {
        MarketClock::new(self.market.utc_offset_minutes)
    }
}

/// On-disk container settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Container root; datasets live under `{root}/data/{EX}/{SYM}/{interval}/`.
    pub root: PathBuf,

    /// Zstd level for row files.
    pub compression_level: i32,

    /// Parquet row-group size.
    pub chunk_rows: usize,

    /// Snapshots kept by `Store::backup`.
    pub max_backups: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("store"),
            compression_level: 3,
            chunk_rows: 10_000,
            max_backups: 3,
        }
    }
}

/// Row and dataset validity bounds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_price: f64,
    pub max_price: f64,
    pub min_price_derivative: f64,
    pub max_price_derivative: f64,
    pub max_volume: i64,
    pub min_timestamp: i64,
    pub max_timestamp: i64,

    /// Candle-over-candle move that raises a warning (0.21 = 21%).
    pub price_jump_warning: f64,

    /// Volume this many times the median raises a warning.
    pub volume_spike_ratio: f64,

    /// Treat warnings as errors.
    pub strict: bool,
}

impl ValidationConfig {
    /// Inclusive price bounds for an instrument class.
    pub fn price_bounds(&self, class: InstrumentClass) -> (f64, f64) {
        match class {
            InstrumentClass::Equity => (self.min_price, self.max_price),
            InstrumentClass::Derivative => (self.min_price_derivative, self.max_price_derivative),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_price: 0.01,
            max_price: 1_000_000.0,
            min_price_derivative: 0.0,
            max_price_derivative: 100_000.0,
            max_volume: 10_000_000_000,
            min_timestamp: MIN_TIMESTAMP,
            max_timestamp: MAX_TIMESTAMP,
            price_jump_warning: 0.21,
            volume_spike_ratio: 10.0,
            strict: false,
        }
    }
}

/// Corporate action detector settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum downward close-to-close move (0.20 = 20%).
    pub threshold: f64,

    /// Deviation from a known drop below which confidence is high.
    pub high_confidence: f64,

    /// Deviation below which confidence is medium.
    pub medium_confidence: f64,

    pub known_ratios: Vec<KnownRatio>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.20,
            high_confidence: 0.02,
            medium_confidence: 0.05,
            known_ratios: default_known_ratios(),
        }
    }
}

/// Drop-to-ratio table used by the detector.
///
/// Two entries share the 50% drop; the bonus is listed first and wins ties.
pub fn default_known_ratios() -> Vec<KnownRatio> {
    let entry = |drop: f64, kind: ActionType, n: u32, d: u32| KnownRatio {
        drop,
        action_type: kind,
        ratio: Ratio { numerator: n, denominator: d },
    };
    vec![
        entry(0.20, ActionType::Bonus, 1, 4),
        entry(0.25, ActionType::Bonus, 1, 3),
        entry(0.33, ActionType::Bonus, 1, 2),
        entry(0.50, ActionType::Bonus, 1, 1),
        entry(0.50, ActionType::Split, 1, 2),
        entry(0.67, ActionType::Split, 1, 3),
        entry(0.75, ActionType::Split, 1, 4),
        entry(0.80, ActionType::Split, 1, 5),
    ]
}

/// Consistency check settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdjustmentConfig {
    /// A close-to-close move at or above this at a verified action date
    /// means the history before it was never rescaled.
    pub discontinuity_threshold: f64,
}

impl Default for AdjustmentConfig {
    fn default() -> Self {
        Self {
            discontinuity_threshold: 0.20,
        }
    }
}

/// Exchange-local clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarketConfig {
    pub utc_offset_minutes: i32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        // IST
        Self {
            utc_offset_minutes: 330,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        StoreConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config = StoreConfig::from_toml_str(
            r#"
            [storage]
            root = "/tmp/ck"

            [detection]
            threshold = 0.25
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.root, PathBuf::from("/tmp/ck"));
        assert_eq!(config.storage.chunk_rows, 10_000);
        assert_eq!(config.detection.threshold, 0.25);
        assert_eq!(config.detection.high_confidence, 0.02);
        assert_eq!(config.detection.known_ratios.len(), 8);
        assert_eq!(config.adjustment.discontinuity_threshold, 0.20);
    }

    #[test]
    fn known_ratios_parse_from_toml() {
        let config = StoreConfig::from_toml_str(
            r#"
            [[detection.known_ratios]]
            drop = 0.9
            action_type = "split"
            ratio = "1:10"
            "#,
        )
        .unwrap();

        assert_eq!(config.detection.known_ratios.len(), 1);
        assert_eq!(config.detection.known_ratios[0].ratio.to_string(), "1:10");
        assert_eq!(config.detection.known_ratios[0].action_type, ActionType::Split);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let err = StoreConfig::from_toml_str("[detection]\nthreshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn malformed_toml_rejected() {
        let err = StoreConfig::from_toml_str("[storage\nroot = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn price_bounds_follow_instrument_class() {
        let v = ValidationConfig::default();
        assert_eq!(v.price_bounds(InstrumentClass::Equity), (0.01, 1_000_000.0));
        assert_eq!(v.price_bounds(InstrumentClass::Derivative), (0.0, 100_000.0));
    }
}
