//! Corporate action vocabulary: action type, share ratio, confidence, status.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Kind of corporate action.
///
/// `Unknown` is only ever produced by the detector; it cannot be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Split,
    Bonus,
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Split => "split",
            ActionType::Bonus => "bonus",
            ActionType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = RatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "split" => Ok(ActionType::Split),
            "bonus" => Ok(ActionType::Bonus),
            "unknown" => Ok(ActionType::Unknown),
            other => Err(RatioError::UnknownActionType(other.to_string())),
        }
    }
}

/// Share ratio written `N:D`, e.g. `1:5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ratio {
    pub numerator: u32,
    pub denominator: u32,
}

impl Ratio {
    /// Both parts must be non-zero.
    pub fn new(numerator: u32, denominator: u32) -> Result<Self, RatioError> {
        if numerator == 0 || denominator == 0 {
            return Err(RatioError::Zero(format!("{numerator}:{denominator}")));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.numerator, self.denominator)
    }
}

impl FromStr for Ratio {
    type Err = RatioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (n, d) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| RatioError::Malformed(s.to_string()))?;
        let numerator = n
            .trim()
            .parse::<u32>()
            .map_err(|_| RatioError::Malformed(s.to_string()))?;
        let denominator = d
            .trim()
            .parse::<u32>()
            .map_err(|_| RatioError::Malformed(s.to_string()))?;
        Ratio::new(numerator, denominator)
    }
}

impl TryFrom<String> for Ratio {
    type Error = RatioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ratio> for String {
    fn from(ratio: Ratio) -> Self {
        ratio.to_string()
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RatioError {
    #[error("malformed ratio '{0}' (expected N:D)")]
    Malformed(String),

    #[error("ratio '{0}' has a zero component")]
    Zero(String),

    #[error("unknown action type '{0}' (expected split or bonus)")]
    UnknownActionType(String),
}

/// How closely an observed drop matched a known ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        })
    }
}

/// Verification state of a ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    #[serde(rename = "pending_verification")]
    Pending,
    Verified,
    Rejected,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending_verification",
            ActionStatus::Verified => "verified",
            ActionStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" | "pending_verification" => Ok(ActionStatus::Pending),
            "verified" => Ok(ActionStatus::Verified),
            "rejected" => Ok(ActionStatus::Rejected),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_parses_and_displays() {
        let ratio: Ratio = "1:5".parse().unwrap();
        assert_eq!(ratio.numerator, 1);
        assert_eq!(ratio.denominator, 5);
        assert_eq!(ratio.to_string(), "1:5");
    }

    #[test]
    fn ratio_rejects_garbage() {
        assert!(matches!("15".parse::<Ratio>(), Err(RatioError::Malformed(_))));
        assert!(matches!("a:b".parse::<Ratio>(), Err(RatioError::Malformed(_))));
        assert!(matches!("0:5".parse::<Ratio>(), Err(RatioError::Zero(_))));
    }

    #[test]
    fn ratio_serializes_as_string() {
        let ratio = Ratio::new(1, 1).unwrap();
        assert_eq!(serde_json::to_string(&ratio).unwrap(), "\"1:1\"");
        let back: Ratio = serde_json::from_str("\"2:3\"").unwrap();
        assert_eq!(back, Ratio::new(2, 3).unwrap());
    }

    #[test]
    fn status_uses_ledger_spelling() {
        assert_eq!(
            serde_json::to_string(&ActionStatus::Pending).unwrap(),
            "\"pending_verification\""
        );
        assert_eq!(
            serde_json::to_string(&ActionStatus::Verified).unwrap(),
            "\"verified\""
        );
    }

    #[test]
    fn action_type_parsing() {
        assert_eq!("Bonus".parse::<ActionType>().unwrap(), ActionType::Bonus);
        assert!(matches!(
            "dividend".parse::<ActionType>(),
            Err(RatioError::UnknownActionType(_))
        ));
    }

    #[test]
    fn confidence_orders_low_to_high() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }
}
