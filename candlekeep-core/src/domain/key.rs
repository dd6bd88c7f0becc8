//! Dataset keys: exchange, symbol and interval.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Exchanges the store knows how to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nse,
    Bse,
    Nfo,
    Bfo,
    Mcx,
    Cds,
}

/// Price bounds differ between cash equities and derivatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentClass {
    Equity,
    Derivative,
}

impl Exchange {
    pub const ALL: [Exchange; 6] = [
        Exchange::Nse,
        Exchange::Bse,
        Exchange::Nfo,
        Exchange::Bfo,
        Exchange::Mcx,
        Exchange::Cds,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
            Exchange::Nfo => "NFO",
            Exchange::Bfo => "BFO",
            Exchange::Mcx => "MCX",
            Exchange::Cds => "CDS",
        }
    }

    pub fn instrument_class(&self) -> InstrumentClass {
        match self {
            Exchange::Nse | Exchange::Bse => InstrumentClass::Equity,
            Exchange::Nfo | Exchange::Bfo | Exchange::Mcx | Exchange::Cds => {
                InstrumentClass::Derivative
            }
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Exchange::ALL
            .into_iter()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| KeyError::UnknownExchange(s.to_string()))
    }
}

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "minute")]
    Minute,
    #[serde(rename = "3minute")]
    Minute3,
    #[serde(rename = "5minute")]
    Minute5,
    #[serde(rename = "10minute")]
    Minute10,
    #[serde(rename = "15minute")]
    Minute15,
    #[serde(rename = "30minute")]
    Minute30,
    #[serde(rename = "60minute")]
    Minute60,
    #[serde(rename = "day")]
    Day,
}

impl Interval {
    pub const ALL: [Interval; 8] = [
        Interval::Minute,
        Interval::Minute3,
        Interval::Minute5,
        Interval::Minute10,
        Interval::Minute15,
        Interval::Minute30,
        Interval::Minute60,
        Interval::Day,
    ];

    /// Name used in the storage namespace (`/data/{EX}/{SYM}/{interval}`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute => "minute",
            Interval::Minute3 => "3minute",
            Interval::Minute5 => "5minute",
            Interval::Minute10 => "10minute",
            Interval::Minute15 => "15minute",
            Interval::Minute30 => "30minute",
            Interval::Minute60 => "60minute",
            Interval::Day => "day",
        }
    }

    /// Nominal candle length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Interval::Minute => 60,
            Interval::Minute3 => 180,
            Interval::Minute5 => 300,
            Interval::Minute10 => 600,
            Interval::Minute15 => 900,
            Interval::Minute30 => 1_800,
            Interval::Minute60 => 3_600,
            Interval::Day => 86_400,
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Interval::Day)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .into_iter()
            .find(|i| i.as_str() == s.trim())
            .ok_or_else(|| KeyError::UnknownInterval(s.to_string()))
    }
}

/// Identifies one ordered row sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatasetKey {
    pub exchange: Exchange,
    pub symbol: String,
    pub interval: Interval,
}

impl DatasetKey {
    /// Builds a key, normalizing the symbol (see [`normalize_symbol`]).
    pub fn new(exchange: Exchange, symbol: &str, interval: Interval) -> Self {
        Self {
            exchange,
            symbol: normalize_symbol(symbol),
            interval,
        }
    }

    /// Fails for a symbol that cannot be a directory name.
    pub fn check(&self) -> Result<(), KeyError> {
        check_symbol(&self.symbol)
    }

    /// Namespace path of the dataset, e.g. `/data/NSE/RELIANCE/day`.
    pub fn data_path(&self) -> String {
        format!("/data/{}/{}/{}", self.exchange, self.symbol, self.interval)
    }

    /// Parses a namespace path produced by [`DatasetKey::data_path`].
    pub fn parse_path(path: &str) -> Result<Self, KeyError> {
        let parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        match parts.as_slice() {
            ["data", exchange, symbol, interval] => {
                let key = Self::new(exchange.parse()?, symbol, interval.parse()?);
                key.check()?;
                Ok(key)
            }
            _ => Err(KeyError::InvalidPath(path.to_string())),
        }
    }
}

impl fmt::Display for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} [{}]", self.exchange, self.symbol, self.interval)
    }
}

/// Upper-cases a symbol and replaces characters that are unsafe in a
/// namespace segment (`&`, `-`, space, `/`) with `_`.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol
        .trim()
        .to_uppercase()
        .chars()
        .map(|c| match c {
            '&' | '-' | ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect()
}

/// Rejects symbols that are empty or made only of dots once normalized;
/// `..` would resolve the dataset directory outside its exchange.
pub fn check_symbol(symbol: &str) -> Result<(), KeyError> {
    if symbol.is_empty() || symbol.chars().all(|c| c == '.') {
        return Err(KeyError::InvalidSymbol(symbol.to_string()));
    }
    Ok(())
}

/// Inclusive timestamp range in UTC seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.from <= ts && ts <= self.to
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),

    #[error("unknown interval '{0}'")]
    UnknownInterval(String),

    #[error("invalid dataset path '{0}' (expected /data/EXCHANGE/SYMBOL/INTERVAL)")]
    InvalidPath(String),

    #[error("invalid symbol '{0}'")]
    InvalidSymbol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_is_normalized() {
        assert_eq!(normalize_symbol(" m&m "), "M_M");
        assert_eq!(normalize_symbol("bajaj-auto"), "BAJAJ_AUTO");
    }

    #[test]
    fn path_like_symbols_are_rejected() {
        for bad in ["", "  ", ".", ".."] {
            let key = DatasetKey::new(Exchange::Nse, bad, Interval::Day);
            assert!(matches!(key.check(), Err(KeyError::InvalidSymbol(_))), "{bad:?}");
        }
        assert!(DatasetKey::new(Exchange::Nse, "M&M", Interval::Day).check().is_ok());
        assert!(DatasetKey::new(Exchange::Nse, "NIFTY.50", Interval::Day).check().is_ok());
        assert!(matches!(
            DatasetKey::parse_path("/data/NSE/../day"),
            Err(KeyError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn data_path_roundtrip() {
        let key = DatasetKey::new(Exchange::Nse, "reliance", Interval::Day);
        assert_eq!(key.data_path(), "/data/NSE/RELIANCE/day");
        assert_eq!(DatasetKey::parse_path(&key.data_path()).unwrap(), key);
    }

    #[test]
    fn parse_path_rejects_other_namespaces() {
        assert!(matches!(
            DatasetKey::parse_path("/instruments/NSE"),
            Err(KeyError::InvalidPath(_))
        ));
    }

    #[test]
    fn exchange_parsing_is_case_insensitive() {
        assert_eq!("nse".parse::<Exchange>().unwrap(), Exchange::Nse);
        assert!("NYSE".parse::<Exchange>().is_err());
    }

    #[test]
    fn derivative_exchanges_are_classified() {
        assert_eq!(Exchange::Nse.instrument_class(), InstrumentClass::Equity);
        assert_eq!(Exchange::Nfo.instrument_class(), InstrumentClass::Derivative);
        assert_eq!(Exchange::Mcx.instrument_class(), InstrumentClass::Derivative);
    }

    #[test]
    fn interval_names_match_serde() {
        for interval in Interval::ALL {
            let json = serde_json::to_string(&interval).unwrap();
            assert_eq!(json, format!("\"{}\"", interval.as_str()));
            assert_eq!(interval.as_str().parse::<Interval>().unwrap(), interval);
        }
    }
}
