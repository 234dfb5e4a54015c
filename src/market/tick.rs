//! The tick input contract.
//!
//! Ticks arrive from an external market-data source with symbol, exchange,
//! separate date/time strings (or a precomputed datetime), the last traded
//! price and the cumulative daily volume. `normalize` makes a tick ready
//! for aggregation: identifiers uppercased, datetime resolved.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Format of the combined `date time` fields: `YYYYMMDD HH:MM:SS.ffffff`,
/// fractional seconds optional.
const DATETIME_FORMAT: &str = "%Y%m%d %H:%M:%S%.f";

// =============================================================================
// EXCHANGE
// =============================================================================

/// Futures exchange identifier.
///
/// `Unknown` is the empty identifier some feeds send and maps to the
/// default day session; `Other` is a venue this engine has no timeline
/// for, and its ticks are rejected at lookup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Exchange {
    Shfe,
    Dce,
    Czce,
    Cffex,
    #[default]
    Unknown,
    Other,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Shfe => "SHFE",
            Exchange::Dce => "DCE",
            Exchange::Czce => "CZCE",
            Exchange::Cffex => "CFFEX",
            Exchange::Unknown => "",
            Exchange::Other => "OTHER",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_uppercase().as_str() {
            "SHFE" => Exchange::Shfe,
            "DCE" => Exchange::Dce,
            "CZCE" => Exchange::Czce,
            "CFFEX" => Exchange::Cffex,
            "" => Exchange::Unknown,
            _ => Exchange::Other,
        })
    }
}

impl Serialize for Exchange {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Exchange {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(s.parse().unwrap_or_default())
    }
}

// =============================================================================
// TICK
// =============================================================================

/// A single market-data update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tick {
    /// Contract symbol, e.g. `RB1810`.
    pub symbol: String,
    pub exchange: Exchange,
    /// Platform-wide symbol, usually `symbol` or `symbol.exchange`.
    pub vt_symbol: String,
    /// Trading date as `YYYYMMDD`; used when `datetime` is absent.
    pub date: String,
    /// Time of day as `HH:MM:SS.ffffff`; used when `datetime` is absent.
    pub time: String,
    /// Resolved timestamp. Feeds may leave this unset and supply the
    /// `date`/`time` pair instead.
    pub datetime: Option<NaiveDateTime>,
    pub last_price: f64,
    /// Cumulative volume for the trading day, monotonic within a day and
    /// reset across days.
    pub volume: i64,
    /// Volume contributed by this tick alone; derived during aggregation
    /// by differencing consecutive `volume` values.
    #[serde(default)]
    pub last_volume: i64,
}

impl Tick {
    /// Uppercase the identifier fields and resolve `datetime`, returning
    /// the resolved timestamp.
    pub fn normalize(&mut self) -> Result<NaiveDateTime> {
        self.symbol = self.symbol.trim().to_uppercase();
        self.vt_symbol = self.vt_symbol.trim().to_uppercase();
        if let Some(dt) = self.datetime {
            return Ok(dt);
        }
        let combined = format!("{} {}", self.date, self.time);
        let dt = NaiveDateTime::parse_from_str(&combined, DATETIME_FORMAT)
            .with_context(|| format!("unparseable tick datetime {:?}", combined))?;
        self.datetime = Some(dt);
        Ok(dt)
    }
}
