//! K-line periods and their persistence database names.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Database holding raw tick documents.
pub const TICK_DATABASE: &str = "VnTrader_Tick_Db";

/// Bar aggregation period. Ordering follows bar width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Period {
    Min1,
    Min2,
    Min3,
    Min5,
    Min15,
    Min30,
    Min60,
    Min120,
    Min240,
    Daily,
}

impl Period {
    pub const ALL: [Period; 10] = [
        Period::Min1,
        Period::Min2,
        Period::Min3,
        Period::Min5,
        Period::Min15,
        Period::Min30,
        Period::Min60,
        Period::Min120,
        Period::Min240,
        Period::Daily,
    ];

    /// Bar width in minutes.
    pub fn minutes(self) -> u32 {
        match self {
            Period::Min1 => 1,
            Period::Min2 => 2,
            Period::Min3 => 3,
            Period::Min5 => 5,
            Period::Min15 => 15,
            Period::Min30 => 30,
            Period::Min60 => 60,
            Period::Min120 => 120,
            Period::Min240 => 240,
            Period::Daily => 1440,
        }
    }

    /// Database name for bars of this period.
    pub fn database(self) -> &'static str {
        match self {
            Period::Min1 => "VnTrader_1Min_Db",
            Period::Min2 => "VnTrader_2Min_Db",
            Period::Min3 => "VnTrader_3Min_Db",
            Period::Min5 => "VnTrader_5Min_Db",
            Period::Min15 => "VnTrader_15Min_Db",
            Period::Min30 => "VnTrader_30Min_Db",
            Period::Min60 => "VnTrader_60Min_Db",
            Period::Min120 => "VnTrader_120Min_Db",
            Period::Min240 => "VnTrader_240Min_Db",
            Period::Daily => "VnTrader_Daily_Db",
        }
    }

    pub fn is_daily(self) -> bool {
        self == Period::Daily
    }

    /// Periods whose bars never span a session gap; they snap to the
    /// absolute wall-clock minute grid.
    pub fn on_minute_grid(self) -> bool {
        matches!(self, Period::Min1 | Period::Min3 | Period::Min5 | Period::Min15)
    }

    /// Periods whose bar boundaries must follow the session structure.
    pub fn on_session_grid(self) -> bool {
        matches!(
            self,
            Period::Min2 | Period::Min30 | Period::Min60 | Period::Min120 | Period::Min240
        )
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_daily() {
            write!(f, "1day")
        } else {
            write!(f, "{}min", self.minutes())
        }
    }
}

impl TryFrom<u32> for Period {
    type Error = u32;

    /// Map a minute count to a period; unknown widths are returned as the
    /// error value.
    fn try_from(minutes: u32) -> Result<Self, Self::Error> {
        Period::ALL
            .into_iter()
            .find(|p| p.minutes() == minutes)
            .ok_or(minutes)
    }
}

impl Serialize for Period {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.minutes())
    }
}

impl<'de> Deserialize<'de> for Period {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let minutes = u32::deserialize(deserializer)?;
        Period::try_from(minutes)
            .map_err(|m| serde::de::Error::custom(format!("unsupported K-line period: {} minutes", m)))
    }
}
