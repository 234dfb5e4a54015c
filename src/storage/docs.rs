//! Persistence document schemas for ticks and bars.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::kline::bar::KLine;
use crate::market::tick::Tick;

const DATE_FORMAT: &str = "%Y%m%d";
const TIME_FORMAT: &str = "%H:%M:%S";
const TICK_TIME_FORMAT: &str = "%H:%M:%S%.6f";

/// A tick as persisted: the input contract fields plus the derived
/// per-tick volume delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickDocument {
    pub symbol: String,
    pub exchange: String,
    pub vt_symbol: String,
    pub datetime: NaiveDateTime,
    pub date: String,
    pub time: String,
    pub last_price: f64,
    pub volume: i64,
    pub last_volume: i64,
}

impl TickDocument {
    /// Snapshot a normalized tick. Fails when the tick's datetime was
    /// never resolved.
    pub fn from_tick(tick: &Tick) -> Result<Self> {
        let datetime = tick.datetime.context("tick datetime not resolved")?;
        Ok(TickDocument {
            symbol: tick.symbol.clone(),
            exchange: tick.exchange.to_string(),
            vt_symbol: tick.vt_symbol.clone(),
            datetime,
            date: datetime.format(DATE_FORMAT).to_string(),
            time: datetime.format(TICK_TIME_FORMAT).to_string(),
            last_price: tick.last_price,
            volume: tick.volume,
            last_volume: tick.last_volume,
        })
    }
}

/// A bar as persisted.
///
/// `open_datetime` and `close_datetime` record which ticks own the open
/// and close, so a restarted engine can rehydrate a still-open bar and
/// keep updating it. Documents written by other tooling may lack them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KlineDocument {
    pub symbol: String,
    pub vt_symbol: String,
    pub datetime: NaiveDateTime,
    pub date: String,
    pub time: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub open_datetime: Option<NaiveDateTime>,
    pub close_datetime: Option<NaiveDateTime>,
}

impl KlineDocument {
    pub fn from_kline(kline: &KLine) -> Self {
        KlineDocument {
            symbol: kline.symbol.clone(),
            vt_symbol: kline.vt_symbol.clone(),
            datetime: kline.datetime,
            date: kline.datetime.format(DATE_FORMAT).to_string(),
            time: kline.datetime.format(TIME_FORMAT).to_string(),
            open: kline.open,
            high: kline.high,
            low: kline.low,
            close: kline.close,
            volume: kline.volume,
            // The fresh-bar sentinels are in-memory placeholders, not data.
            open_datetime: (kline.open_datetime != NaiveDateTime::MAX).then_some(kline.open_datetime),
            close_datetime: (kline.close_datetime != NaiveDateTime::MIN)
                .then_some(kline.close_datetime),
        }
    }

    /// Rebuild the in-memory bar. Missing open/close timestamps hydrate
    /// to the extremes that keep later ticks from displacing the stored
    /// open and close.
    pub fn into_kline(self) -> KLine {
        KLine {
            datetime: self.datetime,
            symbol: self.symbol,
            vt_symbol: self.vt_symbol,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            open_datetime: self.open_datetime.unwrap_or(NaiveDateTime::MIN),
            close_datetime: self.close_datetime.unwrap_or(NaiveDateTime::MAX),
            volume: self.volume,
        }
    }
}
