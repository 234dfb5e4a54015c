//! The K-line (bar) type and its tick mutation rule.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One OHLCV bar.
///
/// `datetime` identifies the bucket: the bar's end time for intraday
/// periods, midnight of the owning trading date for daily bars. Open and
/// close track the timestamps of the ticks that set them, so late ticks
/// slot in correctly and a rehydrated bar can keep updating after a
/// restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KLine {
    pub datetime: NaiveDateTime,
    pub symbol: String,
    pub vt_symbol: String,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,

    /// Timestamp of the tick currently holding `open`.
    pub open_datetime: NaiveDateTime,
    /// Timestamp of the tick currently holding `close`.
    pub close_datetime: NaiveDateTime,

    /// Sum of per-tick volume deltas.
    pub volume: i64,
}

impl KLine {
    /// A fresh bar awaiting its first tick. `low` starts at the maximum
    /// representable price and the open/close timestamps at their opposite
    /// extremes, so the first tick claims every field.
    pub fn new(datetime: NaiveDateTime, symbol: &str, vt_symbol: &str) -> Self {
        KLine {
            datetime,
            symbol: symbol.to_string(),
            vt_symbol: vt_symbol.to_string(),
            open: 0.0,
            high: 0.0,
            low: f64::MAX,
            close: 0.0,
            open_datetime: NaiveDateTime::MAX,
            close_datetime: NaiveDateTime::MIN,
            volume: 0,
        }
    }

    /// Fold one tick into the bar.
    ///
    /// The earliest tick seen so far owns `open`, the latest owns `close`;
    /// arrival order does not matter.
    pub fn apply(&mut self, at: NaiveDateTime, last_price: f64, last_volume: i64) {
        if at < self.open_datetime {
            self.open = last_price;
            self.open_datetime = at;
        }
        if at > self.close_datetime {
            self.close = last_price;
            self.close_datetime = at;
        }
        self.high = self.high.max(last_price);
        self.low = self.low.min(last_price);
        self.volume += last_volume;
    }
}
