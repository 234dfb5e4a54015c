//! Single-period K-line generator.
//!
//! One generator owns the bar caches for one period across all symbols.
//! Each valid tick is assigned a bucket (the end time of the bar it
//! belongs to), folded into the bar at that bucket, and a new bucket
//! seals the previously newest bar as completed.
//!
//! On the first tick for a symbol the generator hydrates a handful of
//! recent bars from the store, so a restarted process keeps updating a
//! bar that was still open when the previous run stopped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Datelike, Duration, Local, NaiveDateTime, NaiveTime, Weekday};
use tracing::warn;

use crate::kline::bar::KLine;
use crate::kline::bar_timeline::BarTimelines;
use crate::kline::period::Period;
use crate::market::calendar::{floor_to_minute, next_working_day, trading_date};
use crate::market::session::{biased_minute, PointKind, TimelineRegistry, HOUR_BIAS};
use crate::market::tick::Tick;

/// Bars hydrated from the store when a symbol is first seen.
pub const INIT_KLINE_COUNT: usize = 10;

/// Default cap on cached bars per symbol; the oldest bucket is evicted
/// beyond it.
pub const MAX_KLINE_COUNT: usize = 100_000;

/// Result of folding one tick into a generator.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineUpdate {
    pub kline: KLine,
    /// True when `kline` is a bar that just sealed because the tick opened
    /// a later bucket; false when `kline` is the bar still being updated.
    pub is_completed: bool,
}

/// Per-period K-line generator.
pub struct KlineGenerator {
    period: Period,
    registry: Arc<TimelineRegistry>,
    bar_timelines: BarTimelines,
    store: Arc<dyn crate::storage::DocumentStore>,
    /// symbol -> bucket end -> bar, ascending by bucket.
    klines: HashMap<String, BTreeMap<NaiveDateTime, KLine>>,
    max_klines: usize,
}

impl KlineGenerator {
    pub fn new(
        period: Period,
        registry: Arc<TimelineRegistry>,
        store: Arc<dyn crate::storage::DocumentStore>,
    ) -> Self {
        Self::with_capacity(period, registry, store, MAX_KLINE_COUNT)
    }

    pub fn with_capacity(
        period: Period,
        registry: Arc<TimelineRegistry>,
        store: Arc<dyn crate::storage::DocumentStore>,
        max_klines: usize,
    ) -> Self {
        KlineGenerator {
            period,
            registry: Arc::clone(&registry),
            bar_timelines: BarTimelines::new(period.minutes(), registry),
            store,
            klines: HashMap::new(),
            max_klines,
        }
    }

    pub fn period(&self) -> Period {
        self.period
    }

    /// Fold a tick into its bar.
    ///
    /// Returns the completed previous bar when the tick opens a new
    /// bucket and an earlier bar existed; otherwise the bar the tick
    /// landed in, still open.
    pub fn update(&mut self, tick: &Tick) -> Result<KlineUpdate> {
        let at = tick.datetime.context("tick datetime not resolved")?;

        if self.klines.get(&tick.symbol).map_or(true, |m| m.is_empty()) {
            self.hydrate(&tick.symbol, INIT_KLINE_COUNT);
        }

        let bucket = self.bucket_for(tick, at)?;
        let cache = self.klines.entry(tick.symbol.clone()).or_default();

        if let Some(bar) = cache.get_mut(&bucket) {
            bar.apply(at, tick.last_price, tick.last_volume);
            return Ok(KlineUpdate {
                kline: bar.clone(),
                is_completed: false,
            });
        }

        let mut bar = KLine::new(bucket, &tick.symbol, &tick.vt_symbol);
        bar.apply(at, tick.last_price, tick.last_volume);

        let update = match cache.last_key_value() {
            None => KlineUpdate {
                kline: bar.clone(),
                is_completed: false,
            },
            Some((_, newest)) => KlineUpdate {
                kline: newest.clone(),
                is_completed: true,
            },
        };

        cache.insert(bucket, bar);
        while cache.len() > self.max_klines {
            cache.pop_first();
        }
        Ok(update)
    }

    /// The most recent `count` bars for a symbol, oldest first, pulling
    /// the deficit from the store when the cache is short.
    ///
    /// With `only_completed`, bars still reachable by ticks at
    /// `newest_tick_datetime` are skipped: intraday bars whose end lies
    /// beyond that time, daily bars of its trading date or later. Passing
    /// `None` uses the current local time, which is safe when tick
    /// latency is small.
    pub fn last_klines(
        &mut self,
        symbol: &str,
        count: usize,
        only_completed: bool,
        newest_tick_datetime: Option<NaiveDateTime>,
    ) -> Vec<KLine> {
        let symbol = symbol.trim().to_uppercase();
        self.hydrate(&symbol, count);

        let Some(cache) = self.klines.get(&symbol) else {
            return Vec::new();
        };

        if !only_completed {
            let skip = cache.len().saturating_sub(count);
            return cache.values().skip(skip).cloned().collect();
        }

        let newest = newest_tick_datetime.unwrap_or_else(|| Local::now().naive_local());
        let bars: Vec<&KLine> = cache.values().collect();
        let mut end = bars.len();
        for bar in bars.iter().rev() {
            let completed = if self.period.is_daily() {
                bar.datetime.date() < trading_date(newest)
            } else {
                bar.datetime <= newest
            };
            if completed {
                break;
            }
            end -= 1;
        }
        let start = end.saturating_sub(count);
        bars[start..end].iter().map(|b| (*b).clone()).collect()
    }

    /// Load up to `count - cached` recent bars from the store into the
    /// symbol's cache. Store failures and short reads leave the cache as
    /// it is; the generator keeps running on live ticks alone.
    fn hydrate(&mut self, symbol: &str, count: usize) {
        let cached = self.klines.get(symbol).map_or(0, |m| m.len());
        if cached >= count {
            return;
        }
        // Bars can end past "now" (a Friday-night bar ends on Monday), so
        // the upper bound for an empty cache sits three days out.
        let before = self
            .klines
            .get(symbol)
            .and_then(|m| m.first_key_value())
            .map(|(k, _)| *k)
            .unwrap_or_else(|| Local::now().naive_local() + Duration::days(3));

        let store = Arc::clone(&self.store);
        match store.find_last_klines(self.period.database(), symbol, count - cached, before) {
            Ok(docs) => {
                let cache = self.klines.entry(symbol.to_string()).or_default();
                for doc in docs {
                    let bar = doc.into_kline();
                    cache.insert(bar.datetime, bar);
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    symbol,
                    period = %self.period,
                    "kline hydration failed, continuing with live ticks only"
                );
            }
        }
    }

    /// The bucket (bar end) a tick belongs to.
    fn bucket_for(&mut self, tick: &Tick, at: NaiveDateTime) -> Result<NaiveDateTime> {
        if self.period.on_minute_grid() {
            return Ok(minute_grid_bucket(at, self.period.minutes()));
        }
        if self.period.on_session_grid() {
            return self.session_grid_bucket(tick, at);
        }
        // Daily: midnight of the owning trading date.
        Ok(trading_date(at).and_time(NaiveTime::MIN))
    }

    /// Session-aligned bucket: find the bar the tick sits in on the
    /// product's bar timeline and take the next point as the bar end.
    fn session_grid_bucket(&mut self, tick: &Tick, at: NaiveDateTime) -> Result<NaiveDateTime> {
        let timeline = self.bar_timelines.for_tick(tick)?;
        let tick_minute = floor_to_minute(at);
        let biased = biased_minute(tick_minute.time());

        let idx = timeline.partition_point(|p| p.minute <= biased);
        if idx == 0 || idx >= timeline.len() {
            bail!(
                "tick at {} for {} falls outside the {} bar timeline",
                at,
                tick.symbol,
                self.period
            );
        }
        let start = timeline[idx - 1];
        if start.kind != PointKind::Open {
            bail!(
                "tick at {} for {} lands on a closed {} bar boundary",
                at,
                tick.symbol,
                self.period
            );
        }
        let end_point = timeline[idx];

        let mut end = tick_minute + Duration::minutes((end_point.minute - biased) as i64);

        // A Friday-night bar that runs past the night close would end on
        // Saturday; push it to Monday so Monday's ticks can keep filling
        // it.
        if (at + Duration::hours(HOUR_BIAS as i64)).weekday() == Weekday::Sat {
            let night_end = self
                .registry
                .timeline_for(&tick.symbol, tick.exchange)?
                .first_close();
            if start.minute < night_end && night_end < end_point.minute {
                end = next_working_day(end);
            }
        }
        Ok(end)
    }
}

/// Bucket for grid periods: floor the minute to the period grid anchored
/// at absolute minute zero, then step to the grid's next boundary.
fn minute_grid_bucket(at: NaiveDateTime, period_minutes: u32) -> NaiveDateTime {
    let minute = floor_to_minute(at);
    let total_minutes = minute.and_utc().timestamp() / 60;
    let rem = total_minutes.rem_euclid(period_minutes as i64);
    minute - Duration::minutes(rem) + Duration::minutes(period_minutes as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn minute_grid_buckets() {
        let at = NaiveDate::from_ymd_opt(2024, 5, 15)
            .unwrap()
            .and_hms_opt(9, 7, 30)
            .unwrap();
        let end = |h: u32, m: u32| {
            NaiveDate::from_ymd_opt(2024, 5, 15)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap()
        };
        assert_eq!(minute_grid_bucket(at, 1), end(9, 8));
        assert_eq!(minute_grid_bucket(at, 5), end(9, 10));
        assert_eq!(minute_grid_bucket(at, 15), end(9, 15));
    }

    #[test]
    fn minute_grid_bucket_at_exact_boundary() {
        // A tick exactly on a boundary belongs to the bar that starts
        // there, not the one that ends there.
        let at = NaiveDate::from_ymd_opt(2024, 5, 15)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        assert_eq!(
            minute_grid_bucket(at, 15),
            NaiveDate::from_ymd_opt(2024, 5, 15)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap()
        );
    }
}
