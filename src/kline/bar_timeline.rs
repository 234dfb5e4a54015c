//! Bar-boundary timelines for session-aligned periods.
//!
//! Bars of 2, 30, 60, 120 and 240 minutes cannot snap to the wall-clock
//! grid: a bar must never stay updatable across a session gap, so its
//! boundaries have to be carved out of the product's trading sessions.
//! This module walks the session intervals and emits one OPEN point per
//! bar start. Consecutive bar starts double as each other's ends, so a
//! CLOSE sentinel is only inserted where a session ends exactly on a bar
//! boundary, plus one unconditional sentinel at the final session close.
//!
//! A 30-minute timeline over the default day session reads
//! `[09:00 O, 09:30 O, 10:00 O, 10:45 O, 11:15 O, 14:00 O? ...]` in raw
//! clock terms: the 10:00 bar absorbs the 10:15-10:30 break and runs to
//! 10:45. All stored minutes carry the hour bias.

use std::collections::HashMap;
use std::sync::Arc;

use crate::market::session::{PointKind, SessionPoint, Timeline, TimelineError, TimelineRegistry};
use crate::market::tick::Tick;

/// Builder and per-symbol cache of bar timelines for one period.
pub struct BarTimelines {
    period_minutes: u32,
    registry: Arc<TimelineRegistry>,
    cache: HashMap<String, Arc<Vec<SessionPoint>>>,
}

impl BarTimelines {
    pub fn new(period_minutes: u32, registry: Arc<TimelineRegistry>) -> Self {
        BarTimelines {
            period_minutes,
            registry,
            cache: HashMap::new(),
        }
    }

    /// Bar timeline for the tick's product, built on first use.
    pub fn for_tick(&mut self, tick: &Tick) -> Result<Arc<Vec<SessionPoint>>, TimelineError> {
        if let Some(points) = self.cache.get(&tick.symbol) {
            return Ok(Arc::clone(points));
        }
        let sessions = self.registry.timeline_for(&tick.symbol, tick.exchange)?;
        let points = Arc::new(build_bar_timeline(self.period_minutes, &sessions));
        self.cache.insert(tick.symbol.clone(), Arc::clone(&points));
        Ok(points)
    }
}

/// Split a product's session intervals into period-length bars.
///
/// `carry` holds the minutes the next session interval owes to the bar
/// left unfinished by the previous one.
fn build_bar_timeline(period_minutes: u32, sessions: &Timeline) -> Vec<SessionPoint> {
    let mut points: Vec<SessionPoint> = Vec::new();
    let mut carry: u32 = 0;

    for (open, close) in sessions.intervals() {
        let len = close - open;
        if carry > len {
            // The whole interval extends the unfinished bar.
            carry -= len;
            continue;
        }

        let span = len - carry;
        let quot = span / period_minutes;
        let rem = span % period_minutes;

        for i in 0..quot {
            points.push(SessionPoint {
                minute: open + carry + i * period_minutes,
                kind: PointKind::Open,
            });
        }

        if rem > 0 {
            points.push(SessionPoint {
                minute: open + carry + quot * period_minutes,
                kind: PointKind::Open,
            });
            carry = period_minutes - rem;
        } else {
            // The interval ends exactly on a bar boundary. The next bar
            // start is in a later interval and cannot serve as this bar's
            // end, so mark it explicitly.
            points.push(SessionPoint {
                minute: close,
                kind: PointKind::Close,
            });
            carry = 0;
        }
    }

    let final_close = sessions.points()[sessions.points().len() - 1];
    if points.last() != Some(&final_close) {
        points.push(final_close);
    }
    points
}
