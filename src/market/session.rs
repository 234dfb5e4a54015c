//! Trading-session timelines and the tick-validity predicate.
//!
//! A product's trading day is an ordered list of session points, each an
//! OPEN or CLOSE marker at a time of day. Night sessions cross midnight
//! (gold trades 21:00-02:30), so raw clock times do not sort; every point
//! and every query time is shifted by a fixed hour bias first, after which
//! each product's list is strictly ascending and binary-searchable.
//!
//! The bias is purely internal. It never appears in a tick, a bar, or a
//! persisted document.
//!
//! Validity check: locate the rightmost session point at or before the
//! tick's (biased) time of day. The tick is tradable iff that point is an
//! OPEN. A tick earlier than every point resolves to the final CLOSE,
//! which correctly reads as "outside the session".

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveTime, Timelike};

use crate::market::tick::{Exchange, Tick};

/// Hours added (mod 24) to every session point and query time so that
/// cross-midnight night sessions sort linearly.
pub const HOUR_BIAS: u32 = 6;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// Shift a time of day by the hour bias and reduce it to a minute-of-day.
///
/// Session boundaries are whole minutes, so minute precision is exact for
/// the `<=` comparisons the validity search performs.
pub fn biased_minute(time: NaiveTime) -> u32 {
    (time.hour() * 60 + time.minute() + HOUR_BIAS * 60) % MINUTES_PER_DAY
}

fn biased_raw(hour: u32, minute: u32) -> u32 {
    (hour * 60 + minute + HOUR_BIAS * 60) % MINUTES_PER_DAY
}

// =============================================================================
// SESSION POINTS
// =============================================================================

/// Marker kind of a session or bar-boundary point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointKind {
    Open,
    Close,
}

/// One boundary on a trading timeline, held as a biased minute-of-day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPoint {
    /// Minute of day after the hour-bias shift.
    pub minute: u32,
    pub kind: PointKind,
}

/// Locate the rightmost point with `minute <= target`, falling back to the
/// final point when the target precedes the whole list.
pub(crate) fn locate(points: &[SessionPoint], target: u32) -> &SessionPoint {
    let idx = points.partition_point(|p| p.minute <= target);
    if idx == 0 {
        &points[points.len() - 1]
    } else {
        &points[idx - 1]
    }
}

// =============================================================================
// TIMELINE
// =============================================================================

/// An immutable trading timeline for one product: alternating OPEN/CLOSE
/// points covering one logical trading day, strictly ascending in biased
/// time. The first point is always an OPEN, the last always a CLOSE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeline {
    points: Vec<SessionPoint>,
}

impl Timeline {
    /// Build a timeline from `(open, close)` clock-time pairs given as
    /// `(hour, minute)` tuples in raw (unbiased) local time, in session
    /// order (night session first where present).
    fn from_sessions(sessions: &[((u32, u32), (u32, u32))]) -> Self {
        let mut points = Vec::with_capacity(sessions.len() * 2);
        for &((oh, om), (ch, cm)) in sessions {
            points.push(SessionPoint {
                minute: biased_raw(oh, om),
                kind: PointKind::Open,
            });
            points.push(SessionPoint {
                minute: biased_raw(ch, cm),
                kind: PointKind::Close,
            });
        }
        debug_assert!(
            points.windows(2).all(|w| w[0].minute < w[1].minute),
            "session points must strictly ascend after the bias shift"
        );
        Timeline { points }
    }

    /// All points, in ascending biased order.
    pub fn points(&self) -> &[SessionPoint] {
        &self.points
    }

    /// `(open, close)` biased-minute pairs, one per session interval.
    pub fn intervals(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.points.chunks(2).map(|pair| (pair[0].minute, pair[1].minute))
    }

    /// Biased minute of the first CLOSE point. For night products this is
    /// the end of the night session.
    pub fn first_close(&self) -> u32 {
        self.points[1].minute
    }

    /// Whether a time of day falls inside an open session interval.
    ///
    /// A tick exactly at an OPEN is inside; exactly at a CLOSE is outside.
    pub fn covers(&self, time: NaiveTime) -> bool {
        locate(&self.points, biased_minute(time)).kind == PointKind::Open
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Lookup failures from the timeline registry. A tick whose timeline
/// cannot be resolved is dropped, never aggregated or persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineError {
    /// Neither the product code nor the exchange maps to a timeline.
    UnknownTimeline { symbol: String, exchange: Exchange },
    /// CFFEX products need an explicit class (index future vs treasury
    /// bond); the symbol alone does not identify it.
    CffexClassRequired { symbol: String },
}

impl fmt::Display for TimelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimelineError::UnknownTimeline { symbol, exchange } => {
                write!(f, "no trading timeline for {} on exchange {}", symbol, exchange)
            }
            TimelineError::CffexClassRequired { symbol } => {
                write!(f, "CFFEX product {} requires an explicit product class", symbol)
            }
        }
    }
}

impl Error for TimelineError {}

/// CFFEX product classes with distinct day sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CffexClass {
    IndexFuture,
    TreasuryBond,
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Default day session shared by SHFE, DCE, CZCE and unclassified venues.
const DAY_DEFAULT: &[((u32, u32), (u32, u32))] = &[
    ((9, 0), (10, 15)),
    ((10, 30), (11, 30)),
    ((13, 30), (15, 0)),
];

/// CFFEX index futures day session.
const DAY_CFFEX_INDEX: &[((u32, u32), (u32, u32))] =
    &[((9, 30), (11, 30)), ((13, 0), (15, 0))];

/// CFFEX treasury bond day session.
const DAY_CFFEX_TREASURY: &[((u32, u32), (u32, u32))] =
    &[((9, 15), (11, 30)), ((13, 0), (15, 15))];

/// Night-session templates and the product codes assigned to each.
const NIGHT_TEMPLATES: &[(((u32, u32), (u32, u32)), &[&str])] = &[
    // SHFE precious metals
    (((21, 0), (2, 30)), &["AU", "AG"]),
    // SHFE base metals
    (((21, 0), (1, 0)), &["CU", "AL", "ZN", "PB", "SN", "NI"]),
    // SHFE ferrous and rubber
    (((21, 0), (23, 0)), &["RU", "RB", "HC", "BU"]),
    // DCE
    (((21, 0), (23, 30)), &["P", "J", "M", "Y", "A", "B", "JM", "I"]),
    // CZCE
    (((21, 0), (23, 30)), &["SR", "CF", "RM", "MAPTA", "ZC", "FG", "OI"]),
];

/// Static registry mapping products and exchanges to session timelines.
///
/// Built once at engine construction; lookups are read-only afterwards.
pub struct TimelineRegistry {
    day_default: Arc<Timeline>,
    cffex_index: Arc<Timeline>,
    cffex_treasury: Arc<Timeline>,
    night_products: HashMap<&'static str, Arc<Timeline>>,
}

impl TimelineRegistry {
    pub fn new() -> Self {
        let mut night_products = HashMap::new();
        for (night, codes) in NIGHT_TEMPLATES {
            let mut sessions = vec![*night];
            sessions.extend_from_slice(DAY_DEFAULT);
            let timeline = Arc::new(Timeline::from_sessions(&sessions));
            for code in *codes {
                night_products.insert(*code, Arc::clone(&timeline));
            }
        }
        TimelineRegistry {
            day_default: Arc::new(Timeline::from_sessions(DAY_DEFAULT)),
            cffex_index: Arc::new(Timeline::from_sessions(DAY_CFFEX_INDEX)),
            cffex_treasury: Arc::new(Timeline::from_sessions(DAY_CFFEX_TREASURY)),
            night_products,
        }
    }

    /// Resolve the timeline for a contract symbol.
    ///
    /// The product code is the symbol with trailing month digits removed,
    /// uppercased. Night products resolve by code; everything else falls
    /// back to the exchange's day session.
    pub fn timeline_for(
        &self,
        symbol: &str,
        exchange: Exchange,
    ) -> Result<Arc<Timeline>, TimelineError> {
        let code = product_code(symbol);
        if let Some(timeline) = self.night_products.get(code.as_str()) {
            return Ok(Arc::clone(timeline));
        }
        match exchange {
            Exchange::Shfe | Exchange::Dce | Exchange::Czce | Exchange::Unknown => {
                Ok(Arc::clone(&self.day_default))
            }
            Exchange::Cffex => Err(TimelineError::CffexClassRequired {
                symbol: symbol.to_string(),
            }),
            Exchange::Other => Err(TimelineError::UnknownTimeline {
                symbol: symbol.to_string(),
                exchange,
            }),
        }
    }

    /// CFFEX day sessions, for callers that know the product class.
    pub fn cffex_timeline(&self, class: CffexClass) -> Arc<Timeline> {
        match class {
            CffexClass::IndexFuture => Arc::clone(&self.cffex_index),
            CffexClass::TreasuryBond => Arc::clone(&self.cffex_treasury),
        }
    }

    /// Whether a tick falls inside its product's open session.
    ///
    /// Requires the tick datetime to be resolved; unresolved ticks read as
    /// invalid.
    pub fn is_tradable(&self, tick: &Tick) -> Result<bool, TimelineError> {
        let timeline = self.timeline_for(&tick.symbol, tick.exchange)?;
        Ok(match tick.datetime {
            Some(dt) => timeline.covers(dt.time()),
            None => false,
        })
    }
}

impl Default for TimelineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip trailing contract-month digits and uppercase: `rb1810` -> `RB`.
fn product_code(symbol: &str) -> String {
    symbol
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn registry() -> TimelineRegistry {
        TimelineRegistry::new()
    }

    fn tick_at(symbol: &str, exchange: Exchange, h: u32, m: u32, s: u32) -> Tick {
        let datetime = NaiveDate::from_ymd_opt(2024, 5, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap();
        Tick {
            symbol: symbol.to_string(),
            exchange,
            vt_symbol: symbol.to_string(),
            datetime: Some(datetime),
            ..Tick::default()
        }
    }

    fn assert_alternating(timeline: &Timeline) {
        let points = timeline.points();
        assert!(points.len() >= 2 && points.len() % 2 == 0);
        assert_eq!(points[0].kind, PointKind::Open);
        assert_eq!(points[points.len() - 1].kind, PointKind::Close);
        for (i, p) in points.iter().enumerate() {
            let expected = if i % 2 == 0 { PointKind::Open } else { PointKind::Close };
            assert_eq!(p.kind, expected, "point {} out of phase", i);
        }
        assert!(points.windows(2).all(|w| w[0].minute < w[1].minute));
    }

    #[test]
    fn registered_timelines_alternate_and_ascend() {
        let reg = registry();
        for symbol in ["AU1812", "CU1811", "RB1810", "P1901", "SR1901", "FU1809"] {
            let timeline = reg.timeline_for(symbol, Exchange::Shfe).unwrap();
            assert_alternating(&timeline);
        }
        assert_alternating(&reg.cffex_timeline(CffexClass::IndexFuture));
        assert_alternating(&reg.cffex_timeline(CffexClass::TreasuryBond));
    }

    #[test]
    fn night_product_resolves_by_code_not_exchange() {
        let reg = registry();
        let by_shfe = reg.timeline_for("rb1810", Exchange::Shfe).unwrap();
        let by_unknown = reg.timeline_for("RB1810", Exchange::Unknown).unwrap();
        assert_eq!(by_shfe.points(), by_unknown.points());
        // Night session present: first close is 23:00.
        assert_eq!(by_shfe.first_close(), biased_raw(23, 0));
    }

    #[test]
    fn day_product_uses_exchange_default() {
        let reg = registry();
        let timeline = reg.timeline_for("FU1809", Exchange::Shfe).unwrap();
        assert_eq!(timeline.points().len(), 6);
        assert_eq!(timeline.points()[0].minute, biased_raw(9, 0));
    }

    #[test]
    fn cffex_requires_class() {
        let err = registry().timeline_for("IF1806", Exchange::Cffex).unwrap_err();
        assert!(matches!(err, TimelineError::CffexClassRequired { .. }));
    }

    #[test]
    fn unmapped_exchange_is_unknown_timeline() {
        let err = registry().timeline_for("XX1806", Exchange::Other).unwrap_err();
        assert!(matches!(err, TimelineError::UnknownTimeline { .. }));
    }

    #[test]
    fn open_boundary_is_valid_close_boundary_is_not() {
        let reg = registry();
        // RB night session opens 21:00, closes 23:00; day closes 15:00.
        assert!(reg.is_tradable(&tick_at("RB1810", Exchange::Shfe, 21, 0, 0)).unwrap());
        assert!(reg.is_tradable(&tick_at("RB1810", Exchange::Shfe, 22, 59, 59)).unwrap());
        assert!(!reg.is_tradable(&tick_at("RB1810", Exchange::Shfe, 23, 0, 0)).unwrap());
        assert!(!reg.is_tradable(&tick_at("RB1810", Exchange::Shfe, 15, 30, 0)).unwrap());
        assert!(reg.is_tradable(&tick_at("RB1810", Exchange::Shfe, 14, 59, 59)).unwrap());
    }

    #[test]
    fn lunch_break_is_invalid() {
        let reg = registry();
        assert!(!reg.is_tradable(&tick_at("RB1810", Exchange::Shfe, 12, 0, 0)).unwrap());
        assert!(!reg.is_tradable(&tick_at("RB1810", Exchange::Shfe, 10, 20, 0)).unwrap());
    }

    #[test]
    fn cross_midnight_night_session_is_valid() {
        let reg = registry();
        // Gold trades 21:00-02:30.
        assert!(reg.is_tradable(&tick_at("AU1812", Exchange::Shfe, 1, 30, 0)).unwrap());
        assert!(!reg.is_tradable(&tick_at("AU1812", Exchange::Shfe, 2, 30, 0)).unwrap());
        assert!(!reg.is_tradable(&tick_at("AU1812", Exchange::Shfe, 3, 0, 0)).unwrap());
    }

    #[test]
    fn pre_session_tick_wraps_to_final_close() {
        let reg = registry();
        // 08:00 biased is 14:00, before the biased day open (15:00) for a
        // day-only product; the search wraps to the final CLOSE.
        assert!(!reg.is_tradable(&tick_at("FU1809", Exchange::Shfe, 8, 0, 0)).unwrap());
    }

    #[test]
    fn unresolved_datetime_reads_invalid() {
        let reg = registry();
        let mut tick = tick_at("RB1810", Exchange::Shfe, 21, 0, 0);
        tick.datetime = None;
        assert!(!reg.is_tradable(&tick).unwrap());
    }
}
