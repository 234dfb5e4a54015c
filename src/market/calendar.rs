//! Working-day calendar helpers.
//!
//! Chinese futures exchanges do not trade on weekends, so bars and daily
//! buckets that would land on a Saturday or Sunday are carried forward to
//! the next Monday. Public holidays are not modeled; a holiday gap simply
//! produces no ticks, and the differencing rules downstream absorb it.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Weekday};

use crate::market::session::HOUR_BIAS;

/// Push a timestamp forward, day by day, until it falls on a weekday.
pub fn next_working_day(mut t: NaiveDateTime) -> NaiveDateTime {
    while matches!(t.weekday(), Weekday::Sat | Weekday::Sun) {
        t += Duration::days(1);
    }
    t
}

/// The trading date that owns a tick timestamp.
///
/// Night-session ticks belong to the following day's trading date, which
/// the hour bias produces directly; a Friday-night tick lands on Saturday
/// after the shift and is then carried forward to Monday.
pub fn trading_date(tick_datetime: NaiveDateTime) -> NaiveDate {
    next_working_day(tick_datetime + Duration::hours(HOUR_BIAS as i64)).date()
}

/// Truncate a timestamp to whole-minute precision.
pub(crate) fn floor_to_minute(t: NaiveDateTime) -> NaiveDateTime {
    t - Duration::seconds(t.second() as i64) - Duration::nanoseconds(t.nanosecond() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn weekday_passes_through() {
        let wed = dt(2024, 5, 15, 11, 0, 0);
        assert_eq!(next_working_day(wed), wed);
    }

    #[test]
    fn weekend_rolls_to_monday() {
        let sat = dt(2024, 5, 18, 4, 30, 0);
        let rolled = next_working_day(sat);
        assert_eq!(rolled.date(), NaiveDate::from_ymd_opt(2024, 5, 20).unwrap());
        assert_eq!(rolled.time(), sat.time());
    }

    #[test]
    fn friday_night_tick_owns_monday() {
        // 2024-05-17 is a Friday; a 22:30 night tick shifts past midnight
        // into Saturday and is carried to Monday.
        let tick = dt(2024, 5, 17, 22, 30, 0);
        assert_eq!(
            trading_date(tick),
            NaiveDate::from_ymd_opt(2024, 5, 20).unwrap()
        );
    }

    #[test]
    fn day_tick_owns_same_date() {
        let tick = dt(2024, 5, 15, 10, 0, 0);
        assert_eq!(
            trading_date(tick),
            NaiveDate::from_ymd_opt(2024, 5, 15).unwrap()
        );
    }

    #[test]
    fn floor_drops_seconds_and_subseconds() {
        let t = dt(2024, 5, 15, 10, 0, 59) + Duration::microseconds(123_456);
        assert_eq!(floor_to_minute(t), dt(2024, 5, 15, 10, 0, 0));
    }
}
